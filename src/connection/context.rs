//! Request context: the owning handle tying an inbound request to its
//! reply path.
//!
//! A [`FrameContext`] is created on a request's first (possibly only)
//! fragment and consumed when the request is finalised. The handle is
//! move-only, so "exactly one terminal send" is enforced by the type
//! system: [`send_payload`](FrameContext::send_payload) and
//! [`send_error`](FrameContext::send_error) take the context by value.
//! Creation increments the connection's in-flight count; going out of
//! scope posts a retirement event so the connection can observe quiescence
//! during close.

use tokio::sync::mpsc;

use super::event::ConnectionEvent;
use crate::{
    error::RocketError,
    frame::{
        Flags, Payload, RequestFnfFrame, RequestResponseFrame, RequestStreamFrame, StreamId,
    },
};

/// The first fragment of a request, buffered while `FOLLOWS` fragments
/// accumulate.
#[derive(Debug)]
pub(crate) enum BufferedRequest {
    Response(RequestResponseFrame),
    Fnf(RequestFnfFrame),
    Stream(RequestStreamFrame),
}

impl BufferedRequest {
    pub(crate) fn has_follows(&self) -> bool {
        match self {
            Self::Response(f) => f.follows,
            Self::Fnf(f) => f.follows,
            Self::Stream(f) => f.follows,
        }
    }

    pub(crate) fn append_payload(&mut self, payload: Payload) {
        match self {
            Self::Response(f) => f.payload.append(payload),
            Self::Fnf(f) => f.payload.append(payload),
            Self::Stream(f) => f.payload.append(payload),
        }
    }

    /// Mark the request fully assembled before dispatch.
    pub(crate) fn clear_follows(&mut self) {
        match self {
            Self::Response(f) => f.follows = false,
            Self::Fnf(f) => f.follows = false,
            Self::Stream(f) => f.follows = false,
        }
    }
}

struct ContextInner {
    stream_id: StreamId,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    request: Option<BufferedRequest>,
}

/// Owning handle for one in-flight request.
///
/// At most one context exists per in-flight request. For request/response
/// the handler must eventually call exactly one of
/// [`send_payload`](Self::send_payload) or [`send_error`](Self::send_error);
/// for fire-and-forget the handler must simply let the context drop.
pub struct FrameContext {
    inner: Option<ContextInner>,
}

impl FrameContext {
    pub(crate) fn new(
        stream_id: StreamId,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        Self {
            inner: Some(ContextInner {
                stream_id,
                events,
                request: None,
            }),
        }
    }

    /// Stream this request arrived on.
    #[must_use]
    pub fn stream_id(&self) -> StreamId {
        self.inner
            .as_ref()
            .map_or(StreamId::CONNECTION, |inner| inner.stream_id)
    }

    /// Send the terminal response payload. `flags` must carry `NEXT`,
    /// `COMPLETE`, or both.
    pub fn send_payload(mut self, payload: Payload, flags: Flags) {
        debug_assert!(
            flags.next() || flags.complete(),
            "terminal payload must carry NEXT or COMPLETE",
        );
        if let Some(inner) = self.inner.take() {
            let _ = inner.events.send(ConnectionEvent::Reply {
                stream_id: inner.stream_id,
                payload,
                flags,
            });
            let _ = inner.events.send(ConnectionEvent::ContextRetired);
        }
    }

    /// Send the terminal error for this request.
    pub fn send_error(mut self, error: RocketError) {
        if let Some(inner) = self.inner.take() {
            let _ = inner.events.send(ConnectionEvent::ReplyError {
                stream_id: inner.stream_id,
                error,
            });
            let _ = inner.events.send(ConnectionEvent::ContextRetired);
        }
    }

    pub(crate) fn buffer_request(&mut self, request: BufferedRequest) {
        if let Some(inner) = &mut self.inner {
            debug_assert!(inner.request.is_none(), "request already buffered");
            inner.request = Some(request);
        }
    }

    pub(crate) fn append_fragment(&mut self, payload: Payload) {
        if let Some(inner) = &mut self.inner
            && let Some(request) = &mut inner.request
        {
            request.append_payload(payload);
        }
    }

    pub(crate) fn take_request(&mut self) -> Option<BufferedRequest> {
        self.inner.as_mut().and_then(|inner| inner.request.take())
    }

    /// Consume the context without posting a retirement event: the caller
    /// (the connection, when turning a request into a registry stream)
    /// takes over the in-flight accounting.
    pub(crate) fn disarm(mut self) -> StreamId {
        self.inner
            .take()
            .map_or(StreamId::CONNECTION, |inner| inner.stream_id)
    }
}

impl Drop for FrameContext {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            let _ = inner.events.send(ConnectionEvent::ContextRetired);
        }
    }
}
