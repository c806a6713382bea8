//! Event and control messages crossing into the connection task.
//!
//! Handlers and stream producers never touch connection state directly:
//! every re-entry is an event posted to the connection's channel and applied
//! on the connection task. The channel crossing is the marshalling rule.

use crate::{
    error::RocketError,
    frame::{Flags, Payload, StreamId},
};

/// Events posted by [`FrameContext`](super::FrameContext) and
/// [`StreamProducer`](super::StreamProducer) handles.
#[derive(Debug)]
pub(crate) enum ConnectionEvent {
    /// Terminal response payload for a request/response stream.
    Reply {
        stream_id: StreamId,
        payload: Payload,
        flags: Flags,
    },
    /// Terminal error for a request/response stream.
    ReplyError {
        stream_id: StreamId,
        error: RocketError,
    },
    /// A request context went out of scope; one in-flight task fewer.
    ContextRetired,
    /// A stream producer delivered an item.
    StreamNext {
        stream_id: StreamId,
        payload: Payload,
    },
    /// A stream producer finished cleanly.
    StreamComplete { stream_id: StreamId },
    /// A stream producer failed.
    StreamError {
        stream_id: StreamId,
        error: RocketError,
    },
    /// A stream producer cancelled its own stream.
    StreamCancel { stream_id: StreamId },
}

/// Signals delivered by the connection manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlSignal {
    /// Fleet-wide drain has begun. A marker only; the connection keeps
    /// serving until told otherwise.
    PendingShutdown,
    /// Close gracefully. The manager only sends this once the connection
    /// reports itself idle.
    CloseWhenIdle,
    /// The idle timer fired. Closes gracefully when idle, otherwise ignored
    /// (the manager retries).
    IdleTimeout,
    /// Close immediately, cancelling all streams.
    Drop,
}
