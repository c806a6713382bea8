//! Contract consumed from the application frame handler.

use async_trait::async_trait;

use crate::{
    connection::{FrameContext, StreamProducer},
    frame::{RequestFnfFrame, RequestResponseFrame, RequestStreamFrame, SetupFrame},
};

/// Application-side handler for fully assembled inbound frames.
///
/// Setup handling runs on the connection task and should return promptly;
/// request handlers run in spawned tasks, so they may await freely. All
/// replies marshal back to the connection through the handles they are
/// given.
#[async_trait]
pub trait FrameHandler: Send + Sync + 'static {
    /// The connection's SETUP frame arrived. The default accepts it
    /// silently.
    async fn handle_setup(&self, frame: SetupFrame, context: FrameContext) {
        let _ = (frame, context);
    }

    /// A request/response arrived. The handler must eventually consume
    /// `context` through exactly one of
    /// [`send_payload`](FrameContext::send_payload) or
    /// [`send_error`](FrameContext::send_error).
    async fn handle_request_response(&self, frame: RequestResponseFrame, context: FrameContext);

    /// A fire-and-forget request arrived. The handler must not reply; the
    /// context only scopes the request's lifetime.
    async fn handle_request_fnf(&self, frame: RequestFnfFrame, context: FrameContext);

    /// A stream request arrived. The handler drives `producer` to
    /// completion or error, or observes cancellation through it.
    async fn handle_request_stream(&self, frame: RequestStreamFrame, producer: StreamProducer);
}
