//! The per-connection state machine and its run loop.
//!
//! A [`ConnectionCore`] owns the transport, the frame parser, the stream
//! registry, the partial-frame map, and the write batcher, and is driven as
//! a single task by [`run`](ConnectionCore::run). All state mutation happens
//! on that task: handlers and stream producers re-enter the core by posting
//! events, never by calling into it. Each loop iteration handles one wake-up
//! (control signal, handler event, or inbound frame), opportunistically
//! drains further pending events, and flushes all outbound frames with one
//! batched write.
//!
//! Lifecycle: `Alive → Closing → Closed`, monotonic. Closing begins when the
//! peer violates the protocol, the transport fails, the peer disconnects,
//! or the manager asks; the connection reaches `Closed` only once no
//! in-flight request contexts remain outside the registry, at which point
//! every stream is cancelled in one sweep and the task returns.

mod context;
mod event;
mod registry;
mod subscriber;
mod writer;

use std::sync::Arc;

use futures::StreamExt;
use log::{debug, error, info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf},
    sync::mpsc,
};
use tokio_util::codec::FramedRead;

pub use context::FrameContext;
use context::BufferedRequest;
pub use event::ControlSignal;
use event::ConnectionEvent;
use registry::{PartialFrames, StreamRegistry};
pub use subscriber::{StreamClosed, StreamProducer};
use subscriber::StreamSubscriber;
use writer::{WriteBatcher, WriteFailure};

use crate::{
    error::{ConnectionError, RocketError},
    frame::{
        self, ErrorFrame, Frame, FrameCodec, FrameType, FramingError, PayloadFrame, StreamId,
    },
    handler::FrameHandler,
    manager::{ConnectionHandle, ConnectionId, ConnectionManager},
};

/// Top-level connection lifecycle. Transitions never reverse.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Frames flow in both directions.
    Alive,
    /// No more reads; waiting for in-flight work to retire.
    Closing,
    /// All resources released; the connection task is returning.
    Closed,
}

impl ConnectionState {
    /// Whether the connection still accepts inbound frames.
    #[must_use]
    pub fn is_alive(self) -> bool { matches!(self, Self::Alive) }

    /// Whether the connection reached its final state.
    #[must_use]
    pub fn is_closed(self) -> bool { matches!(self, Self::Closed) }
}

/// Tuning knobs for one connection.
#[derive(Clone, Copy, Debug)]
pub struct ConnectionConfig {
    max_frame_length: usize,
    stream_buffer_limit: usize,
    event_drain_limit: usize,
}

impl ConnectionConfig {
    /// Cap on the size of a single frame in either direction, clamped to
    /// the codec's supported range.
    #[must_use]
    pub fn with_max_frame_length(mut self, value: usize) -> Self {
        self.max_frame_length = frame::codec::clamp_frame_length(value);
        self
    }

    /// Items a stream buffers ahead of granted demand before the stream
    /// fails with `APPLICATION_ERROR`. At least one.
    #[must_use]
    pub fn with_stream_buffer_limit(mut self, value: usize) -> Self {
        self.stream_buffer_limit = value.max(1);
        self
    }

    /// Upper bound on handler events coalesced into one loop iteration
    /// (and therefore one batched write). At least one.
    #[must_use]
    pub fn with_event_drain_limit(mut self, value: usize) -> Self {
        self.event_drain_limit = value.max(1);
        self
    }

    /// Configured maximum frame length.
    #[must_use]
    pub fn max_frame_length(&self) -> usize { self.max_frame_length }

    /// Configured per-stream buffer soft limit.
    #[must_use]
    pub fn stream_buffer_limit(&self) -> usize { self.stream_buffer_limit }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_frame_length: frame::codec::DEFAULT_MAX_FRAME_LENGTH,
            stream_buffer_limit: 64,
            event_drain_limit: 128,
        }
    }
}

/// One wake-up of the connection loop.
enum LoopEvent {
    Control(Option<ControlSignal>),
    Event(ConnectionEvent),
    Inbound(Option<Result<Frame, std::io::Error>>),
    Idle,
}

/// Server side of one Rocket connection.
pub struct ConnectionCore<T, H> {
    id: ConnectionId,
    reader: FramedRead<ReadHalf<T>, FrameCodec>,
    writer: WriteHalf<T>,
    batcher: WriteBatcher,
    handler: Arc<H>,
    manager: Arc<dyn ConnectionManager>,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    events_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    control_rx: mpsc::UnboundedReceiver<ControlSignal>,
    control_open: bool,
    registry: StreamRegistry,
    partial_frames: PartialFrames,
    inflight: usize,
    state: ConnectionState,
    setup_received: bool,
    config: ConnectionConfig,
    outcome: Option<ConnectionError>,
}

impl<T, H> ConnectionCore<T, H>
where
    T: AsyncRead + AsyncWrite,
    H: FrameHandler,
{
    /// Take ownership of an accepted transport and register with the
    /// manager. The connection does nothing until [`run`](Self::run) is
    /// polled.
    pub fn new(
        transport: T,
        handler: Arc<H>,
        manager: Arc<dyn ConnectionManager>,
        config: ConnectionConfig,
    ) -> Self {
        let id = ConnectionId::next();
        let codec = FrameCodec::new(config.max_frame_length);
        let (read_half, write_half) = tokio::io::split(transport);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        manager.add_connection(ConnectionHandle::new(id, control_tx));
        Self {
            id,
            reader: FramedRead::new(read_half, codec.clone()),
            writer: write_half,
            batcher: WriteBatcher::new(codec),
            handler,
            manager,
            events_tx,
            events_rx,
            control_rx,
            control_open: true,
            registry: StreamRegistry::new(),
            partial_frames: PartialFrames::new(),
            inflight: 0,
            state: ConnectionState::Alive,
            setup_received: false,
            config,
            outcome: None,
        }
    }

    /// Identifier assigned to this connection.
    #[must_use]
    pub fn id(&self) -> ConnectionId { self.id }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState { self.state }

    /// Whether in-flight work or a pending write keeps the connection busy.
    #[must_use]
    pub fn is_busy(&self) -> bool { self.inflight > 0 || !self.batcher.is_empty() }

    /// Drive the connection until it reaches `Closed`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Protocol`] when the peer violated the
    /// framing grammar and [`ConnectionError::Transport`] when the
    /// underlying transport failed. Graceful closes (peer disconnect, idle
    /// close, manager drain) return `Ok`.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!("connection opened: id={}", self.id);
        while !self.state.is_closed() {
            let event = self.next_event().await;
            self.dispatch_loop_event(event).await;
            self.drain_pending_events();
            self.close_if_needed();
            self.flush_writes().await;
        }
        debug_assert!(self.registry.is_empty());
        debug_assert_eq!(self.inflight, 0);
        self.manager.remove_connection(self.id);
        info!("connection closed: id={}", self.id);
        match self.outcome.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Await the next wake-up with biased priority: manager signals first,
    /// then handler events, then inbound frames.
    async fn next_event(&mut self) -> LoopEvent {
        tokio::select! {
            biased;

            signal = self.control_rx.recv(), if self.control_open => LoopEvent::Control(signal),
            event = self.events_rx.recv() => match event {
                Some(event) => LoopEvent::Event(event),
                None => LoopEvent::Idle,
            },
            frame = self.reader.next(), if self.state.is_alive() => LoopEvent::Inbound(frame),
        }
    }

    async fn dispatch_loop_event(&mut self, event: LoopEvent) {
        match event {
            LoopEvent::Control(Some(signal)) => self.handle_control(signal),
            LoopEvent::Control(None) => self.control_open = false,
            LoopEvent::Event(event) => self.handle_event(event),
            LoopEvent::Inbound(Some(Ok(frame))) => self.handle_frame(frame).await,
            LoopEvent::Inbound(Some(Err(error))) => self.handle_read_error(error),
            LoopEvent::Inbound(None) => {
                // The peer is gone; a connection-level ERROR could never
                // reach it.
                debug!("peer disconnected: id={}", self.id);
                self.begin_close();
            }
            LoopEvent::Idle => {}
        }
    }

    /// Apply further already-posted events so their frames share the
    /// iteration's batched write.
    fn drain_pending_events(&mut self) {
        for _ in 0..self.config.event_drain_limit {
            match self.events_rx.try_recv() {
                Ok(event) => self.handle_event(event),
                Err(_) => break,
            }
        }
    }

    async fn flush_writes(&mut self) {
        if self.batcher.is_empty() {
            return;
        }
        if let Err(failure) = self.batcher.flush(&mut self.writer).await {
            self.handle_write_failure(failure);
        }
    }

    fn handle_control(&mut self, signal: ControlSignal) {
        match signal {
            ControlSignal::PendingShutdown => {
                debug!("drain announced: id={}", self.id);
            }
            ControlSignal::CloseWhenIdle => {
                debug_assert!(!self.is_busy(), "closeWhenIdle requires an idle connection");
                self.close(Some(RocketError::connection_close("Closing idle connection")));
            }
            ControlSignal::IdleTimeout => {
                if !self.is_busy() {
                    self.close(Some(RocketError::connection_close("Closing idle connection")));
                }
            }
            ControlSignal::Drop => {
                self.close(Some(RocketError::connection_error("Dropping connection")));
            }
        }
    }

    /// Inbound dispatch: setup-first rule, then a single branch on frame
    /// type.
    async fn handle_frame(&mut self, frame: Frame) {
        let frame_type = frame.frame_type();
        if !self.setup_received {
            if frame_type != FrameType::Setup {
                return self.fail_connection(RocketError::invalid_setup(
                    "First frame must be SETUP frame",
                ));
            }
            self.setup_received = true;
        } else if frame_type == FrameType::Setup {
            return self.fail_connection(RocketError::invalid_setup(
                "More than one SETUP frame received",
            ));
        }

        match frame {
            Frame::Setup(setup) => {
                let context = self.new_context(setup.stream_id);
                let handler = Arc::clone(&self.handler);
                handler.handle_setup(setup, context).await;
            }
            Frame::RequestResponse(request) => {
                let context = self.new_context(request.stream_id);
                self.on_request_frame(context, BufferedRequest::Response(request));
            }
            Frame::RequestFnf(request) => {
                let context = self.new_context(request.stream_id);
                self.on_request_frame(context, BufferedRequest::Fnf(request));
            }
            Frame::RequestStream(request) => {
                let context = self.new_context(request.stream_id);
                self.on_request_frame(context, BufferedRequest::Stream(request));
            }
            Frame::RequestN(request) => {
                // A miss races normal termination and is not an error.
                self.update_stream(request.stream_id, |subscriber| {
                    subscriber.request(request.n)
                });
            }
            Frame::Cancel(cancel) => {
                if let Some(mut subscriber) = self.registry.remove(cancel.stream_id) {
                    subscriber.cancel();
                    self.dec_inflight();
                }
                // The cancelled request may still be mid-assembly.
                self.partial_frames.remove(cancel.stream_id);
            }
            Frame::Payload(payload) => self.on_payload_frame(payload),
            Frame::Error(_) | Frame::Unsupported { .. } => {
                self.fail_connection(RocketError::invalid(format!(
                    "Received unhandleable frame type ({frame_type})"
                )));
            }
        }
    }

    /// First fragment of a request: dispatch immediately, or park the
    /// context until the final fragment arrives.
    fn on_request_frame(&mut self, mut context: FrameContext, request: BufferedRequest) {
        let stream_id = context.stream_id();
        let follows = request.has_follows();
        context.buffer_request(request);
        if follows {
            if !self.partial_frames.insert(stream_id, context) {
                self.fail_connection(RocketError::invalid(format!(
                    "Stream {stream_id} already has a partial request"
                )));
            }
            return;
        }
        self.on_full_frame(context);
    }

    /// Continuation fragment: append, and dispatch once `FOLLOWS` clears.
    fn on_payload_frame(&mut self, frame: PayloadFrame) {
        let stream_id = frame.stream_id;
        if !self.partial_frames.contains(stream_id) {
            return self.fail_connection(RocketError::invalid(format!(
                "Unexpected PAYLOAD frame received on stream {stream_id}"
            )));
        }
        if frame.flags.follows() {
            if let Some(context) = self.partial_frames.get_mut(stream_id) {
                context.append_fragment(frame.payload);
            }
        } else if let Some(mut context) = self.partial_frames.remove(stream_id) {
            context.append_fragment(frame.payload);
            self.on_full_frame(context);
        }
    }

    /// Dispatch a fully assembled request to the handler.
    fn on_full_frame(&mut self, mut context: FrameContext) {
        let Some(mut request) = context.take_request() else {
            return;
        };
        request.clear_follows();
        match request {
            BufferedRequest::Response(frame) => {
                let handler = Arc::clone(&self.handler);
                tokio::spawn(async move {
                    handler.handle_request_response(frame, context).await;
                });
            }
            BufferedRequest::Fnf(frame) => {
                let handler = Arc::clone(&self.handler);
                tokio::spawn(async move {
                    handler.handle_request_fnf(frame, context).await;
                });
            }
            BufferedRequest::Stream(frame) => {
                let stream_id = context.disarm();
                let (subscriber, producer) = StreamSubscriber::create(
                    stream_id,
                    frame.initial_request_n,
                    self.config.stream_buffer_limit,
                    self.events_tx.clone(),
                );
                if !self.registry.insert(stream_id, subscriber) {
                    self.dec_inflight();
                    return self.fail_connection(RocketError::invalid(format!(
                        "Stream {stream_id} already in use"
                    )));
                }
                let handler = Arc::clone(&self.handler);
                tokio::spawn(async move {
                    handler.handle_request_stream(frame, producer).await;
                });
            }
        }
    }

    fn handle_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Reply {
                stream_id,
                payload,
                flags,
            } => {
                self.send_frame(&Frame::Payload(PayloadFrame::new(stream_id, payload, flags)));
            }
            ConnectionEvent::ReplyError { stream_id, error } => {
                let (code, message) = error.into_parts();
                self.send_frame(&Frame::Error(ErrorFrame {
                    stream_id,
                    code,
                    message,
                }));
            }
            ConnectionEvent::ContextRetired => self.dec_inflight(),
            ConnectionEvent::StreamNext { stream_id, payload } => {
                self.update_stream(stream_id, |subscriber| subscriber.on_next(payload));
            }
            ConnectionEvent::StreamComplete { stream_id } => {
                self.update_stream(stream_id, StreamSubscriber::on_complete);
            }
            ConnectionEvent::StreamError { stream_id, error } => {
                self.update_stream(stream_id, |subscriber| subscriber.on_error(error));
            }
            ConnectionEvent::StreamCancel { stream_id } => {
                if let Some(mut subscriber) = self.registry.remove(stream_id) {
                    subscriber.cancel();
                    self.dec_inflight();
                }
            }
        }
    }

    /// Apply a state change to a registered stream, emit whatever frames it
    /// produced, and retire it when it finished. A lookup miss races
    /// termination and is ignored.
    fn update_stream(
        &mut self,
        stream_id: StreamId,
        apply: impl FnOnce(&mut StreamSubscriber) -> Vec<Frame>,
    ) {
        let Some(subscriber) = self.registry.get_mut(stream_id) else {
            return;
        };
        let frames = apply(subscriber);
        let finished = subscriber.is_finished();
        for frame in &frames {
            self.send_frame(frame);
        }
        if finished && self.registry.remove(stream_id).is_some() {
            self.dec_inflight();
        }
    }

    /// Enqueue a frame on the current batch. A no-op once the connection is
    /// no longer alive.
    fn send_frame(&mut self, frame: &Frame) {
        if !self.state.is_alive() {
            return;
        }
        if let Err(err) = self.batcher.enqueue(frame) {
            warn!(
                "dropping oversized outbound frame: id={}, stream={}, error={err}",
                self.id,
                frame.stream_id()
            );
            self.fail_connection(RocketError::connection_error(
                "Outbound frame exceeded the maximum frame length",
            ));
        }
    }

    fn handle_read_error(&mut self, error: std::io::Error) {
        if let Some(framing) = FramingError::from_io(&error) {
            let framing = framing.clone();
            return self.fail_connection(RocketError::invalid(framing.to_string()));
        }
        error!("read failed: id={}, error={error}", self.id);
        if self.outcome.is_none() {
            self.outcome = Some(ConnectionError::Transport {
                bytes_written: 0,
                source: error,
            });
        }
        self.close(Some(RocketError::connection_error("Transport read failed")));
    }

    fn handle_write_failure(&mut self, failure: WriteFailure) {
        let WriteFailure {
            bytes_written,
            source,
        } = failure;
        error!(
            "write failed: id={}, bytes_written={bytes_written}, error={source}",
            self.id
        );
        self.batcher.discard();
        if self.outcome.is_none() {
            self.outcome = Some(ConnectionError::Transport {
                bytes_written,
                source,
            });
        }
        self.begin_close();
        self.close_if_needed();
    }

    /// Record a peer protocol violation and close the connection.
    fn fail_connection(&mut self, error: RocketError) {
        warn!("protocol violation: id={}, error={error}", self.id);
        if self.outcome.is_none() {
            self.outcome = Some(ConnectionError::Protocol(error.clone()));
        }
        self.close(Some(error));
    }

    /// Stop reading, emit the connection-level `ERROR` on stream 0, and
    /// start waiting for in-flight work to retire.
    fn close(&mut self, error: Option<RocketError>) {
        if !self.state.is_alive() {
            return;
        }
        let error = error.unwrap_or_else(|| RocketError::connection_close("Closing connection"));
        info!("connection closing: id={}, reason={error}", self.id);
        let (code, message) = error.into_parts();
        self.send_frame(&Frame::Error(ErrorFrame {
            stream_id: StreamId::CONNECTION,
            code,
            message,
        }));
        self.begin_close();
    }

    fn begin_close(&mut self) {
        if !self.state.is_alive() {
            return;
        }
        self.state = ConnectionState::Closing;
        // Parked partial requests can never complete now; dropping them
        // posts their retirement events through the usual channel.
        self.partial_frames.clear();
        self.close_if_needed();
    }

    /// Fixed-point check run on every state change: once closing and no
    /// in-flight contexts exist outside the registry, cancel every stream
    /// in one sweep and reach `Closed`.
    fn close_if_needed(&mut self) {
        if self.state != ConnectionState::Closing || self.inflight != self.registry.len() {
            return;
        }
        for (_, mut subscriber) in self.registry.drain() {
            subscriber.cancel();
            self.inflight = self.inflight.saturating_sub(1);
        }
        debug_assert_eq!(self.inflight, 0);
        self.state = ConnectionState::Closed;
    }

    fn new_context(&mut self, stream_id: StreamId) -> FrameContext {
        self.inflight += 1;
        FrameContext::new(stream_id, self.events_tx.clone())
    }

    fn dec_inflight(&mut self) {
        debug_assert!(self.inflight > 0, "in-flight count underflow");
        self.inflight = self.inflight.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{frame::RequestFnfFrame, manager::ConnectionFleet};

    struct NullHandler;

    #[async_trait::async_trait]
    impl FrameHandler for NullHandler {
        async fn handle_request_response(
            &self,
            _frame: crate::frame::RequestResponseFrame,
            context: FrameContext,
        ) {
            context.send_error(RocketError::application("unused"));
        }

        async fn handle_request_fnf(&self, _frame: RequestFnfFrame, _context: FrameContext) {}

        async fn handle_request_stream(
            &self,
            _frame: crate::frame::RequestStreamFrame,
            _producer: StreamProducer,
        ) {
        }
    }

    fn core() -> ConnectionCore<tokio::io::DuplexStream, NullHandler> {
        let (server_io, _client_io) = tokio::io::duplex(1024);
        ConnectionCore::new(
            server_io,
            Arc::new(NullHandler),
            ConnectionFleet::new(),
            ConnectionConfig::default(),
        )
    }

    #[tokio::test]
    async fn a_fresh_connection_is_alive_and_idle() {
        let core = core();
        assert!(core.state().is_alive());
        assert!(!core.is_busy());
    }

    #[tokio::test]
    async fn in_flight_contexts_make_the_connection_busy() {
        let mut core = core();
        let context = core.new_context(StreamId::new(1));
        assert!(core.is_busy());
        drop(context);
        core.drain_pending_events();
        assert!(!core.is_busy());
    }

    #[tokio::test]
    async fn construction_registers_with_the_manager() {
        let fleet = ConnectionFleet::new();
        let (server_io, _client_io) = tokio::io::duplex(64);
        let core = ConnectionCore::new(
            server_io,
            Arc::new(NullHandler),
            Arc::clone(&fleet) as Arc<dyn ConnectionManager>,
            ConnectionConfig::default(),
        );
        assert_eq!(fleet.len(), 1);
        drop(core);
    }

    #[test]
    fn config_clamps_its_limits() {
        let config = ConnectionConfig::default()
            .with_stream_buffer_limit(0)
            .with_event_drain_limit(0)
            .with_max_frame_length(0);
        assert_eq!(config.stream_buffer_limit(), 1);
        assert!(config.max_frame_length() >= frame::codec::MIN_FRAME_LENGTH);
    }
}
