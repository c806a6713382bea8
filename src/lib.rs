//! Server-side Rocket connection core for multi-transport RPC servers.
//!
//! This crate owns the wire protocol between a byte-oriented transport and a
//! higher-level request dispatcher: it decodes framed messages from a single
//! peer into the request/response, fire-and-forget, and request/stream
//! interaction patterns, drives the per-stream state machines behind them
//! (demand propagation, cancellation, completion), batches outbound writes,
//! and coordinates graceful and forced shutdown with an enclosing connection
//! manager.
//!
//! The three seams an embedding server supplies:
//!
//! - a transport implementing `AsyncRead + AsyncWrite`, handed to
//!   [`ConnectionCore::new`];
//! - a [`FrameHandler`] producing application responses and streams;
//! - a [`ConnectionManager`] orchestrating fleet-wide shutdown
//!   ([`ConnectionFleet`] is a ready-made one).
//!
//! Each connection runs as a single task; handlers re-enter the core by
//! posting events through the handles they are given, never by calling into
//! it, so no core state is ever touched off the connection task.

pub mod connection;
pub mod error;
pub mod frame;
pub mod handler;
pub mod manager;

pub use connection::{
    ConnectionConfig,
    ConnectionCore,
    ConnectionState,
    ControlSignal,
    FrameContext,
    StreamClosed,
    StreamProducer,
};
pub use error::{ConnectionError, ErrorCode, RocketError};
pub use frame::{Flags, Frame, FrameCodec, FrameType, Payload, StreamId};
pub use handler::FrameHandler;
pub use manager::{ConnectionFleet, ConnectionHandle, ConnectionId, ConnectionManager};
