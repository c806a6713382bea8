//! Error taxonomy for the connection core.
//!
//! Three layers mirror the propagation policy: [`RocketError`] is the typed
//! protocol-level error exchanged with handlers and peers (an [`ErrorCode`]
//! plus a message), [`ConnectionError`] is the connection-fatal taxonomy
//! surfaced by [`ConnectionCore::run`](crate::ConnectionCore::run), and
//! wire-level decode failures live in
//! [`FramingError`](crate::frame::FramingError). Application errors stay on
//! their stream; protocol and transport errors end the connection but never
//! the process.

use std::{fmt, io};

use thiserror::Error;

/// Wire error codes carried by `ERROR` frames.
///
/// The set is closed: unknown codes received from a peer are mapped to
/// [`ErrorCode::ConnectionError`] rather than rejected, and are never sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The SETUP frame was malformed or arrived out of order.
    InvalidSetup,
    /// The SETUP frame requested an unsupported protocol configuration.
    UnsupportedSetup,
    /// The server refused the SETUP frame.
    RejectedSetup,
    /// The connection failed at the transport level.
    ConnectionError,
    /// The connection is closing normally.
    ConnectionClose,
    /// The application handler reported a failure for one stream.
    ApplicationError,
    /// The stream was cancelled.
    Canceled,
    /// The peer violated the framing grammar.
    Invalid,
}

impl ErrorCode {
    /// Wire value of this code, big-endian on the wire.
    #[must_use]
    pub fn to_wire(self) -> u32 {
        match self {
            Self::InvalidSetup => 0x0001,
            Self::UnsupportedSetup => 0x0002,
            Self::RejectedSetup => 0x0003,
            Self::ConnectionError => 0x0101,
            Self::ConnectionClose => 0x0102,
            Self::ApplicationError => 0x0201,
            Self::Canceled => 0x0203,
            Self::Invalid => 0x0204,
        }
    }

    /// Map a wire value to a code, treating unknown values leniently.
    #[must_use]
    pub fn from_wire(value: u32) -> Self {
        match value {
            0x0001 => Self::InvalidSetup,
            0x0002 => Self::UnsupportedSetup,
            0x0003 => Self::RejectedSetup,
            0x0102 => Self::ConnectionClose,
            0x0201 => Self::ApplicationError,
            0x0203 => Self::Canceled,
            0x0204 => Self::Invalid,
            _ => Self::ConnectionError,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::InvalidSetup => "INVALID_SETUP",
            Self::UnsupportedSetup => "UNSUPPORTED_SETUP",
            Self::RejectedSetup => "REJECTED_SETUP",
            Self::ConnectionError => "CONNECTION_ERROR",
            Self::ConnectionClose => "CONNECTION_CLOSE",
            Self::ApplicationError => "APPLICATION_ERROR",
            Self::Canceled => "CANCELED",
            Self::Invalid => "INVALID",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Typed protocol error: an [`ErrorCode`] plus a human-readable message.
///
/// This is the value handlers report through
/// [`FrameContext::send_error`](crate::FrameContext::send_error) and the
/// value peers receive inside `ERROR` frames.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct RocketError {
    code: ErrorCode,
    message: String,
}

impl RocketError {
    /// Build an error from a code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Framing-grammar violation (`INVALID`).
    pub fn invalid(message: impl Into<String>) -> Self { Self::new(ErrorCode::Invalid, message) }

    /// Setup-rule violation (`INVALID_SETUP`).
    pub fn invalid_setup(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidSetup, message)
    }

    /// Application-level failure local to one stream (`APPLICATION_ERROR`).
    pub fn application(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ApplicationError, message)
    }

    /// Transport-level connection failure (`CONNECTION_ERROR`).
    pub fn connection_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConnectionError, message)
    }

    /// Normal connection close (`CONNECTION_CLOSE`).
    pub fn connection_close(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConnectionClose, message)
    }

    /// Error code carried by this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode { self.code }

    /// Message carried by this error. May be empty.
    #[must_use]
    pub fn message(&self) -> &str { &self.message }

    pub(crate) fn into_parts(self) -> (ErrorCode, String) { (self.code, self.message) }
}

/// Connection-fatal error returned by the connection task.
///
/// Protocol and transport errors end the connection; they are reported to
/// the caller for logging and never panic. A graceful close (peer EOF, idle
/// close, manager drain) is not an error.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The peer violated the protocol; an `ERROR` frame was sent on stream 0.
    #[error("protocol violation: {0}")]
    Protocol(RocketError),

    /// The transport failed mid-stream. `bytes_written` counts the bytes of
    /// the failing write that reached the socket before the error.
    #[error("transport failed after writing {bytes_written} bytes: {source}")]
    Transport {
        /// Bytes of the failing write accepted by the socket.
        bytes_written: usize,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(ErrorCode::InvalidSetup, 0x0001)]
    #[case(ErrorCode::UnsupportedSetup, 0x0002)]
    #[case(ErrorCode::RejectedSetup, 0x0003)]
    #[case(ErrorCode::ConnectionError, 0x0101)]
    #[case(ErrorCode::ConnectionClose, 0x0102)]
    #[case(ErrorCode::ApplicationError, 0x0201)]
    #[case(ErrorCode::Canceled, 0x0203)]
    #[case(ErrorCode::Invalid, 0x0204)]
    fn error_codes_round_trip_their_wire_values(#[case] code: ErrorCode, #[case] wire: u32) {
        assert_eq!(code.to_wire(), wire);
        assert_eq!(ErrorCode::from_wire(wire), code);
    }

    #[test]
    fn unknown_wire_values_map_to_connection_error() {
        assert_eq!(ErrorCode::from_wire(0xDEAD), ErrorCode::ConnectionError);
        assert_eq!(ErrorCode::from_wire(0), ErrorCode::ConnectionError);
    }

    #[test]
    fn rocket_error_displays_code_and_message() {
        let err = RocketError::application("boom");
        assert_eq!(err.to_string(), "APPLICATION_ERROR: boom");
        assert_eq!(err.code(), ErrorCode::ApplicationError);
        assert_eq!(err.message(), "boom");
    }
}
