//! Wire-level decode errors.
//!
//! Framing errors describe bytes that cannot be interpreted as a frame.
//! They convert into [`std::io::Error`] at the codec seam so the parser can
//! run inside a `FramedRead`; the connection recovers the framing variant
//! to decide between a protocol close (`INVALID`) and a transport close.

use std::io;

use thiserror::Error;

use super::flags::FrameType;

/// Errors produced while parsing bytes into frames.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// The 6-bit type value is outside the reserved range.
    #[error("unknown frame type ({value:#04x})")]
    UnknownFrameType {
        /// The offending 6-bit wire value.
        value: u8,
    },

    /// The frame is shorter than the six-byte header.
    #[error("frame shorter than header: {len} bytes")]
    TruncatedHeader {
        /// Bytes actually present.
        len: usize,
    },

    /// The body ends before a required field.
    #[error("truncated {frame_type} body: have {have}, need {need}")]
    TruncatedBody {
        /// Frame type being parsed.
        frame_type: FrameType,
        /// Bytes remaining in the body.
        have: usize,
        /// Bytes required by the field.
        need: usize,
    },

    /// The metadata length prefix points past the end of the body.
    #[error("metadata length {len} exceeds remaining body of {body} bytes")]
    MetadataOverrun {
        /// Declared metadata length.
        len: usize,
        /// Bytes remaining in the body.
        body: usize,
    },

    /// The transport length prefix exceeds the configured maximum.
    #[error("frame exceeds max length: {size} > {max}")]
    OversizedFrame {
        /// Length declared by the prefix.
        size: usize,
        /// Configured maximum frame length.
        max: usize,
    },

    /// A text field is not valid UTF-8.
    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 {
        /// Name of the offending field.
        field: &'static str,
    },
}

impl From<FramingError> for io::Error {
    fn from(err: FramingError) -> Self { io::Error::new(io::ErrorKind::InvalidData, err) }
}

impl FramingError {
    /// Recover a framing error carried inside an [`io::Error`], if any.
    #[must_use]
    pub fn from_io(err: &io::Error) -> Option<&FramingError> {
        err.get_ref().and_then(|inner| inner.downcast_ref())
    }
}
