//! Transport framing codec.
//!
//! Byte-stream transports prefix every frame with a 24-bit big-endian
//! length. [`FrameCodec`] implements the Tokio codec traits so a
//! `FramedRead` presents each frame as one contiguous, fully parsed
//! [`Frame`] and a writer can serialise frames straight into its staging
//! buffer.

use std::io;

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{Frame, FramingError, payload::put_u24};

/// Size of the transport length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 3;

/// Smallest maximum frame length a codec will accept.
pub const MIN_FRAME_LENGTH: usize = 256;

/// Largest frame length representable by the 24-bit prefix.
pub const MAX_FRAME_LENGTH: usize = 0x00FF_FFFF;

/// Default maximum frame length (16 MiB minus one).
pub const DEFAULT_MAX_FRAME_LENGTH: usize = MAX_FRAME_LENGTH;

pub(crate) fn clamp_frame_length(value: usize) -> usize {
    value.clamp(MIN_FRAME_LENGTH, MAX_FRAME_LENGTH)
}

/// Length-delimited frame codec for byte-stream transports.
#[derive(Clone, Debug)]
pub struct FrameCodec {
    max_frame_length: usize,
}

impl FrameCodec {
    /// Construct a codec with a maximum frame length, clamped to
    /// [`MIN_FRAME_LENGTH`]..=[`MAX_FRAME_LENGTH`].
    #[must_use]
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            max_frame_length: clamp_frame_length(max_frame_length),
        }
    }

    /// Maximum frame length this codec will accept.
    #[must_use]
    pub fn max_frame_length(&self) -> usize { self.max_frame_length }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Frame>> {
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }
        let len = (usize::from(src[0]) << 16) | (usize::from(src[1]) << 8) | usize::from(src[2]);
        if len > self.max_frame_length {
            return Err(FramingError::OversizedFrame {
                size: len,
                max: self.max_frame_length,
            }
            .into());
        }
        if src.len() < LENGTH_PREFIX_SIZE + len {
            src.reserve(LENGTH_PREFIX_SIZE + len - src.len());
            return Ok(None);
        }
        src.advance(LENGTH_PREFIX_SIZE);
        let frame = src.split_to(len).freeze();
        Frame::decode(frame).map(Some).map_err(Into::into)
    }
}

impl Encoder<&Frame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: &Frame, dst: &mut BytesMut) -> io::Result<()> {
        let body_len = super::FRAME_HEADER_SIZE + item.body_len();
        if body_len > self.max_frame_length {
            return Err(FramingError::OversizedFrame {
                size: body_len,
                max: self.max_frame_length,
            }
            .into());
        }
        dst.reserve(LENGTH_PREFIX_SIZE + body_len);
        put_u24(dst, body_len);
        item.encode_into(dst);
        Ok(())
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> io::Result<()> {
        Encoder::<&Frame>::encode(self, &item, dst)
    }
}
