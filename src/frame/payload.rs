//! Payload body shared by request and payload frames.
//!
//! A payload is an optional metadata segment plus a data segment. On the
//! wire the metadata, when present, is preceded by a 24-bit big-endian
//! length prefix; the remainder of the frame body is data.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{error::FramingError, flags::Flags};

pub(crate) const METADATA_LENGTH_SIZE: usize = 3;

/// Metadata and data segments of a frame body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Payload {
    metadata: Option<Bytes>,
    data: Bytes,
}

impl Payload {
    /// An empty payload with no metadata and no data.
    #[must_use]
    pub fn empty() -> Self { Self::default() }

    /// Payload carrying only data.
    pub fn from_data(data: impl Into<Bytes>) -> Self {
        Self {
            metadata: None,
            data: data.into(),
        }
    }

    /// Payload carrying both metadata and data.
    pub fn from_parts(metadata: impl Into<Bytes>, data: impl Into<Bytes>) -> Self {
        Self {
            metadata: Some(metadata.into()),
            data: data.into(),
        }
    }

    /// Payload with an explicit optional metadata segment.
    #[must_use]
    pub fn new(metadata: Option<Bytes>, data: Bytes) -> Self { Self { metadata, data } }

    /// Metadata segment, if present.
    #[must_use]
    pub fn metadata(&self) -> Option<&Bytes> { self.metadata.as_ref() }

    /// Data segment. May be empty.
    #[must_use]
    pub fn data(&self) -> &Bytes { &self.data }

    /// Whether a metadata segment is present.
    #[must_use]
    pub fn has_metadata(&self) -> bool { self.metadata.is_some() }

    /// Whether both segments are absent or empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.metadata.as_ref().is_none_or(Bytes::is_empty)
    }

    /// Append another payload's segments, used when reassembling fragments.
    pub fn append(&mut self, other: Payload) {
        if let Some(more) = other.metadata {
            self.metadata = Some(match self.metadata.take() {
                Some(existing) => concat(&existing, &more),
                None => more,
            });
        }
        if !other.data.is_empty() {
            let data = std::mem::take(&mut self.data);
            self.data = if data.is_empty() {
                other.data
            } else {
                concat(&data, &other.data)
            };
        }
    }

    /// Parse a payload from the remaining frame body.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::MetadataOverrun`] when the metadata length
    /// prefix points past the end of the body.
    pub(crate) fn decode(flags: Flags, body: &mut Bytes) -> Result<Self, FramingError> {
        let metadata = if flags.metadata() {
            if body.remaining() < METADATA_LENGTH_SIZE {
                return Err(FramingError::MetadataOverrun {
                    len: METADATA_LENGTH_SIZE,
                    body: body.remaining(),
                });
            }
            let len = get_u24(body);
            if body.remaining() < len {
                return Err(FramingError::MetadataOverrun {
                    len,
                    body: body.remaining(),
                });
            }
            Some(body.split_to(len))
        } else {
            None
        };
        Ok(Self {
            metadata,
            data: std::mem::take(body),
        })
    }

    /// Serialise this payload, returning the flags bit to merge into the
    /// header word.
    pub(crate) fn encode(&self, dst: &mut BytesMut) {
        if let Some(metadata) = &self.metadata {
            put_u24(dst, metadata.len());
            dst.extend_from_slice(metadata);
        }
        dst.extend_from_slice(&self.data);
    }

    /// Encoded length of this payload in bytes.
    pub(crate) fn encoded_len(&self) -> usize {
        let metadata = self
            .metadata
            .as_ref()
            .map_or(0, |m| METADATA_LENGTH_SIZE + m.len());
        metadata + self.data.len()
    }
}

fn concat(a: &Bytes, b: &Bytes) -> Bytes {
    let mut buf = BytesMut::with_capacity(a.len() + b.len());
    buf.extend_from_slice(a);
    buf.extend_from_slice(b);
    buf.freeze()
}

pub(crate) fn get_u24(buf: &mut Bytes) -> usize {
    let hi = usize::from(buf.get_u8());
    let mid = usize::from(buf.get_u8());
    let lo = usize::from(buf.get_u8());
    (hi << 16) | (mid << 8) | lo
}

pub(crate) fn put_u24(dst: &mut BytesMut, value: usize) {
    debug_assert!(value <= 0x00FF_FFFF, "u24 overflow: {value}");
    dst.put_u8((value >> 16) as u8);
    dst.put_u8((value >> 8) as u8);
    dst.put_u8(value as u8);
}
