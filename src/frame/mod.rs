//! The Rocket frame grammar: typed frames and their wire form.
//!
//! Every frame starts with a four-byte big-endian stream id followed by a
//! 16-bit word packing a 6-bit frame type and 10 bits of flags; the body
//! layout is per-type. Stream transports prefix each frame with a 24-bit
//! big-endian length handled by [`FrameCodec`].
//!
//! Decoding presents each frame as one contiguous buffer; reassembly of
//! `FOLLOWS` fragments across frames belongs to the connection, not the
//! codec.

pub mod codec;
pub mod error;
mod flags;
mod payload;

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

pub use codec::FrameCodec;
pub use error::FramingError;
pub use flags::{Flags, FrameType};
pub use payload::Payload;

use crate::error::ErrorCode;

/// Unsigned 32-bit stream identifier, unique per connection.
///
/// Zero denotes the connection itself and is used for connection-level
/// errors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u32);

impl StreamId {
    /// The connection-level pseudo stream.
    pub const CONNECTION: StreamId = StreamId(0);

    /// Wrap a raw stream id.
    #[must_use]
    pub const fn new(value: u32) -> Self { Self(value) }

    /// Raw value of this id.
    #[must_use]
    pub const fn value(self) -> u32 { self.0 }
}

impl From<u32> for StreamId {
    fn from(value: u32) -> Self { Self(value) }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.0.fmt(f) }
}

/// Mandatory first frame establishing protocol parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetupFrame {
    /// Always the connection-level stream.
    pub stream_id: StreamId,
    /// Protocol major version.
    pub version_major: u16,
    /// Protocol minor version.
    pub version_minor: u16,
    /// Keepalive interval in milliseconds.
    pub keepalive_interval: u32,
    /// Maximum connection lifetime in milliseconds.
    pub max_lifetime: u32,
    /// Opaque resume token, if the peer requested resumption.
    pub resume_token: Option<Bytes>,
    /// MIME type of metadata segments.
    pub metadata_mime_type: String,
    /// MIME type of data segments.
    pub data_mime_type: String,
    /// Optional setup payload.
    pub payload: Payload,
}

/// Request expecting exactly one response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestResponseFrame {
    /// Stream carrying the request.
    pub stream_id: StreamId,
    /// More fragments of this request will follow.
    pub follows: bool,
    /// Request payload.
    pub payload: Payload,
}

/// Fire-and-forget request expecting no response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestFnfFrame {
    /// Stream carrying the request.
    pub stream_id: StreamId,
    /// More fragments of this request will follow.
    pub follows: bool,
    /// Request payload.
    pub payload: Payload,
}

/// Request opening a response stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestStreamFrame {
    /// Stream carrying the request.
    pub stream_id: StreamId,
    /// More fragments of this request will follow.
    pub follows: bool,
    /// Demand granted before the first `REQUEST_N`.
    pub initial_request_n: u32,
    /// Request payload.
    pub payload: Payload,
}

/// Demand grant for an open stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestNFrame {
    /// Stream receiving the demand.
    pub stream_id: StreamId,
    /// Number of additional items authorised.
    pub n: u32,
}

/// Stream cancellation. Carries no body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CancelFrame {
    /// Stream being cancelled.
    pub stream_id: StreamId,
}

/// Data, continuation, or completion payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PayloadFrame {
    /// Stream carrying the payload.
    pub stream_id: StreamId,
    /// `NEXT`, `COMPLETE`, and `FOLLOWS` bits. The `METADATA` bit is
    /// derived from the payload on encode.
    pub flags: Flags,
    /// Payload body.
    pub payload: Payload,
}

impl PayloadFrame {
    /// Build a payload frame, keeping only the flag bits that belong on a
    /// PAYLOAD header.
    #[must_use]
    pub fn new(stream_id: StreamId, payload: Payload, flags: Flags) -> Self {
        Self {
            stream_id,
            flags: flags.without(Flags::METADATA),
            payload,
        }
    }
}

/// Stream- or connection-level error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorFrame {
    /// Stream the error applies to; zero for the connection.
    pub stream_id: StreamId,
    /// Error code.
    pub code: ErrorCode,
    /// UTF-8 message. May be empty.
    pub message: String,
}

/// A decoded frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// `SETUP`.
    Setup(SetupFrame),
    /// `REQUEST_RESPONSE`.
    RequestResponse(RequestResponseFrame),
    /// `REQUEST_FNF`.
    RequestFnf(RequestFnfFrame),
    /// `REQUEST_STREAM`.
    RequestStream(RequestStreamFrame),
    /// `REQUEST_N`.
    RequestN(RequestNFrame),
    /// `CANCEL`.
    Cancel(CancelFrame),
    /// `PAYLOAD`.
    Payload(PayloadFrame),
    /// `ERROR`.
    Error(ErrorFrame),
    /// A frame type the grammar reserves but the server core does not
    /// handle.
    Unsupported {
        /// The reserved frame type.
        frame_type: FrameType,
        /// Stream id from the header.
        stream_id: StreamId,
    },
}

/// Size of the frame header: stream id plus the type/flags word.
pub const FRAME_HEADER_SIZE: usize = 6;

impl Frame {
    /// Stream id from the frame header.
    #[must_use]
    pub fn stream_id(&self) -> StreamId {
        match self {
            Self::Setup(f) => f.stream_id,
            Self::RequestResponse(f) => f.stream_id,
            Self::RequestFnf(f) => f.stream_id,
            Self::RequestStream(f) => f.stream_id,
            Self::RequestN(f) => f.stream_id,
            Self::Cancel(f) => f.stream_id,
            Self::Payload(f) => f.stream_id,
            Self::Error(f) => f.stream_id,
            Self::Unsupported { stream_id, .. } => *stream_id,
        }
    }

    /// Frame type from the frame header.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::Setup(_) => FrameType::Setup,
            Self::RequestResponse(_) => FrameType::RequestResponse,
            Self::RequestFnf(_) => FrameType::RequestFnf,
            Self::RequestStream(_) => FrameType::RequestStream,
            Self::RequestN(_) => FrameType::RequestN,
            Self::Cancel(_) => FrameType::Cancel,
            Self::Payload(_) => FrameType::Payload,
            Self::Error(_) => FrameType::Error,
            Self::Unsupported { frame_type, .. } => *frame_type,
        }
    }

    /// Parse one complete frame from a contiguous buffer.
    ///
    /// # Errors
    ///
    /// Returns a [`FramingError`] on an unknown type value, a truncated
    /// header or body, a metadata overrun, or invalid UTF-8 in a text
    /// field.
    pub fn decode(mut buf: Bytes) -> Result<Self, FramingError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Err(FramingError::TruncatedHeader { len: buf.len() });
        }
        let stream_id = StreamId::new(buf.get_u32());
        let word = buf.get_u16();
        let type_value = (word >> 10) as u8;
        let flags = Flags::from_wire(word);
        let frame_type = FrameType::from_wire(type_value)
            .ok_or(FramingError::UnknownFrameType { value: type_value })?;

        match frame_type {
            FrameType::Setup => decode_setup(stream_id, flags, buf),
            FrameType::RequestResponse => {
                let payload = Payload::decode(flags, &mut buf)?;
                Ok(Self::RequestResponse(RequestResponseFrame {
                    stream_id,
                    follows: flags.follows(),
                    payload,
                }))
            }
            FrameType::RequestFnf => {
                let payload = Payload::decode(flags, &mut buf)?;
                Ok(Self::RequestFnf(RequestFnfFrame {
                    stream_id,
                    follows: flags.follows(),
                    payload,
                }))
            }
            FrameType::RequestStream => {
                let initial_request_n = take_u32(&mut buf, frame_type)?;
                let payload = Payload::decode(flags, &mut buf)?;
                Ok(Self::RequestStream(RequestStreamFrame {
                    stream_id,
                    follows: flags.follows(),
                    initial_request_n,
                    payload,
                }))
            }
            FrameType::RequestN => {
                let n = take_u32(&mut buf, frame_type)?;
                Ok(Self::RequestN(RequestNFrame { stream_id, n }))
            }
            FrameType::Cancel => Ok(Self::Cancel(CancelFrame { stream_id })),
            FrameType::Payload => {
                let payload = Payload::decode(flags, &mut buf)?;
                Ok(Self::Payload(PayloadFrame {
                    stream_id,
                    flags: flags.without(Flags::METADATA),
                    payload,
                }))
            }
            FrameType::Error => {
                let code = ErrorCode::from_wire(take_u32(&mut buf, frame_type)?);
                let message = String::from_utf8(buf.to_vec())
                    .map_err(|_| FramingError::InvalidUtf8 { field: "error message" })?;
                Ok(Self::Error(ErrorFrame {
                    stream_id,
                    code,
                    message,
                }))
            }
            _ => Ok(Self::Unsupported {
                frame_type,
                stream_id,
            }),
        }
    }

    /// Serialise this frame without the transport length prefix.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(FRAME_HEADER_SIZE + self.body_len());
        self.encode_into(&mut dst);
        dst.freeze()
    }

    pub(crate) fn encode_into(&self, dst: &mut BytesMut) {
        dst.put_u32(self.stream_id().value());
        dst.put_u16((u16::from(self.frame_type().to_wire()) << 10) | self.header_flags().bits());
        match self {
            Self::Setup(f) => encode_setup_body(f, dst),
            Self::RequestResponse(f) => f.payload.encode(dst),
            Self::RequestFnf(f) => f.payload.encode(dst),
            Self::RequestStream(f) => {
                dst.put_u32(f.initial_request_n);
                f.payload.encode(dst);
            }
            Self::RequestN(f) => dst.put_u32(f.n),
            Self::Cancel(_) | Self::Unsupported { .. } => {}
            Self::Payload(f) => f.payload.encode(dst),
            Self::Error(f) => {
                dst.put_u32(f.code.to_wire());
                dst.extend_from_slice(f.message.as_bytes());
            }
        }
    }

    pub(crate) fn body_len(&self) -> usize {
        match self {
            Self::Setup(f) => {
                let resume = f.resume_token.as_ref().map_or(0, |t| 2 + t.len());
                12 + resume
                    + 1
                    + f.metadata_mime_type.len()
                    + 1
                    + f.data_mime_type.len()
                    + f.payload.encoded_len()
            }
            Self::RequestResponse(f) => f.payload.encoded_len(),
            Self::RequestFnf(f) => f.payload.encoded_len(),
            Self::RequestStream(f) => 4 + f.payload.encoded_len(),
            Self::RequestN(_) => 4,
            Self::Cancel(_) | Self::Unsupported { .. } => 0,
            Self::Payload(f) => f.payload.encoded_len(),
            Self::Error(f) => 4 + f.message.len(),
        }
    }

    fn header_flags(&self) -> Flags {
        match self {
            Self::Setup(f) => {
                let mut flags = metadata_bit(&f.payload);
                if f.resume_token.is_some() {
                    // On SETUP the FOLLOWS bit position marks a resume token.
                    flags = flags.with(Flags::FOLLOWS);
                }
                flags
            }
            Self::RequestResponse(f) => follows_bit(f.follows).with(metadata_bit(&f.payload)),
            Self::RequestFnf(f) => follows_bit(f.follows).with(metadata_bit(&f.payload)),
            Self::RequestStream(f) => follows_bit(f.follows).with(metadata_bit(&f.payload)),
            Self::Payload(f) => f.flags.with(metadata_bit(&f.payload)),
            Self::RequestN(_) | Self::Cancel(_) | Self::Error(_) | Self::Unsupported { .. } => {
                Flags::empty()
            }
        }
    }
}

fn follows_bit(follows: bool) -> Flags {
    if follows { Flags::FOLLOWS } else { Flags::empty() }
}

fn metadata_bit(payload: &Payload) -> Flags {
    if payload.has_metadata() {
        Flags::METADATA
    } else {
        Flags::empty()
    }
}

fn take_u32(buf: &mut Bytes, frame_type: FrameType) -> Result<u32, FramingError> {
    if buf.remaining() < 4 {
        return Err(FramingError::TruncatedBody {
            frame_type,
            have: buf.remaining(),
            need: 4,
        });
    }
    Ok(buf.get_u32())
}

fn take_slice(
    buf: &mut Bytes,
    len: usize,
    frame_type: FrameType,
) -> Result<Bytes, FramingError> {
    if buf.remaining() < len {
        return Err(FramingError::TruncatedBody {
            frame_type,
            have: buf.remaining(),
            need: len,
        });
    }
    Ok(buf.split_to(len))
}

fn decode_setup(stream_id: StreamId, flags: Flags, mut buf: Bytes) -> Result<Frame, FramingError> {
    let frame_type = FrameType::Setup;
    if buf.remaining() < 12 {
        return Err(FramingError::TruncatedBody {
            frame_type,
            have: buf.remaining(),
            need: 12,
        });
    }
    let version_major = buf.get_u16();
    let version_minor = buf.get_u16();
    let keepalive_interval = buf.get_u32();
    let max_lifetime = buf.get_u32();

    // The FOLLOWS bit position marks a resume token on SETUP.
    let resume_token = if flags.follows() {
        if buf.remaining() < 2 {
            return Err(FramingError::TruncatedBody {
                frame_type,
                have: buf.remaining(),
                need: 2,
            });
        }
        let len = usize::from(buf.get_u16());
        Some(take_slice(&mut buf, len, frame_type)?)
    } else {
        None
    };

    let metadata_mime_type = decode_mime(&mut buf, "metadata MIME type")?;
    let data_mime_type = decode_mime(&mut buf, "data MIME type")?;
    let payload = Payload::decode(flags, &mut buf)?;

    Ok(Frame::Setup(SetupFrame {
        stream_id,
        version_major,
        version_minor,
        keepalive_interval,
        max_lifetime,
        resume_token,
        metadata_mime_type,
        data_mime_type,
        payload,
    }))
}

fn decode_mime(buf: &mut Bytes, field: &'static str) -> Result<String, FramingError> {
    let frame_type = FrameType::Setup;
    if buf.remaining() < 1 {
        return Err(FramingError::TruncatedBody {
            frame_type,
            have: 0,
            need: 1,
        });
    }
    let len = usize::from(buf.get_u8());
    let raw = take_slice(buf, len, frame_type)?;
    String::from_utf8(raw.to_vec()).map_err(|_| FramingError::InvalidUtf8 { field })
}

fn encode_setup_body(frame: &SetupFrame, dst: &mut BytesMut) {
    dst.put_u16(frame.version_major);
    dst.put_u16(frame.version_minor);
    dst.put_u32(frame.keepalive_interval);
    dst.put_u32(frame.max_lifetime);
    if let Some(token) = &frame.resume_token {
        debug_assert!(token.len() <= usize::from(u16::MAX));
        dst.put_u16(token.len() as u16);
        dst.extend_from_slice(token);
    }
    debug_assert!(frame.metadata_mime_type.len() <= usize::from(u8::MAX));
    dst.put_u8(frame.metadata_mime_type.len() as u8);
    dst.extend_from_slice(frame.metadata_mime_type.as_bytes());
    debug_assert!(frame.data_mime_type.len() <= usize::from(u8::MAX));
    dst.put_u8(frame.data_mime_type.len() as u8);
    dst.extend_from_slice(frame.data_mime_type.as_bytes());
    frame.payload.encode(dst);
}
