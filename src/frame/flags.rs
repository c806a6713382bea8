//! Frame type and flag fields of the type/flags word.
//!
//! Every frame header packs a 6-bit frame type and 10 bits of flags into one
//! 16-bit word. Unknown flag bits are ignored on receive and never set on
//! send.

use std::{fmt, ops::BitOr};

/// Frame type carried in the high 6 bits of the type/flags word.
///
/// The full Rocket table is recognised so unknown-but-reserved types decode
/// structurally; only the request, flow-control, and error types are handled
/// by the connection core. The rest close the connection with `INVALID`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Mandatory first frame establishing protocol parameters.
    Setup,
    /// Lease grant (reserved, unhandled).
    Lease,
    /// Keepalive probe (reserved, unhandled).
    Keepalive,
    /// Single request expecting a single response.
    RequestResponse,
    /// Fire-and-forget request expecting no response.
    RequestFnf,
    /// Request opening a response stream.
    RequestStream,
    /// Bidirectional channel request (reserved, unhandled).
    RequestChannel,
    /// Demand grant for an open stream.
    RequestN,
    /// Stream cancellation.
    Cancel,
    /// Data or completion payload.
    Payload,
    /// Stream- or connection-level error.
    Error,
    /// Metadata push (reserved, unhandled).
    MetadataPush,
    /// Resume request (reserved, unhandled).
    Resume,
    /// Resume acknowledgement (reserved, unhandled).
    ResumeOk,
    /// Extension frame (reserved, unhandled).
    Ext,
}

impl FrameType {
    /// Map a wire value to a frame type. `None` for values outside the
    /// reserved range.
    #[must_use]
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Setup),
            0x02 => Some(Self::Lease),
            0x03 => Some(Self::Keepalive),
            0x04 => Some(Self::RequestResponse),
            0x05 => Some(Self::RequestFnf),
            0x06 => Some(Self::RequestStream),
            0x07 => Some(Self::RequestChannel),
            0x08 => Some(Self::RequestN),
            0x09 => Some(Self::Cancel),
            0x0A => Some(Self::Payload),
            0x0B => Some(Self::Error),
            0x0C => Some(Self::MetadataPush),
            0x0D => Some(Self::Resume),
            0x0E => Some(Self::ResumeOk),
            0x3F => Some(Self::Ext),
            _ => None,
        }
    }

    /// Wire value of this frame type.
    #[must_use]
    pub fn to_wire(self) -> u8 {
        match self {
            Self::Setup => 0x01,
            Self::Lease => 0x02,
            Self::Keepalive => 0x03,
            Self::RequestResponse => 0x04,
            Self::RequestFnf => 0x05,
            Self::RequestStream => 0x06,
            Self::RequestChannel => 0x07,
            Self::RequestN => 0x08,
            Self::Cancel => 0x09,
            Self::Payload => 0x0A,
            Self::Error => 0x0B,
            Self::MetadataPush => 0x0C,
            Self::Resume => 0x0D,
            Self::ResumeOk => 0x0E,
            Self::Ext => 0x3F,
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Setup => "SETUP",
            Self::Lease => "LEASE",
            Self::Keepalive => "KEEPALIVE",
            Self::RequestResponse => "REQUEST_RESPONSE",
            Self::RequestFnf => "REQUEST_FNF",
            Self::RequestStream => "REQUEST_STREAM",
            Self::RequestChannel => "REQUEST_CHANNEL",
            Self::RequestN => "REQUEST_N",
            Self::Cancel => "CANCEL",
            Self::Payload => "PAYLOAD",
            Self::Error => "ERROR",
            Self::MetadataPush => "METADATA_PUSH",
            Self::Resume => "RESUME",
            Self::ResumeOk => "RESUME_OK",
            Self::Ext => "EXT",
        };
        f.write_str(name)
    }
}

/// Flag bits occupying the low 10 bits of the type/flags word.
///
/// Frames interpret a per-type subset of these bits; on SETUP the
/// [`Flags::FOLLOWS`] bit position doubles as the resume-token marker.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Flags(u16);

impl Flags {
    /// Payload carries a length-prefixed metadata segment.
    pub const METADATA: Flags = Flags(0x100);
    /// More fragments of this logical frame will follow.
    pub const FOLLOWS: Flags = Flags(0x080);
    /// Payload is terminal for the stream.
    pub const COMPLETE: Flags = Flags(0x040);
    /// Payload carries a data item.
    pub const NEXT: Flags = Flags(0x020);

    /// All 10 flag bits of the type/flags word.
    pub(crate) const WORD_MASK: u16 = 0x03FF;
    const KNOWN: u16 = 0x100 | 0x080 | 0x040 | 0x020;

    /// The empty flag set.
    #[must_use]
    pub const fn empty() -> Self { Self(0) }

    /// Decode flags from the low bits of the type/flags word, discarding
    /// unknown bits.
    #[must_use]
    pub fn from_wire(word: u16) -> Self { Self(word & Self::WORD_MASK & Self::KNOWN) }

    /// Raw bit representation, suitable for the wire.
    #[must_use]
    pub const fn bits(self) -> u16 { self.0 }

    /// Whether every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Flags) -> bool { self.0 & other.0 == other.0 }

    /// Whether the metadata flag is set.
    #[must_use]
    pub const fn metadata(self) -> bool { self.contains(Self::METADATA) }

    /// Whether the follows flag is set.
    #[must_use]
    pub const fn follows(self) -> bool { self.contains(Self::FOLLOWS) }

    /// Whether the complete flag is set.
    #[must_use]
    pub const fn complete(self) -> bool { self.contains(Self::COMPLETE) }

    /// Whether the next flag is set.
    #[must_use]
    pub const fn next(self) -> bool { self.contains(Self::NEXT) }

    /// This set with the bits of `other` added.
    #[must_use]
    pub const fn with(self, other: Flags) -> Self { Self(self.0 | other.0) }

    /// This set with the bits of `other` removed.
    #[must_use]
    pub const fn without(self, other: Flags) -> Self { Self(self.0 & !other.0) }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags { self.with(rhs) }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        for (bit, name) in [
            (Self::METADATA, "METADATA"),
            (Self::FOLLOWS, "FOLLOWS"),
            (Self::COMPLETE, "COMPLETE"),
            (Self::NEXT, "NEXT"),
        ] {
            if self.contains(bit) {
                set.entry(&name);
            }
        }
        set.finish()
    }
}
