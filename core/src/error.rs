//! Error types shared by every half-tunnel component.
//!
//! Variants map onto the failure taxonomy:
//!
//! - **Codec**: [`InvalidMagic`](Self::InvalidMagic), [`UnsupportedVersion`](Self::UnsupportedVersion),
//!   [`Truncated`](Self::Truncated), [`PayloadTooLarge`](Self::PayloadTooLarge).
//! - **Routing**: [`StreamNotFound`](Self::StreamNotFound), [`StreamClosed`](Self::StreamClosed),
//!   [`MuxClosed`](Self::MuxClosed), [`NoHandler`](Self::NoHandler).
//! - **Reassembly**: [`BufferFull`](Self::BufferFull).
//! - **Transport**: [`CarrierClosed`](Self::CarrierClosed), [`CarrierWriteError`](Self::CarrierWriteError),
//!   [`CarrierReadError`](Self::CarrierReadError), [`NoDownstream`](Self::NoDownstream).
//! - **Destination**: [`DialFailed`](Self::DialFailed), [`BadDestination`](Self::BadDestination).
use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum HtError {
    /// Packet did not start with the two-byte magic `0x48 0x54`.
    #[error("invalid packet magic")]
    InvalidMagic,

    /// Packet version byte was not `0x01`.
    #[error("unsupported packet version: {0}")]
    UnsupportedVersion(u8),

    /// Fewer bytes were available than the header/payload/tag lengths require.
    #[error("truncated packet: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    /// Payload exceeded 65535 bytes during serialization.
    #[error("payload too large: {0} bytes (max 65535)")]
    PayloadTooLarge(usize),

    /// Multiplexer has no stream with this id.
    #[error("stream not found: {0}")]
    StreamNotFound(u32),

    /// Stream exists but is already `Closed`.
    #[error("stream closed: {0}")]
    StreamClosed(u32),

    /// Multiplexer has been closed; all further operations fail.
    #[error("multiplexer closed")]
    MuxClosed,

    /// `send_packet` called before a packet handler was registered.
    #[error("no packet handler registered")]
    NoHandler,

    /// Reassembly buffer budget exceeded by an out-of-order payload.
    #[error("reassembly buffer full (budget {budget} bytes)")]
    BufferFull { budget: usize },

    /// Carrier connection is no longer usable.
    #[error("carrier closed")]
    CarrierClosed,

    /// Write to a carrier connection failed.
    #[error("carrier write error: {0}")]
    CarrierWriteError(String),

    /// Read from a carrier connection failed.
    #[error("carrier read error: {0}")]
    CarrierReadError(String),

    /// No downstream carrier is registered for a session.
    #[error("no downstream carrier registered for session")]
    NoDownstream,

    /// Destination dial failed (exit side).
    #[error("dial failed: {0}")]
    DialFailed(String),

    /// CONNECT destination encoding was malformed or used an unsupported ATYP.
    #[error("bad destination encoding: {0}")]
    BadDestination(String),

    /// Underlying I/O error, surfaced where an `HtError` is the ambient
    /// error type for a call site.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Priority order used to label a multi-flag packet in logs (§4.1):
/// HANDSHAKE > FIN > KEEPALIVE > DATA > ACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Handshake,
    Fin,
    Keepalive,
    Data,
    Ack,
    Empty,
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Handshake => "HANDSHAKE",
            Self::Fin => "FIN",
            Self::Keepalive => "KEEPALIVE",
            Self::Data => "DATA",
            Self::Ack => "ACK",
            Self::Empty => "EMPTY",
        };
        write!(f, "{s}")
    }
}

/// Convenience alias for `Result<T, HtError>`.
pub type Result<T> = std::result::Result<T, HtError>;
