//! Wire packet format (§3, §4.1).
//!
//! Every carrier message carries exactly one `Packet`: a 34-byte fixed
//! header, an optional payload (0..=65535 bytes), and an optional 32-byte
//! auth tag. All multi-byte integers are big-endian.
//!
//! ```text
//!  0      2   3   4                              20  24  28  32  34
//!  +------+---+---+------------------------------+---+---+---+---+----------+----------------+
//!  | Magic|Ver|Flg|            SessionID          |StreamID|SeqNum |AckNum |PayloadLen|Payload...|
//!  +------+---+---+------------------------------+---+---+---+---+----------+----------------+
//! ```
//!
//! Fixed layout keeps parsing allocation-free: every field lives at a
//! constant offset, so `parse` only needs to validate lengths and copy out
//! the payload/tag slices.

use crate::error::{HtError, PacketKind, Result};

pub const MAGIC: [u8; 2] = [0x48, 0x54];
pub const VERSION: u8 = 0x01;

pub const HEADER_LEN: usize = 34;
pub const AUTH_TAG_LEN: usize = 32;
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// `StreamID` 0 is reserved for session-level control packets (§3).
pub const CONTROL_STREAM_ID: u32 = 0;

pub mod flag {
    pub const DATA: u8 = 0x01;
    pub const ACK: u8 = 0x02;
    pub const FIN: u8 = 0x04;
    pub const KEEPALIVE: u8 = 0x08;
    pub const HANDSHAKE: u8 = 0x10;
    pub const AUTH: u8 = 0x80;
}

/// 128-bit session correlation identifier (§3). Carried unchanged across
/// both carrier halves of one session; a fresh value is minted on every
/// entry-side (re)connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub [u8; 16]);

impl SessionId {
    /// Mint a new random session id (version-4-UUID semantics, §3).
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        rand::Rng::fill(&mut rand::rng(), &mut bytes);
        // Set the UUID version/variant bits so the bytes round-trip as a
        // valid v4 UUID for anyone who wants to display them that way.
        bytes[6] = (bytes[6] & 0x0f) | 0x40;
        bytes[8] = (bytes[8] & 0x3f) | 0x80;
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7], b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15]
        )
    }
}

/// A single atomic wire message (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub flags: u8,
    pub session_id: SessionId,
    pub stream_id: u32,
    pub seq_num: u32,
    pub ack_num: u32,
    pub payload: Vec<u8>,
    pub auth_tag: Option<[u8; AUTH_TAG_LEN]>,
}

impl Packet {
    pub fn new(flags: u8, session_id: SessionId, stream_id: u32, seq_num: u32, ack_num: u32) -> Self {
        Packet {
            flags,
            session_id,
            stream_id,
            seq_num,
            ack_num,
            payload: Vec::new(),
            auth_tag: None,
        }
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn is_data(&self) -> bool {
        self.flags & flag::DATA != 0
    }

    pub fn is_ack(&self) -> bool {
        self.flags & flag::ACK != 0
    }

    pub fn is_fin(&self) -> bool {
        self.flags & flag::FIN != 0
    }

    pub fn is_keepalive(&self) -> bool {
        self.flags & flag::KEEPALIVE != 0
    }

    pub fn is_handshake(&self) -> bool {
        self.flags & flag::HANDSHAKE != 0
    }

    pub fn has_auth(&self) -> bool {
        self.flags & flag::AUTH != 0
    }

    /// `StreamID == 0` marks a session-level control packet (§3).
    pub fn is_control(&self) -> bool {
        self.stream_id == CONTROL_STREAM_ID
    }

    /// Log-friendly label for a (possibly multi-flag) packet. Priority
    /// order: HANDSHAKE > FIN > KEEPALIVE > DATA > ACK (§4.1).
    pub fn kind(&self) -> PacketKind {
        if self.is_handshake() {
            PacketKind::Handshake
        } else if self.is_fin() {
            PacketKind::Fin
        } else if self.is_keepalive() {
            PacketKind::Keepalive
        } else if self.is_data() {
            PacketKind::Data
        } else if self.is_ack() {
            PacketKind::Ack
        } else {
            PacketKind::Empty
        }
    }

    /// Serialize to the exact wire image.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        if self.payload.len() > MAX_PAYLOAD_LEN {
            return Err(HtError::PayloadTooLarge(self.payload.len()));
        }

        let mut flags = self.flags;
        let has_auth = self.auth_tag.is_some();
        if has_auth {
            flags |= flag::AUTH;
        } else {
            flags &= !flag::AUTH;
        }

        let total = HEADER_LEN + self.payload.len() + if has_auth { AUTH_TAG_LEN } else { 0 };
        let mut buf = Vec::with_capacity(total);

        buf.extend_from_slice(&MAGIC);
        buf.push(VERSION);
        buf.push(flags);
        buf.extend_from_slice(&self.session_id.0);
        buf.extend_from_slice(&self.stream_id.to_be_bytes());
        buf.extend_from_slice(&self.seq_num.to_be_bytes());
        buf.extend_from_slice(&self.ack_num.to_be_bytes());
        buf.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.payload);

        if let Some(tag) = &self.auth_tag {
            buf.extend_from_slice(tag);
        }

        Ok(buf)
    }

    /// Parse a complete wire image. `AUTH` tag verification is a separate
    /// step (§4.1) — this only extracts the tag bytes when the flag is set.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(HtError::Truncated {
                need: HEADER_LEN,
                have: bytes.len(),
            });
        }

        if bytes[0..2] != MAGIC {
            return Err(HtError::InvalidMagic);
        }

        let version = bytes[2];
        if version != VERSION {
            return Err(HtError::UnsupportedVersion(version));
        }

        let flags = bytes[3];

        let mut session_bytes = [0u8; 16];
        session_bytes.copy_from_slice(&bytes[4..20]);
        let session_id = SessionId(session_bytes);

        let stream_id = u32::from_be_bytes(bytes[20..24].try_into().unwrap());
        let seq_num = u32::from_be_bytes(bytes[24..28].try_into().unwrap());
        let ack_num = u32::from_be_bytes(bytes[28..32].try_into().unwrap());
        let payload_len = u16::from_be_bytes(bytes[32..34].try_into().unwrap()) as usize;

        let has_auth = flags & flag::AUTH != 0;
        let need = HEADER_LEN + payload_len + if has_auth { AUTH_TAG_LEN } else { 0 };
        if bytes.len() < need {
            return Err(HtError::Truncated {
                need,
                have: bytes.len(),
            });
        }

        let payload = bytes[HEADER_LEN..HEADER_LEN + payload_len].to_vec();

        let auth_tag = if has_auth {
            let mut tag = [0u8; AUTH_TAG_LEN];
            tag.copy_from_slice(&bytes[HEADER_LEN + payload_len..need]);
            Some(tag)
        } else {
            None
        };

        Ok(Packet {
            flags,
            session_id,
            stream_id,
            seq_num,
            ack_num,
            payload,
            auth_tag,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(payload: Vec<u8>) -> Packet {
        Packet::new(flag::DATA, SessionId([7u8; 16]), 3, 10, 0).with_payload(payload)
    }

    #[test]
    fn round_trip() {
        let p = sample(b"hello".to_vec());
        let wire = p.serialize().unwrap();
        let parsed = Packet::parse(&wire).unwrap();
        assert_eq!(parsed, p);
    }

    #[test]
    fn header_starts_with_constants() {
        let wire = sample(Vec::new()).serialize().unwrap();
        assert_eq!(&wire[0..3], &[0x48, 0x54, 0x01]);
    }

    #[test]
    fn max_payload_succeeds_one_over_fails() {
        let ok = sample(vec![0u8; MAX_PAYLOAD_LEN]);
        assert!(ok.serialize().is_ok());

        let too_big = sample(vec![0u8; MAX_PAYLOAD_LEN + 1]);
        assert!(matches!(
            too_big.serialize(),
            Err(HtError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn invalid_magic_rejected() {
        let mut wire = sample(b"x".to_vec()).serialize().unwrap();
        wire[0] = 0x00;
        assert!(matches!(Packet::parse(&wire), Err(HtError::InvalidMagic)));
    }

    #[test]
    fn unsupported_version_rejected() {
        let mut wire = sample(b"x".to_vec()).serialize().unwrap();
        wire[2] = 0x02;
        assert!(matches!(
            Packet::parse(&wire),
            Err(HtError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn truncated_header_rejected() {
        assert!(matches!(
            Packet::parse(&[0x48, 0x54, 0x01]),
            Err(HtError::Truncated { .. })
        ));
    }

    #[test]
    fn truncated_payload_rejected() {
        let wire = sample(b"hello".to_vec()).serialize().unwrap();
        assert!(matches!(
            Packet::parse(&wire[..wire.len() - 1]),
            Err(HtError::Truncated { .. })
        ));
    }

    #[test]
    fn auth_tag_round_trips() {
        let mut p = sample(b"x".to_vec());
        p.auth_tag = Some([0xAB; AUTH_TAG_LEN]);
        let wire = p.serialize().unwrap();
        assert_eq!(wire.len(), HEADER_LEN + 1 + AUTH_TAG_LEN);
        let parsed = Packet::parse(&wire).unwrap();
        assert!(parsed.has_auth());
        assert_eq!(parsed.auth_tag, Some([0xAB; AUTH_TAG_LEN]));
    }

    #[test]
    fn zero_length_data_payload_is_legal() {
        let p = sample(Vec::new());
        let wire = p.serialize().unwrap();
        let parsed = Packet::parse(&wire).unwrap();
        assert!(parsed.is_data());
        assert!(parsed.payload.is_empty());
    }

    #[test]
    fn kind_priority_handshake_over_fin() {
        let mut p = sample(Vec::new());
        p.flags = flag::HANDSHAKE | flag::FIN | flag::DATA;
        assert_eq!(p.kind(), PacketKind::Handshake);
    }

    #[test]
    fn kind_priority_fin_over_keepalive_and_data() {
        let mut p = sample(Vec::new());
        p.flags = flag::FIN | flag::KEEPALIVE | flag::DATA;
        assert_eq!(p.kind(), PacketKind::Fin);
    }

    #[test]
    fn kind_priority_data_over_ack() {
        let mut p = sample(Vec::new());
        p.flags = flag::DATA | flag::ACK;
        assert_eq!(p.kind(), PacketKind::Data);
    }

    #[test]
    fn predicates() {
        let p = sample(Vec::new());
        assert!(p.is_data());
        assert!(!p.is_fin());
        assert!(!p.is_control());

        let ctrl = Packet::new(flag::HANDSHAKE, SessionId([1u8; 16]), CONTROL_STREAM_ID, 0, 0);
        assert!(ctrl.is_control());
        assert!(ctrl.is_handshake());
    }

    #[test]
    fn session_id_random_values_differ() {
        assert_ne!(SessionId::random(), SessionId::random());
    }
}
