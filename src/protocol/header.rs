use crate::types::PROTOCOL_VERSION;

/// Size of the wire header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Kind of the message that follows the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    Xcast = 0,
    Forward = 1,
    Contribute = 2,
    Round = 3,
    Release = 4,
}

impl MessageKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(MessageKind::Xcast),
            1 => Some(MessageKind::Forward),
            2 => Some(MessageKind::Contribute),
            3 => Some(MessageKind::Round),
            4 => Some(MessageKind::Release),
            _ => None,
        }
    }
}

/// 8-byte wire header prepended to every encoded message.
///
/// ```text
/// [0..4] payload_length: u32 LE
/// [4]    version: u8
/// [5]    kind: u8
/// [6..8] reserved: u16 (must be 0)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub payload_length: u32,
    pub version: u8,
    pub kind: MessageKind,
}

impl Header {
    pub fn new(kind: MessageKind, payload_length: u32) -> Self {
        Self {
            payload_length,
            version: PROTOCOL_VERSION,
            kind,
        }
    }

    /// Encode header to 8 bytes (little-endian).
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.payload_length.to_le_bytes());
        buf[4] = self.version;
        buf[5] = self.kind as u8;
        buf
    }

    /// Decode header from 8 bytes.
    ///
    /// Returns `None` if the kind byte is invalid.
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Option<Self> {
        let payload_length = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let kind = MessageKind::from_u8(buf[5])?;
        Some(Header {
            payload_length,
            version: buf[4],
            kind,
        })
    }
}
