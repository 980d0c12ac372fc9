use crate::error::{OverlayError, Result};
use crate::protocol::header::{HEADER_SIZE, Header, MessageKind};
use crate::protocol::message::OverlayMessage;
use crate::types::PROTOCOL_VERSION;
use rkyv::util::AlignedVec;

/// Encode an `OverlayMessage` into a framed byte buffer: `[header][rkyv payload]`.
pub fn encode_message(msg: &OverlayMessage) -> Result<Vec<u8>> {
    let payload = rkyv::to_bytes::<rkyv::rancor::Error>(msg)
        .map_err(|e| OverlayError::EncodeFailed(e.to_string()))?;

    if payload.len() > u32::MAX as usize {
        return Err(OverlayError::EncodeFailed(format!(
            "payload too large for framed header: {} bytes exceeds u32::MAX",
            payload.len()
        )));
    }

    let header = Header::new(kind_of(msg), payload.len() as u32);

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decode a framed byte buffer back into a `(Header, OverlayMessage)`.
///
/// Rejects unknown protocol versions and headers whose kind disagrees with
/// the decoded variant.
pub fn decode_message(buf: &[u8]) -> Result<(Header, OverlayMessage)> {
    if buf.len() < HEADER_SIZE {
        return Err(OverlayError::DecodeFailed(format!(
            "buffer too short: {} < {HEADER_SIZE}",
            buf.len()
        )));
    }

    let header_bytes: &[u8; HEADER_SIZE] = buf[..HEADER_SIZE]
        .try_into()
        .map_err(|_| OverlayError::DecodeFailed("header slice length mismatch".into()))?;

    let header = Header::decode(header_bytes)
        .ok_or_else(|| OverlayError::DecodeFailed("invalid header: unknown message kind".into()))?;

    if header.version != PROTOCOL_VERSION {
        return Err(OverlayError::DecodeFailed(format!(
            "unsupported protocol version {} (expected {PROTOCOL_VERSION})",
            header.version
        )));
    }

    let payload_end = HEADER_SIZE + header.payload_length as usize;
    if buf.len() < payload_end {
        return Err(OverlayError::DecodeFailed(format!(
            "buffer too short for payload: {} < {payload_end}",
            buf.len()
        )));
    }

    // The payload sits 8 bytes into the frame; rkyv validation wants it aligned.
    let mut aligned = AlignedVec::<16>::with_capacity(header.payload_length as usize);
    aligned.extend_from_slice(&buf[HEADER_SIZE..payload_end]);
    let msg = rkyv::from_bytes::<OverlayMessage, rkyv::rancor::Error>(&aligned)
        .map_err(|e| OverlayError::DecodeFailed(e.to_string()))?;

    if kind_of(&msg) != header.kind {
        return Err(OverlayError::DecodeFailed(format!(
            "header kind {:?} does not match {} payload",
            header.kind,
            msg.name()
        )));
    }

    Ok((header, msg))
}

fn kind_of(msg: &OverlayMessage) -> MessageKind {
    match msg {
        OverlayMessage::Xcast { .. } => MessageKind::Xcast,
        OverlayMessage::Forward { .. } => MessageKind::Forward,
        OverlayMessage::Contribute { .. } => MessageKind::Contribute,
        OverlayMessage::Round { .. } => MessageKind::Round,
        OverlayMessage::Release { .. } => MessageKind::Release,
    }
}
