//! Fixed-header binary framing shared by the control and data channels
//!
//! Every message on either channel is one frame: a 16 byte header made of four
//! little-endian `u32` fields followed by `payload_len` payload bytes.
//!
//! ```text
//! magic | type | auth_id | payload_len | payload[payload_len]
//! ```
//!
//! The header is validated before anything looks at the payload. Unknown
//! `type` values are carried through untouched so callers can ignore them.

use crate::{PacketType, HEADER_SIZE, MAGIC, MAX_PAYLOAD_LEN};

/// Reasons a byte sequence is not a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MalformedFrame {
    #[error("{0} bytes is shorter than the 16 byte header")]
    TruncatedHeader(usize),
    #[error("magic number {0:#010x} does not match")]
    BadMagic(u32),
    #[error("declared payload of {declared} bytes but {available} bytes follow the header")]
    LengthMismatch { declared: usize, available: usize },
    #[error("declared payload of {0} bytes exceeds the frame size limit")]
    Oversized(usize),
}

/// One decoded frame
///
/// `kind` stays a raw `u32` so frames of types this build does not know about
/// survive decoding; use [`Frame::packet_type`] for the typed view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: u32,
    pub auth_id: u32,
    pub payload: Vec<u8>,
}

struct Header {
    magic: u32,
    kind: u32,
    auth_id: u32,
    payload_len: u32,
}

impl Header {
    fn parse(bytes: &[u8]) -> Result<Self, MalformedFrame> {
        if bytes.len() < HEADER_SIZE {
            return Err(MalformedFrame::TruncatedHeader(bytes.len()));
        }

        let field = |index: usize| {
            let start = index * 4;
            u32::from_le_bytes([
                bytes[start],
                bytes[start + 1],
                bytes[start + 2],
                bytes[start + 3],
            ])
        };

        let header = Header {
            magic: field(0),
            kind: field(1),
            auth_id: field(2),
            payload_len: field(3),
        };

        if header.magic != MAGIC {
            return Err(MalformedFrame::BadMagic(header.magic));
        }

        if header.payload_len as usize > MAX_PAYLOAD_LEN {
            return Err(MalformedFrame::Oversized(header.payload_len as usize));
        }

        Ok(header)
    }
}

impl Frame {
    pub fn new(kind: PacketType, auth_id: u32, payload: Vec<u8>) -> Self {
        Self {
            kind: kind as u32,
            auth_id,
            payload,
        }
    }

    /// Returns the typed packet kind, or None for types unknown to this build
    pub fn packet_type(&self) -> Option<PacketType> {
        PacketType::from_u32(self.kind)
    }

    /// Serializes header and payload into one contiguous buffer
    pub fn encode(&self) -> Vec<u8> {
        encode(self.kind, self.auth_id, &self.payload)
    }

    /// Parses exactly one frame occupying the whole of `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Self, MalformedFrame> {
        let header = Header::parse(bytes)?;
        let declared = header.payload_len as usize;
        let available = bytes.len() - HEADER_SIZE;

        if declared != available {
            return Err(MalformedFrame::LengthMismatch {
                declared,
                available,
            });
        }

        Ok(Self {
            kind: header.kind,
            auth_id: header.auth_id,
            payload: bytes[HEADER_SIZE..].to_vec(),
        })
    }

    /// Pulls the next complete frame off the front of a stream buffer
    ///
    /// Returns `Ok(None)` while the buffer still holds less than one whole
    /// frame. Consumed bytes are drained from `buffer`. A bad header is
    /// reported as soon as the first 16 bytes are present, since a stream with
    /// a corrupt header cannot be resynchronised.
    pub fn take_from(buffer: &mut Vec<u8>) -> Result<Option<Self>, MalformedFrame> {
        if buffer.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header = Header::parse(buffer.as_slice())?;
        let total = HEADER_SIZE + header.payload_len as usize;
        if buffer.len() < total {
            return Ok(None);
        }

        let payload = buffer[HEADER_SIZE..total].to_vec();
        buffer.drain(..total);

        Ok(Some(Self {
            kind: header.kind,
            auth_id: header.auth_id,
            payload,
        }))
    }
}

/// Builds the wire bytes for a frame of any type, known or not
pub fn encode(kind: u32, auth_id: u32, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
    bytes.extend_from_slice(&MAGIC.to_le_bytes());
    bytes.extend_from_slice(&kind.to_le_bytes());
    bytes.extend_from_slice(&auth_id.to_le_bytes());
    bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

/// Parses one frame; see [`Frame::decode`]
pub fn decode(bytes: &[u8]) -> Result<Frame, MalformedFrame> {
    Frame::decode(bytes)
}
