//! Wire protocol shared by the session server and its clients
//!
//! Frames are described in [`frame`]; this module adds the packet type table,
//! the fixed payload layouts and the snapshot body carried by `INITIAL_DATA`
//! and `SYNC`.

pub mod frame;

pub use frame::{decode, encode, Frame, MalformedFrame};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MAGIC: u32 = 0xDEAD_BEEF;
pub const HEADER_SIZE: usize = 16;
pub const NAME_LEN: usize = 16;
/// Upper bound on a declared payload, keeps a hostile header from forcing a huge buffer
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024;
/// Largest payload a single UDP datagram can carry over IPv4
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Bincode length prefix of an encoded snapshot
const SNAPSHOT_PREFIX_LEN: usize = 8;
/// Bincode width of one snapshot entry: session id plus two `f64`
pub const SNAPSHOT_ENTRY_LEN: usize = 4 + 8 + 8;
/// Most sessions a `SYNC` frame can describe and still fit in one datagram
pub const MAX_SNAPSHOT_ENTRIES: usize =
    (MAX_DATAGRAM_SIZE - HEADER_SIZE - SNAPSHOT_PREFIX_LEN) / SNAPSHOT_ENTRY_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PacketType {
    JoinRequest = 1,
    JoinResponse = 2,
    MapData = 3,
    Disconnect = 4,
    Move = 5,
    InitialData = 6,
    Sync = 7,
    SyncEntities = 8,
}

impl PacketType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::JoinRequest),
            2 => Some(Self::JoinResponse),
            3 => Some(Self::MapData),
            4 => Some(Self::Disconnect),
            5 => Some(Self::Move),
            6 => Some(Self::InitialData),
            7 => Some(Self::Sync),
            8 => Some(Self::SyncEntities),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DisconnectReason {
    Expected = 1,
    Unexpected = 2,
}

impl DisconnectReason {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Expected),
            2 => Some(Self::Unexpected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Positions of active sessions keyed by their public session id
pub type Snapshot = BTreeMap<u32, Position>;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] MalformedFrame),
    #[error("{kind:?} payload must be {expected} bytes, got {actual}")]
    MalformedPayload {
        kind: PacketType,
        expected: usize,
        actual: usize,
    },
    #[error("snapshot serialization failed: {0}")]
    Serialization(#[from] bincode::Error),
}

/// Typed view of a frame payload
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    JoinRequest {
        name: [u8; NAME_LEN],
    },
    JoinResponse {
        session_id: u32,
    },
    MapData {
        tiles: Vec<u8>,
    },
    Disconnect {
        reason: u32,
    },
    Move {
        session_id: u32,
        x: u32,
        y: u32,
    },
    InitialData {
        positions: Snapshot,
    },
    Sync {
        positions: Snapshot,
    },
    SyncEntities {
        data: Vec<u8>,
    },
}

impl Packet {
    pub fn join_request(name: &str) -> Self {
        Packet::JoinRequest {
            name: encode_name(name),
        }
    }

    pub fn disconnect(reason: DisconnectReason) -> Self {
        Packet::Disconnect {
            reason: reason as u32,
        }
    }

    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::JoinRequest { .. } => PacketType::JoinRequest,
            Packet::JoinResponse { .. } => PacketType::JoinResponse,
            Packet::MapData { .. } => PacketType::MapData,
            Packet::Disconnect { .. } => PacketType::Disconnect,
            Packet::Move { .. } => PacketType::Move,
            Packet::InitialData { .. } => PacketType::InitialData,
            Packet::Sync { .. } => PacketType::Sync,
            Packet::SyncEntities { .. } => PacketType::SyncEntities,
        }
    }

    /// Serializes the payload in the fixed layout of this packet's type
    pub fn payload(&self) -> Result<Vec<u8>, CodecError> {
        let bytes = match self {
            Packet::JoinRequest { name } => name.to_vec(),
            Packet::JoinResponse { session_id } => session_id.to_le_bytes().to_vec(),
            Packet::MapData { tiles } => tiles.clone(),
            Packet::Disconnect { reason } => reason.to_le_bytes().to_vec(),
            Packet::Move { session_id, x, y } => [*session_id, *x, *y]
                .iter()
                .flat_map(|value| value.to_le_bytes())
                .collect(),
            Packet::InitialData { positions } | Packet::Sync { positions } => {
                bincode::serialize(positions)?
            }
            Packet::SyncEntities { data } => data.clone(),
        };
        Ok(bytes)
    }

    /// Fails with [`MalformedFrame::Oversized`] rather than build a frame peers would reject
    pub fn to_frame(&self, auth_id: u32) -> Result<Frame, CodecError> {
        let payload = self.payload()?;
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(MalformedFrame::Oversized(payload.len()).into());
        }
        Ok(Frame::new(self.packet_type(), auth_id, payload))
    }

    /// Encodes straight to wire bytes
    pub fn encode(&self, auth_id: u32) -> Result<Vec<u8>, CodecError> {
        Ok(self.to_frame(auth_id)?.encode())
    }

    /// Interprets a frame's payload according to its type
    ///
    /// Returns `Ok(None)` for types this build does not know, leaving the
    /// decision to ignore them with the caller.
    pub fn from_frame(frame: &Frame) -> Result<Option<Self>, CodecError> {
        let Some(kind) = frame.packet_type() else {
            return Ok(None);
        };
        let payload = frame.payload.as_slice();

        let packet = match kind {
            PacketType::JoinRequest => Packet::JoinRequest {
                name: fixed::<NAME_LEN>(kind, payload)?,
            },
            PacketType::JoinResponse => Packet::JoinResponse {
                session_id: u32::from_le_bytes(fixed::<4>(kind, payload)?),
            },
            PacketType::MapData => Packet::MapData {
                tiles: payload.to_vec(),
            },
            PacketType::Disconnect => Packet::Disconnect {
                reason: u32::from_le_bytes(fixed::<4>(kind, payload)?),
            },
            PacketType::Move => {
                let raw = fixed::<12>(kind, payload)?;
                let word = |i: usize| {
                    u32::from_le_bytes([raw[i * 4], raw[i * 4 + 1], raw[i * 4 + 2], raw[i * 4 + 3]])
                };
                Packet::Move {
                    session_id: word(0),
                    x: word(1),
                    y: word(2),
                }
            }
            PacketType::InitialData => Packet::InitialData {
                positions: bincode::deserialize(payload)?,
            },
            PacketType::Sync => Packet::Sync {
                positions: bincode::deserialize(payload)?,
            },
            PacketType::SyncEntities => Packet::SyncEntities {
                data: payload.to_vec(),
            },
        };

        Ok(Some(packet))
    }
}

fn fixed<const N: usize>(kind: PacketType, payload: &[u8]) -> Result<[u8; N], CodecError> {
    payload
        .try_into()
        .map_err(|_| CodecError::MalformedPayload {
            kind,
            expected: N,
            actual: payload.len(),
        })
}

/// NUL-pads a display name into the fixed join-request field, truncating past 16 bytes
pub fn encode_name(name: &str) -> [u8; NAME_LEN] {
    let mut field = [0u8; NAME_LEN];
    let len = name.len().min(NAME_LEN);
    field[..len].copy_from_slice(&name.as_bytes()[..len]);
    field
}

pub fn decode_name(field: &[u8; NAME_LEN]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
    String::from_utf8_lossy(&field[..end]).into_owned()
}
