//! Network message types for peer-to-peer communication.
//!
//! Field-level wire encoding is owned by the serializer; these types only
//! describe what travels between peers.

use chainwire_types::{ObjectId, PeerAddress};
use serde::{Deserialize, Serialize};

/// All messages exchanged between peers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    // Handshake
    Version(VersionMessage),
    VerAck,

    // Keepalive
    Ping { nonce: u64 },
    Pong { nonce: u64 },

    // Discovery
    GetAddr,
    Addr(Vec<PeerAddress>),

    // Inventory
    Inv(Vec<InventoryItem>),
    GetData(Vec<InventoryItem>),

    // Objects
    Object(ObjectMessage),
    ObjectChunk(ObjectChunkMessage),

    Reject(RejectMessage),
}

impl Message {
    /// Short command name, used for logging and metrics labels.
    pub fn command(&self) -> &'static str {
        match self {
            Self::Version(_) => "version",
            Self::VerAck => "verack",
            Self::Ping { .. } => "ping",
            Self::Pong { .. } => "pong",
            Self::GetAddr => "getaddr",
            Self::Addr(_) => "addr",
            Self::Inv(_) => "inv",
            Self::GetData(_) => "getdata",
            Self::Object(_) => "object",
            Self::ObjectChunk(_) => "objectchunk",
            Self::Reject(_) => "reject",
        }
    }
}

/// Version handshake payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMessage {
    pub protocol_version: u32,
    pub services: u64,
    pub timestamp: u64,
    pub receiver: PeerAddress,
    pub user_agent: String,
    pub start_height: u32,
}

/// Kind of object an inventory entry or object message refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Transaction,
    Block,
}

/// One inventory entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub kind: ObjectKind,
    pub id: ObjectId,
}

/// A complete object small enough to travel in one message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMessage {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub payload: Vec<u8>,
}

/// One ordered slice of a big object.
///
/// `total_len` is the declared length of the whole object in bytes and is
/// repeated on every chunk so the receiver can validate progress. `last`
/// marks the final chunk explicitly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectChunkMessage {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub ordinal: u32,
    pub total_len: u64,
    pub last: bool,
    pub payload: Vec<u8>,
}

/// Rejection notice for a previous message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectMessage {
    pub command: String,
    pub reason: String,
}
