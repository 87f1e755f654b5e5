//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! All messages are serialized as JSON for debugging ease,
//! with optional binary (bincode) for input records.

use serde::{Serialize, Deserialize};

use crate::game::diff::{EntitySnapshot, TickDiff, WorldSnapshot};
use crate::game::entity::EntityId;
use crate::game::input::{Control, InputRecord};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join the map; the server spawns a player-controlled entity.
    Join {
        /// Display name, logged only
        #[serde(default)]
        name: String,
    },

    /// One captured input record.
    Input {
        /// Client frame number
        frame: u64,
        /// Control pressed
        input: Control,
    },

    /// Request a fresh `Welcome` snapshot (after a checksum mismatch).
    SyncRequest,

    /// Leave the map; the entity is removed.
    Leave,

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back
        timestamp: u64,
    },
}

impl ClientMessage {
    /// Input message for a record.
    pub fn input(record: InputRecord) -> Self {
        ClientMessage::Input { frame: record.frame, input: record.input }
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Join accepted.
    Welcome {
        /// The client's entity
        entity_id: EntityId,
        /// Full map state
        snapshot: WorldSnapshot,
    },

    /// Changes of one tick.
    Tick {
        /// Partial diff
        diff: TickDiff,
    },

    /// Highest input frame processed for the client's entity.
    InputAck {
        /// Watermark
        frame: u64,
    },

    /// Another client joined.
    EntityJoined {
        /// Its entity
        snapshot: EntitySnapshot,
    },

    /// An entity left the map.
    EntityRemoved {
        /// Removed id
        entity_id: EntityId,
    },

    /// Pong response.
    Pong {
        /// Client timestamp
        timestamp: u64,
        /// Server tick at reply time
        server_tick: u64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Reason
        reason: String,
    },
}

/// Error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

impl ServerError {
    /// Build an error message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> ServerMessage {
        ServerMessage::Error(Self { code, message: message.into() })
    }
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Message could not be parsed
    InvalidMessage,
    /// Input sent before joining
    NotJoined,
    /// Second join on the same connection
    AlreadyJoined,
    /// Map session is full
    ServerFull,
    /// Map session is gone
    MapClosed,
    /// Unexpected server error
    InternalError,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl InputRecord {
    /// Serialize to binary (bincode). Tagged message enums stay JSON.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary (bincode).
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}
