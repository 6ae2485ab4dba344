//! Wire protocol between clients and the relay.
//!
//! Messages are JSON objects tagged by `type`. Snapshots travel as plain
//! JSON values and are only trusted after `normalize_session_state`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Protocol (de)serialization errors.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Messages sent to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a room
    Join { room: String },
    /// Leave current room
    Leave,
    /// Full session snapshot to merge into the room
    Sync { snapshot: Value },
}

/// Messages received from the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirm room join with the room's merged state
    Joined {
        room: String,
        peer_count: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        snapshot: Option<Value>,
    },
    /// Peer joined the room
    PeerJoined { peer_id: String },
    /// Peer left the room
    PeerLeft { peer_id: String },
    /// Merged room state after another peer synced
    Sync { from: String, snapshot: Value },
    /// Error message
    Error { message: String },
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String, SyncError> {
        serde_json::to_string(self).map_err(SyncError::Encode)
    }

    pub fn from_json(json: &str) -> Result<Self, SyncError> {
        serde_json::from_str(json).map_err(SyncError::Decode)
    }
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String, SyncError> {
        serde_json::to_string(self).map_err(SyncError::Encode)
    }

    pub fn from_json(json: &str) -> Result<Self, SyncError> {
        serde_json::from_str(json).map_err(SyncError::Decode)
    }
}

/// What handling a server message did.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Joined a room; its snapshot (if any) has been merged
    JoinedRoom { room: String, peer_count: usize },
    /// A peer joined the room
    PeerJoined { peer_id: String },
    /// A peer left the room
    PeerLeft { peer_id: String },
    /// A remote snapshot has been merged
    SyncReceived { from: String },
    /// The server reported an error
    Error { message: String },
}
