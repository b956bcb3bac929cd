//! Network protocol message types
//!
//! Every message is one JSON object per WebSocket text frame, tagged by a
//! `type` field. Field names follow the editor plugin (`blockId`).

use std::fmt;

use quire_core::{BlockId, LockInfo};
use serde::{Deserialize, Serialize};

/// Machine-readable code carried by `error` frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// `room` query parameter missing or blank
    MissingRoom,
    /// `password` query parameter missing or blank
    MissingPassword,
    /// Password does not match the room's password
    AuthFailed,
    /// Room is at capacity
    RoomFull,
    /// Frame could not be parsed
    BadMessage,
    /// Block id is not of the form `b_<index>`
    InvalidBlock,
    /// Frame exceeded the size limit; the connection is closed
    MessageTooLarge,
    /// The room could not be reached
    Unavailable,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::MissingRoom => "missing_room",
            ErrorCode::MissingPassword => "missing_password",
            ErrorCode::AuthFailed => "auth_failed",
            ErrorCode::RoomFull => "room_full",
            ErrorCode::BadMessage => "bad_message",
            ErrorCode::InvalidBlock => "invalid_block",
            ErrorCode::MessageTooLarge => "message_too_large",
            ErrorCode::Unavailable => "unavailable",
        }
    }
}

impl ErrorCode {
    /// Codes after which the server closes the connection
    pub fn is_fatal(self) -> bool {
        !matches!(self, ErrorCode::BadMessage | ErrorCode::InvalidBlock)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Messages sent by an editor to the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Initial local content, sent once after connecting
    Join {
        #[serde(default)]
        content: String,
    },

    /// Full-document replacement
    Update { content: String },

    /// Claim a block for editing
    Lock {
        #[serde(rename = "blockId")]
        block_id: String,
        #[serde(default)]
        label: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<String>,
    },

    /// Release a claimed block
    Unlock {
        #[serde(rename = "blockId")]
        block_id: String,
    },

    /// Leave the room (same as closing the connection)
    Leave,
}

/// Messages sent by the server to an editor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authoritative document, replaces the editor's content
    Snapshot { content: String },

    /// Document replaced by another peer
    Update { content: String },

    /// The recipient's claim was released after inactivity
    Unlock {
        #[serde(rename = "blockId")]
        block_id: BlockId,
    },

    /// Claim rejected, `name` owns the block
    LockError {
        #[serde(rename = "blockId")]
        block_id: BlockId,
        name: String,
    },

    /// Full lock table
    LocksState { locks: Vec<LockInfo> },

    /// Sorted display names of everyone in the room
    Peers { peers: Vec<String> },

    /// Protocol error
    Error { code: ErrorCode, message: String },
}

impl ServerMessage {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code,
            message: message.into(),
        }
    }

    /// Frame type as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Snapshot { .. } => "snapshot",
            ServerMessage::Update { .. } => "update",
            ServerMessage::Unlock { .. } => "unlock",
            ServerMessage::LockError { .. } => "lock_error",
            ServerMessage::LocksState { .. } => "locks_state",
            ServerMessage::Peers { .. } => "peers",
            ServerMessage::Error { .. } => "error",
        }
    }
}

impl ClientMessage {
    /// Serialize message to JSON text
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize message from JSON text
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
