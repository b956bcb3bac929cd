//! Network error types

use std::io;

use tokio_tungstenite::tungstenite;

use crate::protocol::ErrorCode;

/// Network result type
pub type Result<T> = std::result::Result<T, Error>;

/// Network errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection rejected ({code}): {message}")]
    Rejected { code: ErrorCode, message: String },

    #[error("Room closed")]
    RoomClosed,

    #[error("Not connected")]
    NotConnected,

    #[error("Invalid server URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Core(#[from] quire_core::Error),
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        Error::WebSocket(Box::new(e))
    }
}

impl Error {
    pub fn rejected(code: ErrorCode, message: impl Into<String>) -> Self {
        Error::Rejected {
            code,
            message: message.into(),
        }
    }
}
