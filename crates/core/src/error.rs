//! Error types for Quire Core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Invalid block id: {0}")]
    InvalidBlock(String),

    #[error("Block {block_id} is locked by {owner}")]
    LockConflict { block_id: String, owner: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Failed to write TOML: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
