//! Quire Core Library
//!
//! Transport-free domain for collaborative markdown rooms: positional
//! blocks, peer colors, the block lock table, room password hashing and
//! server configuration.

pub mod auth;
pub mod blocks;
pub mod color;
pub mod config;
pub mod error;
pub mod invariants;
pub mod locks;
pub mod models;

pub use auth::HashCost;
pub use blocks::{BlockId, BlockInfo, BlockRange};
pub use color::color_from_name;
pub use config::ServerConfig;
pub use error::{Error, Result};
pub use locks::{Acquired, LockRequest, LockTable};
pub use models::*;
