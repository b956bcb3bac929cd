//! Data models for Quire

mod lock;
mod peer;

pub use lock::*;
pub use peer::*;
