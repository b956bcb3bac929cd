//! Peer model

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::color::color_from_name;

/// Display names are cut to this many characters
pub const MAX_NAME_CHARS: usize = 64;

/// Identity of one connection within a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub Uuid);

impl PeerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A connected editing participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub id: PeerId,
    pub display_name: String,
    pub color: String,
}

impl Peer {
    /// Create a peer, falling back to `anonymous` for a blank name
    pub fn new(name: &str, anonymous: &str) -> Self {
        let display_name = normalize_name(name, anonymous);
        let color = color_from_name(&display_name).to_string();
        Self {
            id: PeerId::new(),
            display_name,
            color,
        }
    }
}

/// Trim a requested display name, substituting `anonymous` when blank
pub fn normalize_name(name: &str, anonymous: &str) -> String {
    let trimmed = name.trim();
    let chosen = if trimmed.is_empty() { anonymous } else { trimmed };
    chosen.chars().take(MAX_NAME_CHARS).collect()
}
