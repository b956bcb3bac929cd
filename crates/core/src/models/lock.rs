//! Block lock model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::blocks::BlockId;
use crate::models::PeerId;

/// An exclusive claim on one block, held by one peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lock {
    pub block_id: BlockId,
    pub owner: PeerId,
    pub owner_name: String,
    pub color: String,
    pub label: String,
    pub acquired_at: DateTime<Utc>,
}

impl Lock {
    /// Wire view of this lock
    pub fn info(&self) -> LockInfo {
        LockInfo {
            block_id: self.block_id,
            name: self.owner_name.clone(),
            color: self.color.clone(),
            label: self.label.clone(),
        }
    }
}

/// Lock as listed in a `locks_state` frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    pub block_id: BlockId,
    pub name: String,
    pub color: String,
    pub label: String,
}
