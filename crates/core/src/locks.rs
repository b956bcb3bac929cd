//! Block lock table
//!
//! Maps each block to at most one owning peer. The table itself has no
//! notion of time beyond stamping `acquired_at`; idle expiry is driven by
//! the room that owns the table.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::blocks::BlockId;
use crate::error::{Error, Result};
use crate::models::{Lock, LockInfo, PeerId};

/// A request to claim a block
#[derive(Debug, Clone)]
pub struct LockRequest<'a> {
    pub block_id: BlockId,
    pub owner: PeerId,
    pub owner_name: &'a str,
    pub color: &'a str,
    pub label: &'a str,
}

/// Result of a successful claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    /// The block was free
    Granted,
    /// The requester already held the block
    Refreshed,
}

/// Lock table for one room
#[derive(Debug, Default)]
pub struct LockTable {
    locks: BTreeMap<BlockId, Lock>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim or refresh a block.
    ///
    /// Fails with [`Error::LockConflict`] when another peer owns the block;
    /// the table is left untouched in that case.
    pub fn acquire(&mut self, request: LockRequest<'_>, now: DateTime<Utc>) -> Result<Acquired> {
        match self.locks.get_mut(&request.block_id) {
            Some(lock) if lock.owner != request.owner => Err(Error::LockConflict {
                block_id: request.block_id.to_string(),
                owner: lock.owner_name.clone(),
            }),
            Some(lock) => {
                lock.acquired_at = now;
                lock.color = request.color.to_string();
                if !request.label.is_empty() {
                    lock.label = request.label.to_string();
                }
                Ok(Acquired::Refreshed)
            }
            None => {
                self.locks.insert(
                    request.block_id,
                    Lock {
                        block_id: request.block_id,
                        owner: request.owner,
                        owner_name: request.owner_name.to_string(),
                        color: request.color.to_string(),
                        label: request.label.to_string(),
                        acquired_at: now,
                    },
                );
                Ok(Acquired::Granted)
            }
        }
    }

    /// Release a block if `owner` holds it. Returns whether anything changed.
    pub fn release(&mut self, block_id: BlockId, owner: PeerId) -> bool {
        match self.locks.get(&block_id) {
            Some(lock) if lock.owner == owner => {
                self.locks.remove(&block_id);
                true
            }
            _ => false,
        }
    }

    /// Release every block held by `owner`, returning the released ids in
    /// block order
    pub fn release_all(&mut self, owner: PeerId) -> Vec<BlockId> {
        let released = self.held_by(owner);
        for block_id in &released {
            self.locks.remove(block_id);
        }
        released
    }

    /// Current lock on a block
    pub fn get(&self, block_id: BlockId) -> Option<&Lock> {
        self.locks.get(&block_id)
    }

    /// Blocks held by a peer, in block order
    pub fn held_by(&self, owner: PeerId) -> Vec<BlockId> {
        self.locks
            .values()
            .filter(|lock| lock.owner == owner)
            .map(|lock| lock.block_id)
            .collect()
    }

    pub fn holds_any(&self, owner: PeerId) -> bool {
        self.locks.values().any(|lock| lock.owner == owner)
    }

    /// Full table as sent in `locks_state`, ordered by block index
    pub fn snapshot(&self) -> Vec<LockInfo> {
        self.locks.values().map(Lock::info).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Lock> {
        self.locks.values()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
