//! Developer guardrails and invariants
//!
//! Debug assertions for detecting impossible room states during
//! development. These checks are compiled out in release builds.

use std::collections::HashSet;

use crate::locks::LockTable;
use crate::models::PeerId;

/// Every lock must belong to a peer that is still connected
pub fn assert_lock_owners_connected(locks: &LockTable, connected: &HashSet<PeerId>) {
    for lock in locks.iter() {
        debug_assert!(
            connected.contains(&lock.owner),
            "Block {} is locked by disconnected peer {}",
            lock.block_id,
            lock.owner
        );
    }
}

/// A presence list must be sorted with no duplicates
pub fn assert_presence_list(names: &[String]) {
    debug_assert!(
        names.windows(2).all(|pair| pair[0] < pair[1]),
        "Presence list is not sorted and unique: {:?}",
        names
    );
}

/// An empty room must not keep locks around
pub fn assert_empty_room_has_no_locks(peer_count: usize, locks: &LockTable) {
    debug_assert!(
        peer_count > 0 || locks.is_empty(),
        "Room has no peers but {} locks",
        locks.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::BlockId;
    use crate::locks::LockRequest;
    use chrono::Utc;

    fn locked_by(owner: PeerId) -> LockTable {
        let mut table = LockTable::new();
        table
            .acquire(
                LockRequest {
                    block_id: BlockId::new(0),
                    owner,
                    owner_name: "A",
                    color: "#ff7675",
                    label: "",
                },
                Utc::now(),
            )
            .unwrap();
        table
    }

    #[test]
    fn test_connected_owner_passes() {
        let owner = PeerId::new();
        let connected: HashSet<PeerId> = [owner].into_iter().collect();
        assert_lock_owners_connected(&locked_by(owner), &connected);
    }

    #[test]
    fn test_sorted_presence_passes() {
        assert_presence_list(&["A".to_string(), "B".to_string()]);
        assert_presence_list(&[]);
    }

    #[test]
    #[should_panic(expected = "not sorted")]
    fn test_duplicate_presence_panics() {
        assert_presence_list(&["A".to_string(), "A".to_string()]);
    }

    #[test]
    #[should_panic(expected = "no peers")]
    fn test_empty_room_with_locks_panics() {
        assert_empty_room_has_no_locks(0, &locked_by(PeerId::new()));
    }
}
