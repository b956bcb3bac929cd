//! Room registry
//!
//! Maps room codes to running rooms. The first connection for a code
//! creates the room and sets its password; later connections must present
//! the same password.

use std::collections::HashMap;
use std::sync::Arc;

use quire_core::{auth, ServerConfig};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::ErrorCode;
use crate::room::{self, RoomHandle, RoomMap, RoomSnapshot};

/// Aggregate numbers across all rooms
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub rooms: usize,
    pub peers: usize,
}

/// All live rooms of one server
pub struct RoomRegistry {
    rooms: RoomMap,
    config: Arc<ServerConfig>,
}

impl RoomRegistry {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            rooms: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Find the room for `code`, creating it if needed, and check the
    /// password against it.
    ///
    /// Hashing and verification run on the blocking pool, outside the
    /// registry lock.
    pub async fn resolve(&self, code: &str, password: &str) -> Result<RoomHandle> {
        let existing = live(&*self.rooms.lock().await, code);
        if let Some(existing) = existing {
            self.check_password(&existing, password).await?;
            return Ok(existing);
        }

        let hash = {
            let password = password.to_string();
            let cost = self.config.hash_cost();
            tokio::task::spawn_blocking(move || auth::hash_password(&password, cost)).await??
        };

        let mut rooms = self.rooms.lock().await;
        if let Some(existing) = live(&rooms, code) {
            // Another connection created the room while we were hashing
            drop(rooms);
            self.check_password(&existing, password).await?;
            return Ok(existing);
        }

        let handle = room::spawn(code, hash, &self.config, self.rooms.clone());
        rooms.insert(code.to_string(), handle.clone());
        info!(room = %code, id = %handle.id(), total = rooms.len(), "Room created");
        Ok(handle)
    }

    async fn check_password(&self, room: &RoomHandle, password: &str) -> Result<()> {
        let password = password.to_string();
        let stored = room.password_hash().to_string();
        let verified =
            tokio::task::spawn_blocking(move || auth::verify_password(&password, &stored)).await?;

        verified.map_err(|e| {
            warn!(room = %room.code(), error = %e, "Room password mismatch");
            Error::rejected(ErrorCode::AuthFailed, "Invalid room password")
        })
    }

    /// Room registered under `code`, including one that is shutting down
    pub async fn get(&self, code: &str) -> Option<RoomHandle> {
        self.rooms.lock().await.get(code).cloned()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.len()
    }

    /// Current state of one room
    pub async fn snapshot(&self, code: &str) -> Option<RoomSnapshot> {
        let room = self.get(code).await?;
        room.snapshot().await.ok()
    }

    pub async fn stats(&self) -> RegistryStats {
        let handles: Vec<RoomHandle> = self.rooms.lock().await.values().cloned().collect();

        let mut stats = RegistryStats::default();
        for room in handles {
            match room.snapshot().await {
                Ok(snapshot) => {
                    stats.rooms += 1;
                    stats.peers += snapshot.peer_count;
                }
                Err(_) => debug!(room = %room.code(), "Room closed while collecting stats"),
            }
        }
        stats
    }
}

/// Room under `code` that still accepts peers. A retiring room is left
/// in the map until its task removes it, but a new room may replace it.
fn live(rooms: &HashMap<String, RoomHandle>, code: &str) -> Option<RoomHandle> {
    rooms
        .get(code)
        .filter(|room| !room.is_retiring())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::outbound_channel;
    use crate::room::AttachOutcome;
    use quire_core::Peer;

    fn cheap_config() -> ServerConfig {
        ServerConfig {
            password_memory_kib: 64,
            password_iterations: 1,
            ..ServerConfig::default()
        }
    }

    fn registry() -> RoomRegistry {
        RoomRegistry::new(Arc::new(cheap_config()))
    }

    #[tokio::test]
    async fn test_first_resolve_creates_room() {
        let registry = registry();
        let room = registry.resolve("R1", "p").await.unwrap();

        assert_eq!(room.code(), "R1");
        assert!(room.password_hash().starts_with("$argon2id$"));
        assert_eq!(registry.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_same_password_reaches_same_room() {
        let registry = registry();
        let first = registry.resolve("R1", "p").await.unwrap();
        let second = registry.resolve("R1", "p").await.unwrap();
        assert_eq!(first.id(), second.id());
    }

    #[tokio::test]
    async fn test_wrong_password_rejected() {
        let registry = registry();
        registry.resolve("R1", "p").await.unwrap();

        let err = registry.resolve("R1", "q").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Rejected {
                code: ErrorCode::AuthFailed,
                ..
            }
        ));
        assert_eq!(registry.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_retiring_room_is_replaced() {
        let registry = registry();
        let old = registry.resolve("R1", "old").await.unwrap();
        let peer = Peer::new("A", "Anonymous");
        let peer_id = peer.id;
        let (tx, _rx) = outbound_channel(8);
        assert_eq!(old.attach(peer, tx).await, AttachOutcome::Attached);

        // Keep the emptied room in the map while it retires
        let guard = registry.rooms.lock().await;
        old.leave(peer_id).await.unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !old.is_retiring() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(guard.contains_key("R1"));
        assert!(live(&guard, "R1").is_none());
        drop(guard);

        // The code is free: a new password creates a new room
        let fresh = registry.resolve("R1", "new").await.unwrap();
        assert_ne!(fresh.id(), old.id());
        assert!(!fresh.is_retiring());
        assert_eq!(registry.get("R1").await.map(|r| r.id()), Some(fresh.id()));
    }

    #[tokio::test]
    async fn test_rooms_are_independent() {
        let registry = registry();
        let a = registry.resolve("alpha", "1").await.unwrap();
        let b = registry.resolve("beta", "2").await.unwrap();
        assert_ne!(a.id(), b.id());
        assert!(registry.resolve("beta", "1").await.is_err());
    }

    #[tokio::test]
    async fn test_stats_count_peers() {
        let registry = registry();
        let room = registry.resolve("R1", "p").await.unwrap();
        let (tx, _rx) = outbound_channel(8);
        assert_eq!(
            room.attach(Peer::new("A", "Anonymous"), tx).await,
            AttachOutcome::Attached
        );

        let stats = registry.stats().await;
        assert_eq!(stats, RegistryStats { rooms: 1, peers: 1 });

        let snap = registry.snapshot("R1").await.unwrap();
        assert_eq!(snap.peers, vec!["A".to_string()]);
        assert!(registry.snapshot("missing").await.is_none());
    }
}
