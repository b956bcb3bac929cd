//! Server configuration
//!
//! Loaded from a TOML file. Every field has a default, so an empty file
//! (or no file at all) yields a working server.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::HashCost;
use crate::error::{Error, Result};

/// Default listen address
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3456";

/// Default idle period before a peer's locks are released
pub const DEFAULT_LOCK_IDLE_TIMEOUT_MS: u64 = 2000;

/// Default maximum frame size (1MB)
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// Room server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the WebSocket listener to
    pub bind_addr: String,
    /// Idle period after which a peer's locks are released
    pub lock_idle_timeout_ms: u64,
    /// Maximum connected peers per room
    pub max_peers_per_room: usize,
    /// Outbound frames buffered per peer before new frames are dropped
    pub outbound_queue_capacity: usize,
    /// Largest accepted frame in bytes
    pub max_message_bytes: usize,
    /// Display name given to peers that do not supply one
    pub anonymous_name: String,
    /// Argon2 memory cost for room passwords
    pub password_memory_kib: u32,
    /// Argon2 iteration count for room passwords
    pub password_iterations: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let cost = HashCost::default();
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            lock_idle_timeout_ms: DEFAULT_LOCK_IDLE_TIMEOUT_MS,
            max_peers_per_room: 32,
            outbound_queue_capacity: 256,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            anonymous_name: "Anonymous".to_string(),
            password_memory_kib: cost.memory_kib,
            password_iterations: cost.iterations,
        }
    }
}

impl ServerConfig {
    /// Parse configuration from TOML content
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: ServerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        debug!(path = %path.display(), "Loaded server config");
        Ok(config)
    }

    /// Reject values the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.bind_addr.trim().is_empty() {
            return Err(Error::Config("bind_addr must not be empty".into()));
        }
        if self.lock_idle_timeout_ms == 0 {
            return Err(Error::Config("lock_idle_timeout_ms must be positive".into()));
        }
        if self.max_peers_per_room == 0 {
            return Err(Error::Config("max_peers_per_room must be positive".into()));
        }
        if self.outbound_queue_capacity == 0 {
            return Err(Error::Config(
                "outbound_queue_capacity must be positive".into(),
            ));
        }
        if self.max_message_bytes == 0 {
            return Err(Error::Config("max_message_bytes must be positive".into()));
        }
        if self.anonymous_name.trim().is_empty() {
            return Err(Error::Config("anonymous_name must not be empty".into()));
        }
        self.hash_cost().validate()?;
        Ok(())
    }

    pub fn lock_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_idle_timeout_ms)
    }

    pub fn hash_cost(&self) -> HashCost {
        HashCost {
            memory_kib: self.password_memory_kib,
            iterations: self.password_iterations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ServerConfig::from_toml("").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.lock_idle_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_partial_config() {
        let config = ServerConfig::from_toml(
            r#"
bind_addr = "127.0.0.1:9000"
lock_idle_timeout_ms = 500
anonymous_name = "Guest"
"#,
        )
        .unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.lock_idle_timeout_ms, 500);
        assert_eq!(config.anonymous_name, "Guest");
        assert_eq!(config.max_peers_per_room, 32);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            ServerConfig::from_toml("lock_idle_timeout_ms = 0"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            ServerConfig::from_toml("anonymous_name = \"  \""),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            ServerConfig::from_toml("max_peers_per_room = \"many\""),
            Err(Error::TomlDe(_))
        ));
    }

    #[test]
    fn test_bad_password_cost_rejected() {
        let config = ServerConfig {
            password_memory_kib: 1,
            ..ServerConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
        assert!(matches!(
            ServerConfig::from_toml("password_iterations = 0"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_peers_per_room = 4").unwrap();
        let config = ServerConfig::load(file.path()).unwrap();
        assert_eq!(config.max_peers_per_room, 4);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ServerConfig::load(&dir.path().join("nope.toml"));
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
