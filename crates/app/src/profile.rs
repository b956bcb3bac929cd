//! Saved client connection profile
//!
//! The last-used server, room and credentials are kept as TOML in the
//! platform config directory so `quire join` can be re-run without
//! repeating every flag.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use quire_core::config::DEFAULT_MAX_MESSAGE_BYTES;
use quire_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Lower bound for the file sync interval
pub const MIN_SYNC_INTERVAL_MS: u64 = 300;

const DEFAULT_SYNC_INTERVAL_MS: u64 = 1000;

const PROFILE_FILE: &str = "profile.toml";

/// Client connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientProfile {
    pub server_url: String,
    pub room: String,
    pub password: String,
    pub display_name: String,
    pub sync_interval_ms: u64,
    /// Frame size limit; should match the server's
    pub max_message_bytes: usize,
}

impl Default for ClientProfile {
    fn default() -> Self {
        Self {
            server_url: format!("ws://localhost:{}", quire_net::DEFAULT_PORT),
            room: String::new(),
            password: String::new(),
            display_name: String::new(),
            sync_interval_ms: DEFAULT_SYNC_INTERVAL_MS,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl ClientProfile {
    /// Location of the saved profile
    pub fn default_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "onyx", "quire").ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine config directory",
            ))
        })?;

        Ok(dirs.config_dir().join(PROFILE_FILE))
    }

    /// Load a profile, falling back to defaults when the file is missing
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        let profile: ClientProfile = toml::from_str(&content)?;
        Ok(profile.normalized())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(&self.clone().normalized())?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Trim text fields and clamp the sync interval
    pub fn normalized(mut self) -> Self {
        self.server_url = self.server_url.trim().to_string();
        self.room = self.room.trim().to_string();
        self.password = self.password.trim().to_string();
        self.display_name = self.display_name.trim().to_string();
        self.sync_interval_ms = self.sync_interval_ms.max(MIN_SYNC_INTERVAL_MS);
        self
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms.max(MIN_SYNC_INTERVAL_MS))
    }

    /// Fail early on settings no server would accept
    pub fn validate(&self) -> Result<()> {
        if self.server_url.is_empty() {
            return Err(Error::Config("Server URL is not set".into()));
        }
        if self.room.is_empty() {
            return Err(Error::Config("Room code is not set".into()));
        }
        if self.password.is_empty() {
            return Err(Error::Config("Room password is not set".into()));
        }
        if self.max_message_bytes == 0 {
            return Err(Error::Config("max_message_bytes must be positive".into()));
        }
        Ok(())
    }
}
