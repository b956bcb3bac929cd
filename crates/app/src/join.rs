//! `quire join` - join a room from the command line
//!
//! Prints every server frame as one JSON line. With `--file`, the file is
//! kept in sync with the room: its content is offered on join, remote
//! `snapshot`/`update` frames overwrite it, and local edits are pushed on
//! every sync tick. With `--lock-at`, the block at that character offset is
//! claimed after joining and again after every snapshot.

use std::path::PathBuf;
use std::time::Duration;

use quire_net::{Client, ConnectionState, Error, JoinParams, Result, ServerEvent, ServerMessage};
use tracing::{debug, info, warn};

use crate::profile::ClientProfile;

/// How long to wait for the server to close after `leave`
const LEAVE_TIMEOUT: Duration = Duration::from_secs(2);

/// Options for the join command; unset fields come from the saved profile
#[derive(Debug, Clone, Default)]
pub struct JoinArgs {
    pub server: Option<String>,
    pub room: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
    pub file: Option<PathBuf>,
    pub interval_ms: Option<u64>,
    pub lock_at: Option<usize>,
    pub max_message_bytes: Option<usize>,
    pub no_save: bool,
}

impl JoinArgs {
    /// Overlay the flags on a saved profile
    pub fn apply(&self, mut profile: ClientProfile) -> ClientProfile {
        if let Some(server) = &self.server {
            profile.server_url = server.clone();
        }
        if let Some(room) = &self.room {
            profile.room = room.clone();
        }
        if let Some(password) = &self.password {
            profile.password = password.clone();
        }
        if let Some(name) = &self.name {
            profile.display_name = name.clone();
        }
        if let Some(interval) = self.interval_ms {
            profile.sync_interval_ms = interval;
        }
        if let Some(max) = self.max_message_bytes {
            profile.max_message_bytes = max;
        }
        profile.normalized()
    }
}

pub async fn run(args: JoinArgs) -> Result<()> {
    let profile_path = ClientProfile::default_path()?;
    let profile = args.apply(ClientProfile::load(&profile_path)?);
    profile.validate()?;
    if !args.no_save {
        profile.save(&profile_path)?;
        debug!(path = %profile_path.display(), "Profile saved");
    }

    let params = JoinParams::new(&profile.room, &profile.password, &profile.display_name);
    let mut client =
        Client::connect_with_limit(&profile.server_url, &params, profile.max_message_bytes)
            .await?;
    info!(room = %params.room, "Connected");

    let mut doc = LocalDocument::open(args.file.clone()).await?;
    client.join(doc.synced.clone()).await?;
    claim(&client, args.lock_at).await?;

    let mut ticker = tokio::time::interval(profile.sync_interval());
    loop {
        tokio::select! {
            event = client.next_event() => match event {
                Some(ServerEvent::Message(msg)) => {
                    print_frame(&msg)?;
                    doc.apply(&msg).await?;
                    // Block boundaries may have moved under the snapshot
                    if let ServerMessage::Snapshot { .. } = msg {
                        claim(&client, args.lock_at).await?;
                    }
                }
                Some(ServerEvent::Rejected { code, message }) => {
                    return Err(Error::Rejected { code, message });
                }
                Some(ServerEvent::Disconnected) | None => {
                    info!("Disconnected from room");
                    return Ok(());
                }
            },
            _ = ticker.tick() => {
                if let Some(content) = doc.poll().await? {
                    debug!(bytes = content.len(), "Pushing local edits");
                    client.update(content).await?;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if client.connection_state().await == ConnectionState::Disconnected {
                    return Ok(());
                }
                info!("Leaving room");
                client.leave().await?;
                let _ = tokio::time::timeout(LEAVE_TIMEOUT, async {
                    while let Some(event) = client.next_event().await {
                        if event == ServerEvent::Disconnected {
                            break;
                        }
                    }
                })
                .await;
                return Ok(());
            }
        }
    }
}

/// Claim the block at `lock_at` in the client's current document
async fn claim(client: &Client, lock_at: Option<usize>) -> Result<()> {
    if let Some(pos) = lock_at {
        let block_id = client.lock_at(pos, None).await?;
        debug!(block = %block_id, pos, "Requested block lock");
    }
    Ok(())
}

fn print_frame(msg: &ServerMessage) -> Result<()> {
    let line = serde_json::to_string(msg).map_err(quire_core::Error::from)?;
    println!("{}", line);
    Ok(())
}

/// Local file mirrored into the room
struct LocalDocument {
    path: Option<PathBuf>,
    /// Content last exchanged with the room
    synced: String,
}

impl LocalDocument {
    async fn open(path: Option<PathBuf>) -> Result<Self> {
        let synced = match &path {
            Some(path) => read_or_empty(path).await?,
            None => String::new(),
        };
        Ok(Self { path, synced })
    }

    /// Adopt content from the room
    async fn apply(&mut self, msg: &ServerMessage) -> Result<()> {
        let content = match msg {
            ServerMessage::Snapshot { content } | ServerMessage::Update { content } => content,
            _ => return Ok(()),
        };
        self.synced = content.clone();
        if let Some(path) = &self.path {
            tokio::fs::write(path, content).await?;
        }
        Ok(())
    }

    /// Local edits since the last exchange, if any
    async fn poll(&mut self) -> Result<Option<String>> {
        let Some(path) = &self.path else {
            return Ok(None);
        };
        let current = read_or_empty(path).await?;
        if current == self.synced {
            return Ok(None);
        }
        self.synced = current.clone();
        Ok(Some(current))
    }
}

async fn read_or_empty(path: &PathBuf) -> Result<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "File not found, starting empty");
            Ok(String::new())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_profile() {
        let saved = ClientProfile {
            room: "old".into(),
            password: "p".into(),
            display_name: "Ana".into(),
            ..ClientProfile::default()
        };
        let args = JoinArgs {
            room: Some(" R1 ".into()),
            interval_ms: Some(50),
            max_message_bytes: Some(4096),
            ..JoinArgs::default()
        };

        let profile = args.apply(saved);
        assert_eq!(profile.room, "R1");
        assert_eq!(profile.password, "p");
        assert_eq!(profile.display_name, "Ana");
        assert_eq!(profile.sync_interval_ms, crate::profile::MIN_SYNC_INTERVAL_MS);
        assert_eq!(profile.max_message_bytes, 4096);
    }

    #[tokio::test]
    async fn test_document_sync_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.md");
        std::fs::write(&path, "Hello").unwrap();

        let mut doc = LocalDocument::open(Some(path.clone())).await.unwrap();
        assert_eq!(doc.synced, "Hello");
        assert_eq!(doc.poll().await.unwrap(), None);

        // Remote content overwrites the file without echoing back
        doc.apply(&ServerMessage::Snapshot {
            content: "Remote".into(),
        })
        .await
        .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "Remote");
        assert_eq!(doc.poll().await.unwrap(), None);

        // Local edits are picked up once
        std::fs::write(&path, "Remote edited").unwrap();
        assert_eq!(doc.poll().await.unwrap().as_deref(), Some("Remote edited"));
        assert_eq!(doc.poll().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let doc = LocalDocument::open(Some(dir.path().join("new.md"))).await.unwrap();
        assert!(doc.synced.is_empty());

        let mut detached = LocalDocument::open(None).await.unwrap();
        assert_eq!(detached.poll().await.unwrap(), None);
    }
}
