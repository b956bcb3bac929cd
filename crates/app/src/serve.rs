//! `quire serve` - run the room server

use std::path::PathBuf;

use quire_core::ServerConfig;
use quire_net::{Result, Server};
use tracing::info;

/// Options for the server command
#[derive(Debug, Clone, Default)]
pub struct ServeArgs {
    pub config: Option<PathBuf>,
    pub bind: Option<String>,
}

/// Resolve the server configuration from the file and flags
pub fn load_config(args: &ServeArgs) -> quire_core::Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => {
            info!(path = %path.display(), "Loading server config");
            ServerConfig::load(path)?
        }
        None => ServerConfig::default(),
    };

    if let Some(bind) = &args.bind {
        config.bind_addr = bind.trim().to_string();
    }
    config.validate()?;
    Ok(config)
}

pub async fn run(args: ServeArgs) -> Result<()> {
    let config = load_config(&args)?;
    info!(
        idle_ms = config.lock_idle_timeout_ms,
        max_peers = config.max_peers_per_room,
        "Server configuration"
    );

    let server = Server::start(config).await?;
    info!(addr = %server.addr(), "Waiting for editors (Ctrl+C to stop)");

    tokio::signal::ctrl_c().await?;

    let stats = server.registry().stats().await;
    info!(rooms = stats.rooms, peers = stats.peers, "Stopping server");
    server.shutdown();
    Ok(())
}
