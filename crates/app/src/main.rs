//! Quire - collaborative markdown rooms
//!
//! `quire serve` runs the room server; `quire join` connects to a room and
//! mirrors a local file into it; `quire blocks` shows how a file splits into
//! lockable blocks.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod join;
mod outline;
mod profile;
mod serve;

#[derive(Parser)]
#[command(name = "quire")]
#[command(about = "Shared markdown rooms with per-block edit locks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the room server
    Serve {
        /// TOML config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Listen address, overrides the config file
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Join a room and print every frame as a JSON line
    Join {
        /// Server URL, e.g. ws://localhost:3456
        #[arg(short, long)]
        server: Option<String>,

        /// Room code
        #[arg(short, long)]
        room: Option<String>,

        /// Room password
        #[arg(short, long)]
        password: Option<String>,

        /// Display name
        #[arg(short, long)]
        name: Option<String>,

        /// Markdown file to keep in sync with the room
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// File sync interval in milliseconds (minimum 300)
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Claim the block at this character offset of the file
        #[arg(long)]
        lock_at: Option<usize>,

        /// Largest frame in bytes; should match the server
        #[arg(long)]
        max_message_bytes: Option<usize>,

        /// Do not remember these settings
        #[arg(long)]
        no_save: bool,
    },

    /// List the blocks of a markdown file
    Blocks {
        /// Markdown file
        file: PathBuf,
    },
}

fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(async {
        match cli.command {
            Commands::Serve { config, bind } => serve::run(serve::ServeArgs { config, bind }).await,
            Commands::Join {
                server,
                room,
                password,
                name,
                file,
                interval_ms,
                lock_at,
                max_message_bytes,
                no_save,
            } => {
                join::run(join::JoinArgs {
                    server,
                    room,
                    password,
                    name,
                    file,
                    interval_ms,
                    lock_at,
                    max_message_bytes,
                    no_save,
                })
                .await
            }
            Commands::Blocks { file } => outline::run(&file).map_err(Into::into),
        }
    });

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}
