//! Quire Network Library
//!
//! WebSocket room server and client for collaborative markdown editing.
//!
//! # Architecture
//!
//! - **Server**: accepts WebSocket connections and admits them through the gate
//! - **Room**: one actor task per room, owning content, peers and locks
//! - **Client**: connects to a server and exchanges protocol frames
//! - **Protocol**: one JSON object per text frame, tagged by `type`
//!
//! # Usage
//!
//! ```ignore
//! // Start a server
//! let server = Server::start(ServerConfig::default()).await?;
//!
//! // Join a room
//! let params = JoinParams::new("R1", "secret", "alice");
//! let mut client = Client::connect("ws://127.0.0.1:3456", &params).await?;
//! client.join(local_content).await?;
//!
//! // Process events
//! while let Some(event) = client.next_event().await {
//!     match event {
//!         ServerEvent::Message(ServerMessage::Update { content }) => { /* apply */ }
//!         _ => {}
//!     }
//! }
//! ```

pub mod broadcast;
pub mod client;
pub mod error;
mod frame;
pub mod gate;
pub mod protocol;
pub mod registry;
pub mod room;
pub mod server;

pub use client::{Client, ConnectionState, ServerEvent};
pub use error::{Error, Result};
pub use gate::JoinParams;
pub use protocol::{ClientMessage, ErrorCode, ServerMessage};
pub use registry::{RegistryStats, RoomRegistry};
pub use room::{RoomHandle, RoomSnapshot};
pub use server::Server;

/// Default port for Quire servers
pub const DEFAULT_PORT: u16 = 3456;
