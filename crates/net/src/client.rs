//! WebSocket client for joining a room

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use quire_core::config::DEFAULT_MAX_MESSAGE_BYTES;
use quire_core::{blocks, BlockId, LockInfo};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::frame::{self, Inbound};
use crate::gate::JoinParams;
use crate::protocol::{ClientMessage, ErrorCode, ServerMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Event received from the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A protocol frame
    Message(ServerMessage),
    /// The server refused the connection or closed it on an error
    Rejected { code: ErrorCode, message: String },
    /// Connection lost
    Disconnected,
}

/// Client handle for network operations
pub struct Client {
    state: Arc<RwLock<ClientState>>,
    event_rx: mpsc::Receiver<ServerEvent>,
    cmd_tx: mpsc::Sender<ClientCommand>,
    max_message_bytes: usize,
}

/// Last room state seen by this client
#[derive(Debug)]
struct ClientState {
    connection: ConnectionState,
    /// Latest document: what this client announced or sent, replaced by
    /// every `snapshot` and `update` from the server
    content: Option<String>,
    peers: Vec<String>,
    locks: Vec<LockInfo>,
}

enum ClientCommand {
    /// An encoded frame
    Send(WsMessage),
    Disconnect,
}

/// Build the connection URL for a server and join parameters
pub fn room_url(server_url: &str, params: &JoinParams) -> Result<Url> {
    let mut url = Url::parse(server_url.trim())?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(Error::Protocol(format!(
                "Unsupported URL scheme: {} (expected ws or wss)",
                other
            )))
        }
    }
    url.set_query(Some(&params.to_query()));
    Ok(url)
}

impl Client {
    /// Connect to a room server using the default frame size limit
    pub async fn connect(server_url: &str, params: &JoinParams) -> Result<Self> {
        Self::connect_with_limit(server_url, params, DEFAULT_MAX_MESSAGE_BYTES).await
    }

    /// Connect to a room server. Frames larger than `max_message_bytes`
    /// are refused in both directions; it should match the server's
    /// `max_message_bytes`.
    pub async fn connect_with_limit(
        server_url: &str,
        params: &JoinParams,
        max_message_bytes: usize,
    ) -> Result<Self> {
        params.validate()?;
        if max_message_bytes == 0 {
            return Err(Error::Protocol("max_message_bytes must be positive".into()));
        }
        let url = room_url(server_url, params)?;
        info!(server = %server_url, room = %params.room, "Connecting to server");

        let (ws, _response) = tokio_tungstenite::connect_async_with_config(
            url.as_str(),
            Some(frame::ws_config(max_message_bytes)),
            false,
        )
        .await?;

        let state = Arc::new(RwLock::new(ClientState {
            connection: ConnectionState::Connected,
            content: None,
            peers: Vec::new(),
            locks: Vec::new(),
        }));

        let (event_tx, event_rx) = mpsc::channel(64);
        let (cmd_tx, cmd_rx) = mpsc::channel(64);

        // Spawn connection handler
        tokio::spawn(connection_task(
            ws,
            state.clone(),
            event_tx,
            cmd_rx,
            max_message_bytes,
        ));

        Ok(Client {
            state,
            event_rx,
            cmd_tx,
            max_message_bytes,
        })
    }

    /// Get the next server event
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        self.event_rx.recv().await
    }

    /// Get the next protocol frame. Returns `None` after a rejection or
    /// once the connection is gone.
    pub async fn next_message(&mut self) -> Option<ServerMessage> {
        match self.event_rx.recv().await? {
            ServerEvent::Message(msg) => Some(msg),
            ServerEvent::Rejected { .. } | ServerEvent::Disconnected => None,
        }
    }

    /// Queue a message for the server. Fails with [`Error::Protocol`] if
    /// the encoded frame exceeds the size limit.
    pub async fn send(&self, msg: ClientMessage) -> Result<()> {
        let frame = frame::encode(&msg, self.max_message_bytes)?;
        self.cmd_tx
            .send(ClientCommand::Send(frame))
            .await
            .map_err(|_| Error::NotConnected)
    }

    /// Announce local content; the server keeps it only for an unseeded room
    pub async fn join(&self, content: impl Into<String>) -> Result<()> {
        let content = content.into();
        self.send(ClientMessage::Join {
            content: content.clone(),
        })
        .await?;
        self.state.write().await.content = Some(content);
        Ok(())
    }

    pub async fn update(&self, content: impl Into<String>) -> Result<()> {
        let content = content.into();
        self.send(ClientMessage::Update {
            content: content.clone(),
        })
        .await?;
        self.state.write().await.content = Some(content);
        Ok(())
    }

    pub async fn lock(&self, block_id: BlockId, label: &str, color: Option<&str>) -> Result<()> {
        self.send(ClientMessage::Lock {
            block_id: block_id.to_string(),
            label: label.to_string(),
            color: color.map(str::to_string),
        })
        .await
    }

    /// Claim the block containing character offset `pos` of the current
    /// document, labelled from its text
    pub async fn lock_at(&self, pos: usize, color: Option<&str>) -> Result<BlockId> {
        let block = {
            let state = self.state.read().await;
            blocks::block_at(state.content.as_deref().unwrap_or_default(), pos)
        };
        self.lock(block.id, &block.label, color).await?;
        Ok(block.id)
    }

    pub async fn unlock(&self, block_id: BlockId) -> Result<()> {
        self.send(ClientMessage::Unlock {
            block_id: block_id.to_string(),
        })
        .await
    }

    /// Leave the room; the server closes the connection afterwards
    pub async fn leave(&self) -> Result<()> {
        self.send(ClientMessage::Leave).await
    }

    /// Disconnect from the server
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(ClientCommand::Disconnect).await;
    }

    /// Get current connection state
    pub async fn connection_state(&self) -> ConnectionState {
        self.state.read().await.connection
    }

    /// Latest known document
    pub async fn content(&self) -> Option<String> {
        self.state.read().await.content.clone()
    }

    pub async fn peers(&self) -> Vec<String> {
        self.state.read().await.peers.clone()
    }

    pub async fn locks(&self) -> Vec<LockInfo> {
        self.state.read().await.locks.clone()
    }
}

/// Main connection task
async fn connection_task(
    ws: WsStream,
    state: Arc<RwLock<ClientState>>,
    event_tx: mpsc::Sender<ServerEvent>,
    mut cmd_rx: mpsc::Receiver<ClientCommand>,
    max_message_bytes: usize,
) {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            // Incoming frame from server
            next = stream.next() => {
                let frame = match next {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        warn!(error = %e, "Read error");
                        break;
                    }
                    None => {
                        debug!("Server closed connection");
                        break;
                    }
                };
                match frame::decode::<ServerMessage>(frame, max_message_bytes) {
                    Ok(Inbound::Message(msg)) => {
                        handle_server_message(msg, &state, &event_tx).await;
                    }
                    Ok(Inbound::Close) => {
                        debug!("Server sent close");
                        break;
                    }
                    Ok(Inbound::Ignore) => {}
                    Err(e) => {
                        warn!(error = %e, "Ignoring malformed server frame");
                    }
                }
            }

            // Outgoing command
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ClientCommand::Send(frame)) => {
                        if let Err(e) = sink.send(frame).await {
                            warn!(error = %e, "Write error");
                            break;
                        }
                    }
                    Some(ClientCommand::Disconnect) | None => {
                        debug!("Disconnect requested");
                        let _ = sink.close().await;
                        break;
                    }
                }
            }
        }
    }

    // Cleanup
    {
        let mut s = state.write().await;
        s.connection = ConnectionState::Disconnected;
    }
    let _ = event_tx.send(ServerEvent::Disconnected).await;
    info!("Disconnected from server");
}

/// Track room state and forward the frame
async fn handle_server_message(
    msg: ServerMessage,
    state: &Arc<RwLock<ClientState>>,
    event_tx: &mpsc::Sender<ServerEvent>,
) {
    {
        let mut s = state.write().await;
        match &msg {
            ServerMessage::Snapshot { content } | ServerMessage::Update { content } => {
                s.content = Some(content.clone());
            }
            ServerMessage::Peers { peers } => s.peers = peers.clone(),
            ServerMessage::LocksState { locks } => s.locks = locks.clone(),
            _ => {}
        }
    }

    let event = match msg {
        ServerMessage::Error { code, message } if code.is_fatal() => {
            warn!(code = %code, reason = %message, "Server rejected connection");
            ServerEvent::Rejected { code, message }
        }
        other => ServerEvent::Message(other),
    };
    let _ = event_tx.send(event).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Server;
    use quire_core::ServerConfig;

    #[test]
    fn test_room_url_encodes_params() {
        let params = JoinParams::new("team notes", "p&q", "Ana");
        let url = room_url("ws://localhost:3456/ws", &params).unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:3456/ws?room=team+notes&password=p%26q&name=Ana"
        );
    }

    #[test]
    fn test_room_url_rejects_http() {
        let params = JoinParams::new("R1", "p", "A");
        assert!(matches!(
            room_url("http://localhost:3456", &params),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(room_url("not a url", &params), Err(Error::Url(_))));
    }

    #[tokio::test]
    async fn test_client_connect() {
        let server = Server::start(ServerConfig {
            bind_addr: "127.0.0.1:0".into(),
            password_memory_kib: 64,
            password_iterations: 1,
            ..ServerConfig::default()
        })
        .await
        .unwrap();
        let url = format!("ws://{}", server.addr());

        let mut client = Client::connect(&url, &JoinParams::new("R1", "p", "client"))
            .await
            .unwrap();

        // Admission sends presence first
        match client.next_event().await {
            Some(ServerEvent::Message(ServerMessage::Peers { peers })) => {
                assert_eq!(peers, vec!["client".to_string()]);
            }
            other => panic!("Expected peers, got {other:?}"),
        }
        assert_eq!(client.connection_state().await, ConnectionState::Connected);
        assert_eq!(client.peers().await, vec!["client".to_string()]);

        client.disconnect().await;
        loop {
            match client.next_event().await {
                Some(ServerEvent::Disconnected) | None => break,
                Some(_) => {}
            }
        }
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_oversized_send_is_an_error() {
        let server = Server::start(ServerConfig {
            bind_addr: "127.0.0.1:0".into(),
            password_memory_kib: 64,
            password_iterations: 1,
            ..ServerConfig::default()
        })
        .await
        .unwrap();
        let url = format!("ws://{}", server.addr());

        let client = Client::connect_with_limit(&url, &JoinParams::new("R1", "p", "A"), 256)
            .await
            .unwrap();
        let result = client.update("x".repeat(1024)).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
        assert_eq!(client.content().await, None);

        client.update("small").await.unwrap();
        assert_eq!(client.content().await.as_deref(), Some("small"));
        server.shutdown();
    }

    #[tokio::test]
    async fn test_zero_limit_refused() {
        let result =
            Client::connect_with_limit("ws://127.0.0.1:1", &JoinParams::new("R1", "p", "A"), 0)
                .await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_client_sees_rejection() {
        let server = Server::start(ServerConfig {
            bind_addr: "127.0.0.1:0".into(),
            password_memory_kib: 64,
            password_iterations: 1,
            ..ServerConfig::default()
        })
        .await
        .unwrap();
        let url = format!("ws://{}", server.addr());

        let _owner = Client::connect(&url, &JoinParams::new("R1", "right", "A"))
            .await
            .unwrap();
        // Wait until the room exists
        while server.registry().get("R1").await.is_none() {
            tokio::task::yield_now().await;
        }

        let mut intruder = Client::connect(&url, &JoinParams::new("R1", "wrong", "B"))
            .await
            .unwrap();
        match intruder.next_event().await {
            Some(ServerEvent::Rejected { code, .. }) => assert_eq!(code, ErrorCode::AuthFailed),
            other => panic!("Expected rejection, got {other:?}"),
        }
        assert_eq!(intruder.next_event().await, Some(ServerEvent::Disconnected));
        server.shutdown();
    }
}
