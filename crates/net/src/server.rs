//! WebSocket server for collaborative rooms
//!
//! Clients connect with `?room=..&password=..&name=..`. Once admitted,
//! each connection gets a reader loop (this task) and a writer task that
//! drains the peer's outbound queue. All room state lives in the room
//! actors; connections only forward commands.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use quire_core::{BlockId, PeerId, ServerConfig};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use crate::broadcast::{self as fanout, outbound_channel, OutboundRx, OutboundTx};
use crate::error::{Error, Result};
use crate::frame::{self, Inbound};
use crate::gate::{self, Admission, JoinParams};
use crate::protocol::{ClientMessage, ErrorCode, ServerMessage};
use crate::registry::RoomRegistry;
use crate::room::RoomHandle;

/// How long a closing connection waits for its writer to flush
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

type WsSink = SplitSink<WebSocketStream<TcpStream>, WsMessage>;

/// Room server handle
pub struct Server {
    addr: SocketAddr,
    registry: Arc<RoomRegistry>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Bind the listener and start accepting connections
    pub async fn start(config: ServerConfig) -> Result<Self> {
        config.validate()?;

        let listener = TcpListener::bind(config.bind_addr.as_str()).await?;
        let bound_addr = listener.local_addr()?;

        info!(addr = %bound_addr, "Server started");

        let (shutdown_tx, _) = broadcast::channel(1);
        let registry = Arc::new(RoomRegistry::new(Arc::new(config)));

        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(accept_loop(listener, registry.clone(), shutdown_rx));

        Ok(Server {
            addr: bound_addr,
            registry,
            shutdown_tx,
        })
    }

    /// Get the server's bound address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// Stop accepting and close every connection
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        info!("Server shutdown initiated");
    }
}

/// Accept incoming connections
async fn accept_loop(
    listener: TcpListener,
    registry: Arc<RoomRegistry>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!(addr = %addr, "New connection");
                        let registry = registry.clone();
                        let shutdown_rx = shutdown_rx.resubscribe();
                        tokio::spawn(handle_connection(stream, addr, registry, shutdown_rx));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Accept loop shutting down");
                break;
            }
        }
    }
}

fn ws_config(config: &ServerConfig) -> WebSocketConfig {
    frame::ws_config(config.max_message_bytes)
}

/// Handle a single client connection
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<RoomRegistry>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let config = registry.config();
    let max_bytes = config.max_message_bytes;

    // Capture the query string during the upgrade; any path is accepted
    let mut query: Option<String> = None;
    let callback = |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
        query = req.uri().query().map(str::to_string);
        Ok(resp)
    };
    let ws = match tokio_tungstenite::accept_hdr_async_with_config(
        stream,
        callback,
        Some(ws_config(config)),
    )
    .await
    {
        Ok(ws) => ws,
        Err(e) => {
            warn!(addr = %addr, error = %e, "WebSocket handshake failed");
            return;
        }
    };

    let params = JoinParams::from_query(query.as_deref());
    let (outbound_tx, outbound_rx) = outbound_channel(config.outbound_queue_capacity);

    let Admission { room, peer } = match gate::admit(&registry, &params, outbound_tx.clone()).await
    {
        Ok(admission) => admission,
        Err(e) => {
            reject(ws, addr, e, max_bytes).await;
            return;
        }
    };
    let peer_id = peer.id;
    info!(addr = %addr, room = %room.code(), peer = %peer_id, name = %peer.display_name, "Peer connected");

    let (sink, mut stream) = ws.split();
    let writer = tokio::spawn(writer_task(sink, outbound_rx, max_bytes));

    // Read loop
    loop {
        tokio::select! {
            next = stream.next() => {
                let frame = match next {
                    Some(Ok(frame)) => frame,
                    Some(Err(tungstenite::Error::Capacity(e))) => {
                        warn!(peer = %peer_id, error = %e, "Frame over size limit");
                        reply(
                            &outbound_tx,
                            peer_id,
                            ServerMessage::error(ErrorCode::MessageTooLarge, e.to_string()),
                        );
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(peer = %peer_id, error = %e, "Read error");
                        break;
                    }
                    None => {
                        debug!(peer = %peer_id, "Connection closed");
                        break;
                    }
                };

                match frame::decode::<ClientMessage>(frame, max_bytes) {
                    Ok(Inbound::Message(msg)) => {
                        match dispatch(&room, peer_id, msg, &outbound_tx).await {
                            Ok(Flow::Continue) => {}
                            Ok(Flow::Leave) => {
                                debug!(peer = %peer_id, "Peer sent leave");
                                break;
                            }
                            Err(e) => {
                                warn!(peer = %peer_id, error = %e, "Room unavailable");
                                break;
                            }
                        }
                    }
                    Ok(Inbound::Close) => {
                        debug!(peer = %peer_id, "Close frame received");
                        break;
                    }
                    Ok(Inbound::Ignore) => {}
                    Err(e) => {
                        warn!(peer = %peer_id, error = %e, "Malformed frame");
                        reply(
                            &outbound_tx,
                            peer_id,
                            ServerMessage::error(ErrorCode::BadMessage, e.to_string()),
                        );
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                debug!(peer = %peer_id, "Closing connection for shutdown");
                break;
            }
        }
    }

    // Single cleanup path for leave, close and transport errors
    if let Err(e) = room.leave(peer_id).await {
        debug!(peer = %peer_id, error = %e, "Room already closed on leave");
    }
    drop(outbound_tx);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        debug!(peer = %peer_id, "Writer did not finish in time");
    }

    info!(addr = %addr, peer = %peer_id, "Peer disconnected");
}

/// What the read loop does after a message
enum Flow {
    Continue,
    Leave,
}

/// Forward one client message to the room
async fn dispatch(
    room: &RoomHandle,
    peer_id: PeerId,
    msg: ClientMessage,
    outbound: &OutboundTx,
) -> Result<Flow> {
    match msg {
        ClientMessage::Join { content } => room.join(peer_id, content).await?,
        ClientMessage::Update { content } => room.update(peer_id, content).await?,
        ClientMessage::Lock {
            block_id,
            label,
            color,
        } => {
            if let Some(block_id) = parse_block(&block_id, peer_id, outbound) {
                room.lock(peer_id, block_id, label, color).await?;
            }
        }
        ClientMessage::Unlock { block_id } => {
            if let Some(block_id) = parse_block(&block_id, peer_id, outbound) {
                room.unlock(peer_id, block_id).await?;
            }
        }
        ClientMessage::Leave => return Ok(Flow::Leave),
    }
    Ok(Flow::Continue)
}

/// Parse a wire block id, answering `invalid_block` when malformed
fn parse_block(raw: &str, peer_id: PeerId, outbound: &OutboundTx) -> Option<BlockId> {
    match raw.parse::<BlockId>() {
        Ok(block_id) => Some(block_id),
        Err(e) => {
            debug!(peer = %peer_id, block = raw, "Invalid block id");
            reply(
                outbound,
                peer_id,
                ServerMessage::error(ErrorCode::InvalidBlock, e.to_string()),
            );
            None
        }
    }
}

fn reply(outbound: &OutboundTx, peer_id: PeerId, msg: ServerMessage) {
    fanout::send(peer_id, outbound, Arc::new(msg));
}

/// Writer task - sends queued messages to the client
async fn writer_task(mut sink: WsSink, mut rx: OutboundRx, max_bytes: usize) {
    while let Some(msg) = rx.recv().await {
        let frame = match frame::encode(&*msg, max_bytes) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(kind = msg.kind(), error = %e, "Dropping unencodable frame");
                continue;
            }
        };
        if let Err(e) = sink.send(frame).await {
            debug!(error = %e, "Write failed");
            return;
        }
    }
    let _ = sink.close().await;
}

/// Report a failed admission and close the connection
async fn reject(mut ws: WebSocketStream<TcpStream>, addr: SocketAddr, err: Error, max_bytes: usize) {
    let (code, message) = match err {
        Error::Rejected { code, message } => (code, message),
        other => (ErrorCode::Unavailable, other.to_string()),
    };
    warn!(addr = %addr, code = %code, reason = %message, "Connection rejected");

    let msg = ServerMessage::Error { code, message };
    match frame::encode(&msg, max_bytes) {
        Ok(frame) => {
            if let Err(e) = ws.send(frame).await {
                debug!(addr = %addr, error = %e, "Failed to send rejection");
            }
        }
        Err(e) => debug!(addr = %addr, error = %e, "Failed to encode rejection"),
    }
    let _ = ws.close(None).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1:0".into(),
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_server_start() {
        let server = Server::start(local_config()).await.unwrap();
        assert!(server.addr().port() > 0);
        assert_eq!(server.registry().room_count().await, 0);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_invalid_config_refused() {
        let config = ServerConfig {
            max_peers_per_room: 0,
            ..local_config()
        };
        assert!(matches!(
            Server::start(config).await,
            Err(Error::Core(quire_core::Error::Config(_)))
        ));

        let config = ServerConfig {
            password_memory_kib: 1,
            ..local_config()
        };
        assert!(matches!(
            Server::start(config).await,
            Err(Error::Core(quire_core::Error::Config(_)))
        ));
    }

    #[test]
    fn test_ws_limits_follow_config() {
        let config = ServerConfig {
            max_message_bytes: 4096,
            ..local_config()
        };
        let ws = ws_config(&config);
        assert_eq!(ws.max_message_size, Some(4096));
        assert_eq!(ws.max_frame_size, Some(4096));
    }

    #[tokio::test]
    async fn test_dispatch_rejects_malformed_block() {
        let (tx, mut rx) = outbound_channel(4);
        let parsed = parse_block("block-1", PeerId::new(), &tx);
        assert!(parsed.is_none());
        match &*rx.recv().await.unwrap() {
            ServerMessage::Error { code, .. } => assert_eq!(*code, ErrorCode::InvalidBlock),
            other => panic!("unexpected frame: {other:?}"),
        }
        assert_eq!(parse_block("b_2", PeerId::new(), &tx), Some(BlockId::new(2)));
    }
}
