//! Room actor
//!
//! Each room is one tokio task that owns the room's content, peer set and
//! lock table, and processes [`RoomCommand`]s from its mailbox one at a
//! time. Connection tasks talk to it through a cloneable [`RoomHandle`].
//!
//! Idle timers are sleep tasks that post [`RoomCommand::IdleExpired`] back
//! into the mailbox, so expiry is serialized with every other mutation. A
//! timer carries the generation it was armed with; re-arming or cancelling
//! bumps the generation, so a stale expiry is ignored.
//!
//! A room that loses its last peer removes itself from the registry map,
//! closes its mailbox and answers any attach still queued with
//! [`AttachOutcome::Closed`].

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use quire_core::{
    blocks, invariants, BlockId, Error as CoreError, LockInfo, LockRequest, LockTable, Peer,
    PeerId, ServerConfig,
};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broadcast::{self, Audience, OutboundTx};
use crate::error::{Error, Result};
use crate::protocol::ServerMessage;

/// Commands buffered per room before senders wait
const MAILBOX_CAPACITY: usize = 1024;

/// Live rooms by code, shared by the registry and every room task
pub(crate) type RoomMap = Arc<Mutex<HashMap<String, RoomHandle>>>;

/// Result of asking a room to admit a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    Attached,
    /// The room is at capacity
    Full,
    /// The room was torn down before the request was processed
    Closed,
}

/// Point-in-time view of a room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub id: Uuid,
    pub code: String,
    pub content: String,
    pub peers: Vec<String>,
    pub peer_count: usize,
    pub locks: Vec<LockInfo>,
}

/// Messages processed by the room task
#[derive(Debug)]
pub enum RoomCommand {
    Attach {
        peer: Peer,
        outbound: OutboundTx,
        reply: oneshot::Sender<AttachOutcome>,
    },
    Join {
        peer_id: PeerId,
        content: String,
    },
    Update {
        peer_id: PeerId,
        content: String,
    },
    Lock {
        peer_id: PeerId,
        block_id: BlockId,
        label: String,
        color: Option<String>,
    },
    Unlock {
        peer_id: PeerId,
        block_id: BlockId,
    },
    Leave {
        peer_id: PeerId,
    },
    IdleExpired {
        peer_id: PeerId,
        generation: u64,
    },
    Inspect {
        reply: oneshot::Sender<RoomSnapshot>,
    },
}

/// Handle to a running room
#[derive(Debug, Clone)]
pub struct RoomHandle {
    id: Uuid,
    code: Arc<str>,
    password_hash: Arc<str>,
    /// Set once the room has emptied and will accept no more peers
    retiring: Arc<AtomicBool>,
    tx: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    /// Incarnation id; a room recreated under the same code gets a new one
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    /// PHC string of the password set by the room's creator
    pub fn password_hash(&self) -> &str {
        &self.password_hash
    }

    /// True once the room has lost its last peer. The registry treats a
    /// retiring room as gone, so its code can be reused right away.
    pub fn is_retiring(&self) -> bool {
        self.retiring.load(Ordering::Acquire)
    }

    /// Register a peer with the room
    pub async fn attach(&self, peer: Peer, outbound: OutboundTx) -> AttachOutcome {
        let (reply, rx) = oneshot::channel();
        let cmd = RoomCommand::Attach {
            peer,
            outbound,
            reply,
        };
        if self.tx.send(cmd).await.is_err() {
            return AttachOutcome::Closed;
        }
        rx.await.unwrap_or(AttachOutcome::Closed)
    }

    pub async fn join(&self, peer_id: PeerId, content: String) -> Result<()> {
        self.send(RoomCommand::Join { peer_id, content }).await
    }

    pub async fn update(&self, peer_id: PeerId, content: String) -> Result<()> {
        self.send(RoomCommand::Update { peer_id, content }).await
    }

    pub async fn lock(
        &self,
        peer_id: PeerId,
        block_id: BlockId,
        label: String,
        color: Option<String>,
    ) -> Result<()> {
        self.send(RoomCommand::Lock {
            peer_id,
            block_id,
            label,
            color,
        })
        .await
    }

    pub async fn unlock(&self, peer_id: PeerId, block_id: BlockId) -> Result<()> {
        self.send(RoomCommand::Unlock { peer_id, block_id }).await
    }

    pub async fn leave(&self, peer_id: PeerId) -> Result<()> {
        self.send(RoomCommand::Leave { peer_id }).await
    }

    pub async fn snapshot(&self) -> Result<RoomSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::Inspect { reply }).await?;
        rx.await.map_err(|_| Error::RoomClosed)
    }

    async fn send(&self, cmd: RoomCommand) -> Result<()> {
        self.tx.send(cmd).await.map_err(|_| Error::RoomClosed)
    }
}

/// Start a room task and return its handle. The caller registers the
/// handle in `rooms`; the task removes it again once the room empties.
pub(crate) fn spawn(
    code: &str,
    password_hash: String,
    config: &ServerConfig,
    rooms: RoomMap,
) -> RoomHandle {
    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
    let handle = RoomHandle {
        id: Uuid::new_v4(),
        code: Arc::from(code),
        password_hash: Arc::from(password_hash),
        retiring: Arc::new(AtomicBool::new(false)),
        tx: tx.clone(),
    };

    let room = Room {
        id: handle.id,
        code: code.to_string(),
        idle_timeout: config.lock_idle_timeout(),
        max_peers: config.max_peers_per_room,
        content: String::new(),
        seeded: false,
        members: HashMap::new(),
        locks: LockTable::new(),
        next_generation: 0,
        mailbox: tx,
        retiring: handle.retiring.clone(),
        rooms,
    };
    tokio::spawn(room.run(rx));

    handle
}

/// Pending idle expiry for one peer
struct IdleTimer {
    generation: u64,
    task: JoinHandle<()>,
}

struct Member {
    peer: Peer,
    outbound: OutboundTx,
    idle: Option<IdleTimer>,
}

struct Room {
    id: Uuid,
    code: String,
    idle_timeout: Duration,
    max_peers: usize,
    content: String,
    /// Set by the first join with content, or by any update; later joins
    /// get a snapshot
    seeded: bool,
    members: HashMap<PeerId, Member>,
    locks: LockTable,
    next_generation: u64,
    /// Handed to idle timer tasks
    mailbox: mpsc::Sender<RoomCommand>,
    retiring: Arc<AtomicBool>,
    rooms: RoomMap,
}

impl Room {
    async fn run(mut self, mut rx: mpsc::Receiver<RoomCommand>) {
        info!(room = %self.code, id = %self.id, "Room opened");
        let mut attached_once = false;

        while let Some(cmd) = rx.recv().await {
            if matches!(cmd, RoomCommand::Attach { .. }) {
                attached_once = true;
            }
            self.handle(cmd);
            self.check_invariants();

            if attached_once && self.members.is_empty() {
                self.retiring.store(true, Ordering::Release);
                break;
            }
        }

        self.retire(&mut rx).await;
    }

    fn handle(&mut self, cmd: RoomCommand) {
        match cmd {
            RoomCommand::Attach {
                peer,
                outbound,
                reply,
            } => {
                let outcome = self.attach(peer, outbound);
                let _ = reply.send(outcome);
            }
            RoomCommand::Join { peer_id, content } => self.join(peer_id, content),
            RoomCommand::Update { peer_id, content } => self.update(peer_id, content),
            RoomCommand::Lock {
                peer_id,
                block_id,
                label,
                color,
            } => self.lock(peer_id, block_id, &label, color),
            RoomCommand::Unlock { peer_id, block_id } => self.unlock(peer_id, block_id),
            RoomCommand::Leave { peer_id } => self.leave(peer_id),
            RoomCommand::IdleExpired {
                peer_id,
                generation,
            } => self.idle_expired(peer_id, generation),
            RoomCommand::Inspect { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn attach(&mut self, peer: Peer, outbound: OutboundTx) -> AttachOutcome {
        if self.members.len() >= self.max_peers {
            warn!(room = %self.code, peer = %peer.display_name, "Room full, rejecting peer");
            return AttachOutcome::Full;
        }

        let peer_id = peer.id;
        info!(room = %self.code, peer = %peer_id, name = %peer.display_name, "Peer joined");
        self.members.insert(
            peer_id,
            Member {
                peer,
                outbound,
                idle: None,
            },
        );

        self.broadcast_peers();
        self.send_to(
            peer_id,
            ServerMessage::LocksState {
                locks: self.locks.snapshot(),
            },
        );
        AttachOutcome::Attached
    }

    fn join(&mut self, peer_id: PeerId, content: String) {
        if !self.members.contains_key(&peer_id) {
            debug!(room = %self.code, peer = %peer_id, "Join from unknown peer ignored");
            return;
        }

        if self.seeded {
            self.send_to(
                peer_id,
                ServerMessage::Snapshot {
                    content: self.content.clone(),
                },
            );
            return;
        }
        if content.is_empty() {
            debug!(room = %self.code, peer = %peer_id, "Empty join leaves room unseeded");
            return;
        }

        debug!(room = %self.code, peer = %peer_id, bytes = content.len(), "Room seeded");
        self.seeded = true;
        self.content = content;
        // Members that joined empty adopt the seed
        self.broadcast(
            ServerMessage::Update {
                content: self.content.clone(),
            },
            Audience::AllExcept(peer_id),
        );
    }

    fn update(&mut self, peer_id: PeerId, content: String) {
        if !self.members.contains_key(&peer_id) {
            debug!(room = %self.code, peer = %peer_id, "Update from unknown peer ignored");
            return;
        }

        self.seeded = true;
        self.content = content;
        self.broadcast(
            ServerMessage::Update {
                content: self.content.clone(),
            },
            Audience::AllExcept(peer_id),
        );

        if self.locks.holds_any(peer_id) {
            self.arm_idle(peer_id);
        }
    }

    fn lock(&mut self, peer_id: PeerId, block_id: BlockId, label: &str, color: Option<String>) {
        let Some(member) = self.members.get(&peer_id) else {
            debug!(room = %self.code, peer = %peer_id, "Lock from unknown peer ignored");
            return;
        };

        let mut label = blocks::clamp_label(label);
        if label.is_empty() {
            label = blocks::label_of(&self.content, block_id);
        }
        let color = color
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| member.peer.color.clone());
        let request = LockRequest {
            block_id,
            owner: peer_id,
            owner_name: &member.peer.display_name,
            color: &color,
            label: &label,
        };

        match self.locks.acquire(request, Utc::now()) {
            Ok(acquired) => {
                debug!(room = %self.code, peer = %peer_id, block = %block_id, ?acquired, "Lock granted");
                self.arm_idle(peer_id);
                self.broadcast_locks();
            }
            Err(CoreError::LockConflict { owner, .. }) => {
                debug!(room = %self.code, peer = %peer_id, block = %block_id, owner = %owner, "Lock rejected");
                self.send_to(
                    peer_id,
                    ServerMessage::LockError {
                        block_id,
                        name: owner,
                    },
                );
            }
            Err(e) => {
                warn!(room = %self.code, peer = %peer_id, error = %e, "Lock failed");
            }
        }
    }

    fn unlock(&mut self, peer_id: PeerId, block_id: BlockId) {
        if !self.locks.release(block_id, peer_id) {
            debug!(room = %self.code, peer = %peer_id, block = %block_id, "Unlock was a no-op");
            return;
        }

        if !self.locks.holds_any(peer_id) {
            self.cancel_idle(peer_id);
        }
        self.broadcast_locks();
    }

    fn leave(&mut self, peer_id: PeerId) {
        let Some(mut member) = self.members.remove(&peer_id) else {
            debug!(room = %self.code, peer = %peer_id, "Leave for unknown peer ignored");
            return;
        };
        if let Some(timer) = member.idle.take() {
            timer.task.abort();
        }

        let released = self.locks.release_all(peer_id);
        info!(
            room = %self.code,
            peer = %peer_id,
            name = %member.peer.display_name,
            released = released.len(),
            "Peer left"
        );

        if !released.is_empty() {
            self.broadcast_locks();
        }
        self.broadcast_peers();
    }

    fn idle_expired(&mut self, peer_id: PeerId, generation: u64) {
        let Some(member) = self.members.get_mut(&peer_id) else {
            return;
        };
        match &member.idle {
            Some(timer) if timer.generation == generation => {}
            _ => {
                debug!(room = %self.code, peer = %peer_id, generation, "Stale idle expiry ignored");
                return;
            }
        }
        member.idle = None;

        let released = self.locks.release_all(peer_id);
        if released.is_empty() {
            return;
        }
        info!(room = %self.code, peer = %peer_id, released = released.len(), "Idle locks released");

        for block_id in released {
            self.send_to(peer_id, ServerMessage::Unlock { block_id });
        }
        self.broadcast_locks();
    }

    /// Start (or restart) the peer's idle countdown
    fn arm_idle(&mut self, peer_id: PeerId) {
        self.next_generation += 1;
        let generation = self.next_generation;
        let Some(member) = self.members.get_mut(&peer_id) else {
            return;
        };
        if let Some(old) = member.idle.take() {
            old.task.abort();
        }

        let mailbox = self.mailbox.clone();
        let timeout = self.idle_timeout;
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = mailbox
                .send(RoomCommand::IdleExpired {
                    peer_id,
                    generation,
                })
                .await;
        });
        member.idle = Some(IdleTimer { generation, task });
    }

    fn cancel_idle(&mut self, peer_id: PeerId) {
        if let Some(timer) = self
            .members
            .get_mut(&peer_id)
            .and_then(|member| member.idle.take())
        {
            timer.task.abort();
        }
    }

    fn presence(&self) -> Vec<String> {
        self.members
            .values()
            .map(|member| member.peer.display_name.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            id: self.id,
            code: self.code.clone(),
            content: self.content.clone(),
            peers: self.presence(),
            peer_count: self.members.len(),
            locks: self.locks.snapshot(),
        }
    }

    fn send_to(&self, peer_id: PeerId, msg: ServerMessage) {
        if let Some(member) = self.members.get(&peer_id) {
            broadcast::send(peer_id, &member.outbound, Arc::new(msg));
        }
    }

    fn broadcast(&self, msg: ServerMessage, audience: Audience) {
        let recipients = self
            .members
            .iter()
            .map(|(peer_id, member)| (*peer_id, &member.outbound));
        let delivery = broadcast::broadcast(recipients, msg, audience);
        if delivery.dropped > 0 {
            debug!(room = %self.code, dropped = delivery.dropped, "Broadcast partially delivered");
        }
    }

    fn broadcast_peers(&self) {
        let peers = self.presence();
        invariants::assert_presence_list(&peers);
        self.broadcast(ServerMessage::Peers { peers }, Audience::All);
    }

    fn broadcast_locks(&self) {
        self.broadcast(
            ServerMessage::LocksState {
                locks: self.locks.snapshot(),
            },
            Audience::All,
        );
    }

    fn check_invariants(&self) {
        if cfg!(debug_assertions) {
            let connected: HashSet<PeerId> = self.members.keys().copied().collect();
            invariants::assert_lock_owners_connected(&self.locks, &connected);
            invariants::assert_empty_room_has_no_locks(self.members.len(), &self.locks);
        }
    }

    /// Tear the room down after its last peer left
    async fn retire(&mut self, rx: &mut mpsc::Receiver<RoomCommand>) {
        {
            let mut rooms = self.rooms.lock().await;
            if rooms.get(&self.code).map(RoomHandle::id) == Some(self.id) {
                rooms.remove(&self.code);
            }
        }
        rx.close();

        // Commands that raced the teardown
        while let Some(cmd) = rx.recv().await {
            match cmd {
                RoomCommand::Attach { reply, .. } => {
                    let _ = reply.send(AttachOutcome::Closed);
                }
                RoomCommand::Inspect { reply } => {
                    let _ = reply.send(self.snapshot());
                }
                _ => {}
            }
        }

        info!(room = %self.code, id = %self.id, "Room closed");
    }
}
