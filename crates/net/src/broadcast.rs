//! Fan-out of server messages to peer outbound queues
//!
//! Each connected peer owns a bounded queue drained by its writer task.
//! Delivery never waits: a full queue drops the frame for that peer only,
//! a closed queue means the peer is already going away.

use std::sync::Arc;

use quire_core::PeerId;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::protocol::ServerMessage;

/// A message queued for one or more peers
pub type Outbound = Arc<ServerMessage>;

/// Sending half of a peer's outbound queue
pub type OutboundTx = mpsc::Sender<Outbound>;

/// Receiving half of a peer's outbound queue
pub type OutboundRx = mpsc::Receiver<Outbound>;

pub fn outbound_channel(capacity: usize) -> (OutboundTx, OutboundRx) {
    mpsc::channel(capacity.max(1))
}

/// Recipients of a broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    All,
    AllExcept(PeerId),
}

impl Audience {
    fn includes(self, peer_id: PeerId) -> bool {
        match self {
            Audience::All => true,
            Audience::AllExcept(excluded) => excluded != peer_id,
        }
    }
}

/// Outcome of a fan-out
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub dropped: usize,
}

/// Queue a message for a single peer. Returns whether it was queued.
pub fn send(peer_id: PeerId, tx: &OutboundTx, msg: Outbound) -> bool {
    match tx.try_send(msg) {
        Ok(()) => true,
        Err(TrySendError::Full(msg)) => {
            warn!(peer = %peer_id, kind = msg.kind(), "Outbound queue full, dropping frame");
            false
        }
        Err(TrySendError::Closed(msg)) => {
            debug!(peer = %peer_id, kind = msg.kind(), "Peer writer gone, dropping frame");
            false
        }
    }
}

/// Queue a message for every recipient in the audience
pub fn broadcast<'a, I>(recipients: I, msg: ServerMessage, audience: Audience) -> Delivery
where
    I: IntoIterator<Item = (PeerId, &'a OutboundTx)>,
{
    let msg = Arc::new(msg);
    let mut delivery = Delivery::default();
    for (peer_id, tx) in recipients {
        if !audience.includes(peer_id) {
            continue;
        }
        if send(peer_id, tx, msg.clone()) {
            delivery.delivered += 1;
        } else {
            delivery.dropped += 1;
        }
    }
    delivery
}
