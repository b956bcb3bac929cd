//! Connection admission
//!
//! Every WebSocket connection carries `room`, `password` and `name` in its
//! query string. The gate validates them, resolves the room (creating it on
//! first use) and registers the peer.

use quire_core::Peer;
use tracing::{debug, warn};
use url::form_urlencoded;

use crate::broadcast::OutboundTx;
use crate::error::{Error, Result};
use crate::protocol::ErrorCode;
use crate::registry::RoomRegistry;
use crate::room::{AttachOutcome, RoomHandle};

/// Times a joiner re-resolves a room that closed under it
const MAX_ADMIT_ATTEMPTS: usize = 3;

/// Connection parameters from the query string
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinParams {
    pub room: String,
    pub password: String,
    pub name: String,
}

impl JoinParams {
    pub fn new(room: &str, password: &str, name: &str) -> Self {
        Self {
            room: room.trim().to_string(),
            password: password.trim().to_string(),
            name: name.trim().to_string(),
        }
    }

    /// Parse a percent-encoded query string. The first occurrence of a key
    /// wins; unknown keys are ignored.
    pub fn from_query(query: Option<&str>) -> Self {
        let mut room = None;
        let mut password = None;
        let mut name = None;

        for (key, value) in form_urlencoded::parse(query.unwrap_or("").as_bytes()) {
            let slot = match &*key {
                "room" => &mut room,
                "password" => &mut password,
                "name" => &mut name,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.trim().to_string());
            }
        }

        Self {
            room: room.unwrap_or_default(),
            password: password.unwrap_or_default(),
            name: name.unwrap_or_default(),
        }
    }

    /// Encode as a query string
    pub fn to_query(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .append_pair("room", &self.room)
            .append_pair("password", &self.password)
            .append_pair("name", &self.name)
            .finish()
    }

    pub fn validate(&self) -> Result<()> {
        if self.room.is_empty() {
            return Err(Error::rejected(ErrorCode::MissingRoom, "Room code is required"));
        }
        if self.password.is_empty() {
            return Err(Error::rejected(
                ErrorCode::MissingPassword,
                "Room password is required",
            ));
        }
        Ok(())
    }
}

/// A peer registered with a room
#[derive(Debug, Clone)]
pub struct Admission {
    pub room: RoomHandle,
    pub peer: Peer,
}

/// Validate a connection and register it with its room
pub async fn admit(
    registry: &RoomRegistry,
    params: &JoinParams,
    outbound: OutboundTx,
) -> Result<Admission> {
    params.validate()?;
    let anonymous = &registry.config().anonymous_name;

    for attempt in 1..=MAX_ADMIT_ATTEMPTS {
        let room = registry.resolve(&params.room, &params.password).await?;
        let peer = Peer::new(&params.name, anonymous);

        match room.attach(peer.clone(), outbound.clone()).await {
            AttachOutcome::Attached => return Ok(Admission { room, peer }),
            AttachOutcome::Full => {
                return Err(Error::rejected(ErrorCode::RoomFull, "Room is full"));
            }
            AttachOutcome::Closed => {
                debug!(room = %params.room, attempt, "Room closed during admission, retrying");
            }
        }
    }

    warn!(room = %params.room, "Room kept closing during admission");
    Err(Error::RoomClosed)
}
