//! Peer lifecycle: `Connected → Joined → Disconnected`.
//!
//! Joining registers the session and announces it to the room with
//! `peer_joined`; existing members answer by re-broadcasting their copy
//! of the shared state, which is the only way a newcomer catches up.
//! Disconnecting removes the session from every room it was registered to
//! and sends one `peer_left` to each of those rooms.
//!
//! There is no resume. A reconnecting client is a brand-new peer.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::RelayError;
use crate::protocol::{PeerId, RoomKey, Scope, ServerEvent};
use crate::registry::JoinOutcome;
use crate::relay::EventRelay;
use crate::session::SessionHandle;

/// Who receives the `peer_joined` notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinNotice {
    /// Existing members only.
    #[default]
    ExistingMembers,
    /// Existing members and the joiner, as a welcome acknowledgement.
    Everyone,
}

impl JoinNotice {
    fn scope(self) -> Scope {
        match self {
            Self::ExistingMembers => Scope::ExcludingSender,
            Self::Everyone => Scope::IncludingSender,
        }
    }
}

impl FromStr for JoinNotice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "existing" | "existing_members" => Ok(Self::ExistingMembers),
            "everyone" | "all" => Ok(Self::Everyone),
            other => Err(format!("expected `existing` or `everyone`, got `{other}`")),
        }
    }
}

impl fmt::Display for JoinNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExistingMembers => f.write_str("existing"),
            Self::Everyone => f.write_str("everyone"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerPhase {
    Connected,
    Joined(BTreeSet<RoomKey>),
    Disconnected,
}

/// Lifecycle driver for one session.
pub struct PeerLifecycle {
    session: SessionHandle,
    phase: PeerPhase,
    relay: Arc<EventRelay>,
    notice: JoinNotice,
    request_refresh: bool,
}

impl PeerLifecycle {
    pub fn new(
        session: SessionHandle,
        relay: Arc<EventRelay>,
        notice: JoinNotice,
        request_refresh: bool,
    ) -> Self {
        Self {
            session,
            phase: PeerPhase::Connected,
            relay,
            notice,
            request_refresh,
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.session.peer_id()
    }

    pub fn phase(&self) -> &PeerPhase {
        &self.phase
    }

    /// Register with a room and announce the arrival.
    ///
    /// Re-joining a room the peer is already in changes nothing and sends
    /// no second notification.
    pub async fn join(&mut self, room: RoomKey) -> Result<JoinOutcome, RelayError> {
        let peer = self.peer_id();
        if self.phase == PeerPhase::Disconnected {
            return Err(RelayError::TransportFailure(peer));
        }

        let outcome = self.relay.registry().join(&self.session, &room).await?;

        match &mut self.phase {
            PeerPhase::Joined(rooms) => {
                rooms.insert(outcome.room.clone());
            }
            phase => *phase = PeerPhase::Joined(BTreeSet::from([outcome.room.clone()])),
        }

        if outcome.already_member {
            log::debug!("Peer {peer} re-joined room {:?}; nothing to announce", outcome.room);
            return Ok(outcome);
        }

        log::info!("Peer {peer} joined room {:?}", outcome.room);

        self.notify(ServerEvent::PeerJoined { peer_id: peer }, &outcome.room, self.notice.scope())
            .await;
        if self.request_refresh {
            self.notify(
                ServerEvent::RequestStateRefresh { requested_by: peer },
                &outcome.room,
                Scope::ExcludingSender,
            )
            .await;
        }

        Ok(outcome)
    }

    /// Leave every room and tell the remaining members.
    ///
    /// Runs once; later calls return an empty list.
    pub async fn disconnect(&mut self) -> Vec<RoomKey> {
        if self.phase == PeerPhase::Disconnected {
            return Vec::new();
        }
        self.phase = PeerPhase::Disconnected;

        let peer = self.peer_id();
        let rooms = self.relay.registry().leave(peer).await;
        for room in &rooms {
            self.notify(ServerEvent::PeerLeft { peer_id: peer }, room, Scope::ExcludingSender)
                .await;
            log::info!("Peer {peer} left room {room:?}");
        }
        rooms
    }

    async fn notify(&self, event: ServerEvent, room: &RoomKey, scope: Scope) {
        let name = event.name();
        if let Err(e) = self.relay.relay(event, self.peer_id(), room, scope).await {
            log::warn!("Failed to send {name} to room {room:?}: {e}");
        }
    }
}
