//! Room registry: room key → sessions currently joined to it.
//!
//! This is the only server-side state. Rooms appear on first join and
//! disappear when their last member leaves; nothing about the shared
//! artifact is ever stored here.
//!
//! All reads and writes go through one `RwLock`, so a membership change
//! can never interleave with the member enumeration of a fan-out.

use std::collections::{BTreeSet, HashMap};

use tokio::sync::RwLock;

use crate::error::RelayError;
use crate::protocol::{PeerId, RoomKey};
use crate::session::SessionHandle;

/// Result of a successful [`RoomRegistry::join`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Normalized key of the joined room.
    pub room: RoomKey,
    /// The join created the room.
    pub created: bool,
    /// The peer was already a member; nothing changed.
    pub already_member: bool,
}

#[derive(Default)]
struct RegistryState {
    rooms: HashMap<RoomKey, HashMap<PeerId, SessionHandle>>,
    /// Reverse index used by `leave`.
    memberships: HashMap<PeerId, BTreeSet<RoomKey>>,
}

#[derive(Default)]
pub struct RoomRegistry {
    state: RwLock<RegistryState>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session to a room, creating the room if absent.
    ///
    /// Idempotent for a session that is already a member. A blank key is
    /// rejected and no room is created.
    pub async fn join(
        &self,
        session: &SessionHandle,
        room: &RoomKey,
    ) -> Result<JoinOutcome, RelayError> {
        if room.is_blank() {
            return Err(RelayError::InvalidRoomKey(room.as_str().to_owned()));
        }

        let peer = session.peer_id();
        let mut state = self.state.write().await;

        let created = !state.rooms.contains_key(room);
        let members = state.rooms.entry(room.clone()).or_default();
        let already_member = members.insert(peer, session.clone()).is_some();

        state.memberships.entry(peer).or_default().insert(room.clone());

        if created {
            log::info!("Room {room:?} created");
        }

        Ok(JoinOutcome { room: room.clone(), created, already_member })
    }

    /// Remove a peer from every room it belongs to.
    ///
    /// Returns the rooms it was removed from. Rooms left empty are dropped.
    /// Safe to call for a peer that never joined anything.
    pub async fn leave(&self, peer: PeerId) -> Vec<RoomKey> {
        let mut state = self.state.write().await;

        let Some(rooms) = state.memberships.remove(&peer) else {
            return Vec::new();
        };

        let mut left = Vec::with_capacity(rooms.len());
        for room in rooms {
            let now_empty = match state.rooms.get_mut(&room) {
                Some(members) => {
                    members.remove(&peer);
                    members.is_empty()
                }
                None => continue,
            };
            if now_empty {
                state.rooms.remove(&room);
                log::info!("Room {room:?} removed (empty)");
            }
            left.push(room);
        }

        left
    }

    /// Current members of a room, minus `excluding`, evaluated now.
    pub async fn members(&self, room: &RoomKey, excluding: Option<PeerId>) -> Vec<SessionHandle> {
        let state = self.state.read().await;
        state
            .rooms
            .get(room)
            .map(|members| {
                members
                    .values()
                    .filter(|s| Some(s.peer_id()) != excluding)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Ids of the current members, minus `excluding`.
    pub async fn member_ids(&self, room: &RoomKey, excluding: Option<PeerId>) -> Vec<PeerId> {
        self.members(room, excluding)
            .await
            .iter()
            .map(SessionHandle::peer_id)
            .collect()
    }

    pub async fn contains(&self, room: &RoomKey, peer: PeerId) -> bool {
        let state = self.state.read().await;
        state
            .rooms
            .get(room)
            .is_some_and(|members| members.contains_key(&peer))
    }

    /// Rooms the peer is currently registered to.
    pub async fn rooms_of(&self, peer: PeerId) -> Vec<RoomKey> {
        let state = self.state.read().await;
        state
            .memberships
            .get(&peer)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn room_count(&self) -> usize {
        self.state.read().await.rooms.len()
    }

    pub async fn active_rooms(&self) -> Vec<RoomKey> {
        self.state.read().await.rooms.keys().cloned().collect()
    }
}
