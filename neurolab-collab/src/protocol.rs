//! Wire protocol for the room relay.
//!
//! Every frame carries one externally-tagged event. Browser peers send
//! JSON text frames, native peers may send bincode binary frames; both
//! encodings describe the same enums:
//!
//! ```text
//! {"sync_architecture":{"room":"7","architecture":[2,4,4,1]}}
//!  └──── event tag ───┘ └──────────── payload ─────────────┘
//! ```
//!
//! Client → server events are [`ClientEvent`]s. The server turns each one
//! into a [`Route`]: either a registry join, or a [`ServerEvent`] plus a
//! delivery [`Scope`] for the relay. The only fields the server adds are
//! the origin peer id taken from the transport session and the chat
//! timestamp; the payload itself is forwarded unchanged.

use std::fmt;

use serde::de::{self, DeserializeOwned, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

use crate::presence::Vec3;

// ───────────────────────────────────────────────────────────────────
// Identities
// ───────────────────────────────────────────────────────────────────

/// Ephemeral peer identity, valid for the lifetime of one transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(Uuid);

impl PeerId {
    /// Allocate a fresh identity for a new session.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Normalized room key.
///
/// Keys are coerced to text and trimmed, so `" 101 "`, `"101"` and the
/// JSON number `101` all name the same room. A blank key survives
/// decoding but is rejected by [`RoomRegistry::join`].
///
/// [`RoomRegistry::join`]: crate::registry::RoomRegistry::join
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomKey(String);

impl RoomKey {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_owned())
    }

    /// True when nothing but whitespace was supplied.
    pub fn is_blank(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomKey {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for RoomKey {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl Serialize for RoomKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RoomKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Self-describing formats may carry the key as a number.
        if deserializer.is_human_readable() {
            deserializer.deserialize_any(RoomKeyVisitor)
        } else {
            deserializer.deserialize_string(RoomKeyVisitor)
        }
    }
}

struct RoomKeyVisitor;

impl<'de> Visitor<'de> for RoomKeyVisitor {
    type Value = RoomKey;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a room key as text or number")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<RoomKey, E> {
        Ok(RoomKey::new(v))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<RoomKey, E> {
        Ok(RoomKey::new(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<RoomKey, E> {
        Ok(RoomKey(v.to_string()))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<RoomKey, E> {
        Ok(RoomKey(v.to_string()))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<RoomKey, E> {
        // 101.0 names room "101", like a browser's String(101.0)
        if v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
            Ok(RoomKey((v as i64).to_string()))
        } else {
            Ok(RoomKey(v.to_string()))
        }
    }
}

/// Identifies one unit (neuron) of the visualized network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId {
    pub layer: u32,
    pub unit: u32,
}

impl UnitId {
    pub fn new(layer: u32, unit: u32) -> Self {
        Self { layer, unit }
    }
}

// ───────────────────────────────────────────────────────────────────
// Per-peer status
// ───────────────────────────────────────────────────────────────────

/// Terminal-state life cycle of a combatant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifeState {
    Alive,
    Dead,
}

/// Full status object a peer publishes about itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerStatus {
    pub peer_id: PeerId,
    pub health: u32,
    pub shield: u32,
    pub state: LifeState,
    /// Last training loss, if the peer has reported one.
    pub score: Option<f64>,
}

// ───────────────────────────────────────────────────────────────────
// Events
// ───────────────────────────────────────────────────────────────────

/// Which room members receive a relayed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Every member except the sender.
    ExcludingSender,
    /// Every member, the sender included.
    IncludingSender,
}

/// Events sent by a peer to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientEvent {
    JoinRoom { room: RoomKey },
    RequestStateRefresh { room: RoomKey },
    SyncArchitecture { room: RoomKey, architecture: Vec<u32> },
    SyncDeadUnits { room: RoomKey, dead_units: Vec<UnitId> },
    SyncTrainingStart { room: RoomKey },
    SyncTrainingStop { room: RoomKey },
    BroadcastScore { room: RoomKey, peer_id: PeerId, score: f64 },
    SendAttack {
        room: RoomKey,
        damage: u32,
        /// `None` hits every recipient.
        #[serde(default)]
        target: Option<PeerId>,
    },
    BroadcastStatus { room: RoomKey, status: PeerStatus },
    CursorMove { room: RoomKey, position: Vec3 },
    SendMessage { room: RoomKey, text: String },
}

/// Events delivered by the relay to a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerEvent {
    /// First frame of every session: the peer's own identity.
    Connected { peer_id: PeerId },
    PeerJoined { peer_id: PeerId },
    PeerLeft { peer_id: PeerId },
    RequestStateRefresh { requested_by: PeerId },
    SyncArchitecture { from: PeerId, architecture: Vec<u32> },
    SyncDeadUnits { from: PeerId, dead_units: Vec<UnitId> },
    SyncTrainingStart { from: PeerId },
    SyncTrainingStop { from: PeerId },
    BroadcastScore { peer_id: PeerId, score: f64 },
    ReceiveAttack { from: PeerId, damage: u32, target: Option<PeerId> },
    BroadcastStatus { status: PeerStatus },
    CursorMove { peer_id: PeerId, position: Vec3 },
    ReceiveMessage { from: PeerId, text: String, timestamp: String },
}

/// What the server does with one decoded [`ClientEvent`].
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Join(RoomKey),
    Relay {
        room: RoomKey,
        event: ServerEvent,
        scope: Scope,
    },
}

impl ClientEvent {
    /// Room the event is addressed to.
    pub fn room(&self) -> &RoomKey {
        match self {
            Self::JoinRoom { room }
            | Self::RequestStateRefresh { room }
            | Self::SyncArchitecture { room, .. }
            | Self::SyncDeadUnits { room, .. }
            | Self::SyncTrainingStart { room }
            | Self::SyncTrainingStop { room }
            | Self::BroadcastScore { room, .. }
            | Self::SendAttack { room, .. }
            | Self::BroadcastStatus { room, .. }
            | Self::CursorMove { room, .. }
            | Self::SendMessage { room, .. } => room,
        }
    }

    /// Wire tag, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => "join_room",
            Self::RequestStateRefresh { .. } => "request_state_refresh",
            Self::SyncArchitecture { .. } => "sync_architecture",
            Self::SyncDeadUnits { .. } => "sync_dead_units",
            Self::SyncTrainingStart { .. } => "sync_training_start",
            Self::SyncTrainingStop { .. } => "sync_training_stop",
            Self::BroadcastScore { .. } => "broadcast_score",
            Self::SendAttack { .. } => "send_attack",
            Self::BroadcastStatus { .. } => "broadcast_status",
            Self::CursorMove { .. } => "cursor_move",
            Self::SendMessage { .. } => "send_message",
        }
    }

    /// Resolve the event into a join or a relay instruction.
    ///
    /// `origin` is the session that sent the frame. `stamp` is only
    /// called for chat messages.
    pub fn route(self, origin: PeerId, stamp: impl FnOnce() -> String) -> Route {
        use Scope::{ExcludingSender, IncludingSender};

        let (room, event, scope) = match self {
            Self::JoinRoom { room } => return Route::Join(room),
            Self::RequestStateRefresh { room } => (
                room,
                ServerEvent::RequestStateRefresh { requested_by: origin },
                ExcludingSender,
            ),
            Self::SyncArchitecture { room, architecture } => (
                room,
                ServerEvent::SyncArchitecture { from: origin, architecture },
                ExcludingSender,
            ),
            Self::SyncDeadUnits { room, dead_units } => (
                room,
                ServerEvent::SyncDeadUnits { from: origin, dead_units },
                ExcludingSender,
            ),
            Self::SyncTrainingStart { room } => (
                room,
                ServerEvent::SyncTrainingStart { from: origin },
                ExcludingSender,
            ),
            Self::SyncTrainingStop { room } => (
                room,
                ServerEvent::SyncTrainingStop { from: origin },
                ExcludingSender,
            ),
            Self::BroadcastScore { room, peer_id, score } => (
                room,
                ServerEvent::BroadcastScore { peer_id, score },
                IncludingSender,
            ),
            Self::SendAttack { room, damage, target } => (
                room,
                ServerEvent::ReceiveAttack { from: origin, damage, target },
                ExcludingSender,
            ),
            Self::BroadcastStatus { room, status } => {
                (room, ServerEvent::BroadcastStatus { status }, IncludingSender)
            }
            Self::CursorMove { room, position } => (
                room,
                ServerEvent::CursorMove { peer_id: origin, position },
                ExcludingSender,
            ),
            Self::SendMessage { room, text } => (
                room,
                ServerEvent::ReceiveMessage { from: origin, text, timestamp: stamp() },
                IncludingSender,
            ),
        };

        Route::Relay { room, event, scope }
    }
}

impl ServerEvent {
    /// Wire tag, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::PeerJoined { .. } => "peer_joined",
            Self::PeerLeft { .. } => "peer_left",
            Self::RequestStateRefresh { .. } => "request_state_refresh",
            Self::SyncArchitecture { .. } => "sync_architecture",
            Self::SyncDeadUnits { .. } => "sync_dead_units",
            Self::SyncTrainingStart { .. } => "sync_training_start",
            Self::SyncTrainingStop { .. } => "sync_training_stop",
            Self::BroadcastScore { .. } => "broadcast_score",
            Self::ReceiveAttack { .. } => "receive_attack",
            Self::BroadcastStatus { .. } => "broadcast_status",
            Self::CursorMove { .. } => "cursor_move",
            Self::ReceiveMessage { .. } => "receive_message",
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Codec
// ───────────────────────────────────────────────────────────────────

/// Frame encoding used on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    /// JSON in WebSocket text frames (browser peers).
    #[default]
    Json,
    /// bincode in WebSocket binary frames (native peers).
    Binary,
}

/// JSON and bincode encoding shared by both event directions.
pub trait WireMessage: Serialize + DeserializeOwned {
    fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    fn to_binary(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    fn from_binary(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Decode(e.to_string()))?;
        Ok(msg)
    }
}

impl WireMessage for ClientEvent {}
impl WireMessage for ServerEvent {}

/// Protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("binary encode error: {0}")]
    Encode(String),
    #[error("binary decode error: {0}")]
    Decode(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("connection closed")]
    ConnectionClosed,
}
