//! Client-side reconciliation agent.
//!
//! Every peer holds a replica of the shared artifact (architecture,
//! disabled units, training flag) plus its own views of the room. The
//! server keeps none of it, so catch-up works by gossip:
//!
//! ```text
//!  B joins ──► relay ──► peer_joined ──► A.apply()
//!                                           │
//!                                           ▼
//!                                    A.snapshot() events
//!                                           │
//!  B.apply(sync_architecture, …) ◄── relay ◄┘
//! ```
//!
//! All artifact payloads are whole-value replacements, so applying one
//! twice is harmless and concurrent replies from several members resolve
//! to whichever snapshot arrives last. Combat state is owned by the peer
//! it describes; only incoming attacks change it, never another peer's
//! status broadcast.
//!
//! The agent does no I/O. [`apply`](ReconciliationAgent::apply) and the
//! local operations return the [`ClientEvent`]s the caller should send.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::combat::CombatState;
use crate::presence::{CursorThrottle, CursorView, Leaderboard, Vec3};
use crate::protocol::{ClientEvent, PeerId, PeerStatus, RoomKey, ServerEvent, UnitId};

/// Architecture a fresh client starts with.
pub const DEFAULT_ARCHITECTURE: [u32; 4] = [2, 4, 4, 1];
/// Architecture restored by [`ReconciliationAgent::reset_architecture`].
pub const RESET_ARCHITECTURE: [u32; 3] = [2, 4, 1];
/// Width of the hidden layer appended by [`ReconciliationAgent::add_layer`].
pub const ADDED_LAYER_WIDTH: u32 = 4;
pub const INPUT_WIDTH: u32 = 2;
pub const OUTPUT_WIDTH: u32 = 1;

/// Replicated state of the visualized network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedArtifact {
    /// Units per layer, input first.
    pub architecture: Vec<u32>,
    /// Sabotaged units.
    pub dead_units: BTreeSet<UnitId>,
    pub training: bool,
}

impl Default for SharedArtifact {
    fn default() -> Self {
        Self {
            architecture: DEFAULT_ARCHITECTURE.to_vec(),
            dead_units: BTreeSet::new(),
            training: false,
        }
    }
}

fn valid_architecture(architecture: &[u32]) -> bool {
    !architecture.is_empty() && architecture.iter().all(|&units| units > 0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    pub from: PeerId,
    pub text: String,
    pub timestamp: String,
}

/// Append-only chat transcript in arrival order.
#[derive(Debug, Clone, Default)]
pub struct ChatLog {
    entries: Vec<ChatEntry>,
}

impl ChatLog {
    pub fn push(&mut self, entry: ChatEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct ReconciliationAgent {
    local: PeerId,
    room: RoomKey,
    artifact: SharedArtifact,
    combat: CombatState,
    /// Last loss this peer reported.
    score: Option<f64>,
    leaderboard: Leaderboard,
    cursors: CursorView,
    chat: ChatLog,
    throttle: CursorThrottle,
}

impl ReconciliationAgent {
    pub fn new(local: PeerId, room: impl Into<RoomKey>) -> Self {
        let mut agent = Self {
            local,
            room: room.into(),
            artifact: SharedArtifact::default(),
            combat: CombatState::default(),
            score: None,
            leaderboard: Leaderboard::new(),
            cursors: CursorView::new(),
            chat: ChatLog::default(),
            throttle: CursorThrottle::default(),
        };
        agent.record_own_status();
        agent
    }

    pub fn with_combat(mut self, combat: CombatState) -> Self {
        self.combat = combat;
        self.record_own_status();
        self
    }

    pub fn with_cursor_interval(mut self, interval: Duration) -> Self {
        self.throttle = CursorThrottle::new(interval);
        self
    }

    pub fn local_peer(&self) -> PeerId {
        self.local
    }

    pub fn room(&self) -> &RoomKey {
        &self.room
    }

    pub fn artifact(&self) -> &SharedArtifact {
        &self.artifact
    }

    pub fn architecture(&self) -> &[u32] {
        &self.artifact.architecture
    }

    pub fn combat(&self) -> &CombatState {
        &self.combat
    }

    pub fn score(&self) -> Option<f64> {
        self.score
    }

    pub fn leaderboard(&self) -> &Leaderboard {
        &self.leaderboard
    }

    pub fn cursors(&self) -> &CursorView {
        &self.cursors
    }

    pub fn chat(&self) -> &ChatLog {
        &self.chat
    }

    /// This peer's status as published to the room.
    pub fn status(&self) -> PeerStatus {
        self.combat.status(self.local, self.score)
    }

    /// Events that replay this peer's full view to the room.
    pub fn snapshot(&self) -> Vec<ClientEvent> {
        let room = self.room.clone();
        let mut events = vec![
            ClientEvent::SyncArchitecture {
                room: room.clone(),
                architecture: self.artifact.architecture.clone(),
            },
            ClientEvent::SyncDeadUnits {
                room: room.clone(),
                dead_units: self.artifact.dead_units.iter().copied().collect(),
            },
            self.training_event(),
        ];
        if let Some(score) = self.score {
            events.push(ClientEvent::BroadcastScore { room: room.clone(), peer_id: self.local, score });
        }
        events.push(ClientEvent::BroadcastStatus { room, status: self.status() });
        events
    }

    /// Apply one inbound event and return what this peer must send back.
    pub fn apply(&mut self, event: &ServerEvent) -> Vec<ClientEvent> {
        match event {
            ServerEvent::Connected { .. } => Vec::new(),

            ServerEvent::PeerJoined { peer_id } => {
                if *peer_id == self.local {
                    // Welcome echo of our own join.
                    return Vec::new();
                }
                log::debug!("Peer {peer_id} joined {:?}; re-announcing state", self.room);
                self.snapshot()
            }

            ServerEvent::RequestStateRefresh { requested_by } => {
                if *requested_by == self.local {
                    return Vec::new();
                }
                self.snapshot()
            }

            ServerEvent::PeerLeft { peer_id } => {
                self.leaderboard.remove(peer_id);
                self.cursors.remove(peer_id);
                Vec::new()
            }

            ServerEvent::SyncArchitecture { from, architecture } => {
                if valid_architecture(architecture) {
                    self.artifact.architecture = architecture.clone();
                } else {
                    log::warn!("Ignoring invalid architecture {architecture:?} from {from}");
                }
                Vec::new()
            }

            ServerEvent::SyncDeadUnits { dead_units, .. } => {
                self.artifact.dead_units = dead_units.iter().copied().collect();
                Vec::new()
            }

            ServerEvent::SyncTrainingStart { from } => {
                log::info!("Peer {from} started training in {:?}", self.room);
                self.artifact.training = true;
                Vec::new()
            }

            ServerEvent::SyncTrainingStop { .. } => {
                self.artifact.training = false;
                Vec::new()
            }

            ServerEvent::BroadcastScore { peer_id, score } => {
                if *peer_id != self.local {
                    self.leaderboard.record_score(*peer_id, *score);
                }
                Vec::new()
            }

            ServerEvent::BroadcastStatus { status } => {
                // Our own entry only ever comes from local state.
                if status.peer_id != self.local {
                    self.leaderboard.record_status(status.clone());
                }
                Vec::new()
            }

            ServerEvent::ReceiveAttack { from, damage, target } => {
                if *from == self.local || target.is_some_and(|t| t != self.local) {
                    return Vec::new();
                }
                let report = self.combat.apply_damage(*damage);
                if !report.changed() {
                    return Vec::new();
                }
                if report.died {
                    log::info!("Peer {} was killed by {from}", self.local);
                }
                self.record_own_status();
                vec![ClientEvent::BroadcastStatus { room: self.room.clone(), status: self.status() }]
            }

            ServerEvent::CursorMove { peer_id, position } => {
                if *peer_id != self.local {
                    self.cursors.update(*peer_id, *position);
                }
                Vec::new()
            }

            ServerEvent::ReceiveMessage { from, text, timestamp } => {
                self.chat.push(ChatEntry {
                    from: *from,
                    text: text.clone(),
                    timestamp: timestamp.clone(),
                });
                Vec::new()
            }
        }
    }

    // ── Local operations ─────────────────────────────────────────

    /// Replace the architecture. `None` if it has an empty layer or no layers.
    pub fn set_architecture(&mut self, architecture: Vec<u32>) -> Option<ClientEvent> {
        if !valid_architecture(&architecture) {
            return None;
        }
        self.artifact.architecture = architecture.clone();
        Some(ClientEvent::SyncArchitecture { room: self.room.clone(), architecture })
    }

    /// Append one hidden layer. Input and output layers are reset to the
    /// arena's fixed sizes, so `[3, 5, 2]` becomes `[2, 5, 4, 1]`.
    pub fn add_layer(&mut self) -> Option<ClientEvent> {
        let current = &self.artifact.architecture;
        let hidden = current.get(1..current.len().saturating_sub(1)).unwrap_or_default();

        let mut architecture = Vec::with_capacity(hidden.len() + 3);
        architecture.push(INPUT_WIDTH);
        architecture.extend_from_slice(hidden);
        architecture.push(ADDED_LAYER_WIDTH);
        architecture.push(OUTPUT_WIDTH);
        self.set_architecture(architecture)
    }

    pub fn reset_architecture(&mut self) -> Option<ClientEvent> {
        self.set_architecture(RESET_ARCHITECTURE.to_vec())
    }

    /// Disable a unit, or re-enable it if already disabled.
    pub fn toggle_unit(&mut self, unit: UnitId) -> ClientEvent {
        if !self.artifact.dead_units.remove(&unit) {
            self.artifact.dead_units.insert(unit);
        }
        self.dead_units_event()
    }

    pub fn restore_all_units(&mut self) -> ClientEvent {
        self.artifact.dead_units.clear();
        self.dead_units_event()
    }

    fn dead_units_event(&self) -> ClientEvent {
        ClientEvent::SyncDeadUnits {
            room: self.room.clone(),
            dead_units: self.artifact.dead_units.iter().copied().collect(),
        }
    }

    pub fn start_training(&mut self) -> ClientEvent {
        self.artifact.training = true;
        self.training_event()
    }

    pub fn finish_training(&mut self) -> ClientEvent {
        self.artifact.training = false;
        self.training_event()
    }

    /// The training flag as a whole value: start or stop, never absent.
    fn training_event(&self) -> ClientEvent {
        let room = self.room.clone();
        if self.artifact.training {
            ClientEvent::SyncTrainingStart { room }
        } else {
            ClientEvent::SyncTrainingStop { room }
        }
    }

    /// Publish a new loss value.
    pub fn report_score(&mut self, score: f64) -> ClientEvent {
        self.score = Some(score);
        self.record_own_status();
        ClientEvent::BroadcastScore { room: self.room.clone(), peer_id: self.local, score }
    }

    /// Attack the room, or one peer. Dead peers cannot attack.
    pub fn attack(&self, damage: u32, target: Option<PeerId>) -> Option<ClientEvent> {
        if self.combat.is_dead() {
            return None;
        }
        Some(ClientEvent::SendAttack { room: self.room.clone(), damage, target })
    }

    /// Report the local cursor, subject to the rate limit.
    pub fn move_cursor(&mut self, position: Vec3) -> Option<ClientEvent> {
        self.throttle
            .ready()
            .then(|| ClientEvent::CursorMove { room: self.room.clone(), position })
    }

    /// Chat message; shows up in the log once the relay echoes it back.
    pub fn say(&self, text: impl Into<String>) -> Option<ClientEvent> {
        let text = text.into();
        if text.trim().is_empty() {
            return None;
        }
        Some(ClientEvent::SendMessage { room: self.room.clone(), text })
    }

    fn record_own_status(&mut self) {
        let status = self.status();
        self.leaderboard.record_status(status);
    }
}
