//! Presence views kept by every peer: remote cursors and the leaderboard.
//!
//! ```text
//! Local pointer move
//!       │
//!       ▼
//! CursorThrottle::ready()   (rate-limited: 30fps)
//!       │
//!       ▼
//! cursor_move ──► relay ──► remote CursorView::update()
//! ```
//!
//! Both views are keyed by [`PeerId`] and pruned when a `peer_left`
//! notification for that peer arrives. Neither view validates the
//! declared origin of an update.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::protocol::{PeerId, PeerStatus};

// ───────────────────────────────────────────────────────────────────
// Core types
// ───────────────────────────────────────────────────────────────────

/// 3D position in scene coordinates. Travels as `[x, y, z]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 3]", into = "[f32; 3]")]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Vec3) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

impl Default for Vec3 {
    fn default() -> Self {
        Self::ZERO
    }
}

impl From<[f32; 3]> for Vec3 {
    fn from([x, y, z]: [f32; 3]) -> Self {
        Self { x, y, z }
    }
}

impl From<Vec3> for [f32; 3] {
    fn from(v: Vec3) -> Self {
        [v.x, v.y, v.z]
    }
}

// ───────────────────────────────────────────────────────────────────
// Cursor view
// ───────────────────────────────────────────────────────────────────

/// Last reported cursor position of every remote peer.
#[derive(Debug, Clone, Default)]
pub struct CursorView {
    cursors: HashMap<PeerId, Vec3>,
}

impl CursorView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the peer's position. Returns the previous one.
    pub fn update(&mut self, peer: PeerId, position: Vec3) -> Option<Vec3> {
        self.cursors.insert(peer, position)
    }

    pub fn remove(&mut self, peer: &PeerId) -> Option<Vec3> {
        self.cursors.remove(peer)
    }

    pub fn get(&self, peer: &PeerId) -> Option<Vec3> {
        self.cursors.get(peer).copied()
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.cursors.contains_key(peer)
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PeerId, &Vec3)> {
        self.cursors.iter()
    }
}

// ───────────────────────────────────────────────────────────────────
// Leaderboard
// ───────────────────────────────────────────────────────────────────

/// What is known about one peer's standing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Standing {
    /// Last broadcast score (training loss).
    pub score: Option<f64>,
    /// Last broadcast combat status.
    pub status: Option<PeerStatus>,
}

/// Per-peer score/status table, held redundantly by every agent.
#[derive(Debug, Clone, Default)]
pub struct Leaderboard {
    entries: HashMap<PeerId, Standing>,
}

impl Leaderboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_score(&mut self, peer: PeerId, score: f64) {
        self.entries.entry(peer).or_default().score = Some(score);
    }

    /// Store a status object under the peer it describes.
    pub fn record_status(&mut self, status: PeerStatus) {
        let entry = self.entries.entry(status.peer_id).or_default();
        if let Some(score) = status.score {
            entry.score = Some(score);
        }
        entry.status = Some(status);
    }

    pub fn remove(&mut self, peer: &PeerId) -> Option<Standing> {
        self.entries.remove(peer)
    }

    pub fn get(&self, peer: &PeerId) -> Option<&Standing> {
        self.entries.get(peer)
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.entries.contains_key(peer)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries with a score, lowest loss first.
    pub fn ranked(&self) -> Vec<(PeerId, f64)> {
        let mut ranked: Vec<(PeerId, f64)> = self
            .entries
            .iter()
            .filter_map(|(peer, standing)| standing.score.map(|s| (*peer, s)))
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
        ranked
    }
}

// ───────────────────────────────────────────────────────────────────
// Outgoing cursor rate limit
// ───────────────────────────────────────────────────────────────────

/// Rate limiter for outgoing cursor moves (default 33ms = 30fps).
#[derive(Debug, Clone)]
pub struct CursorThrottle {
    interval: Duration,
    last_broadcast: Option<Instant>,
}

impl CursorThrottle {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(33);

    pub fn new(interval: Duration) -> Self {
        Self { interval, last_broadcast: None }
    }

    /// Returns `true` and arms the limiter if a broadcast may go out now.
    pub fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last_broadcast {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last_broadcast = Some(now);
                true
            }
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for CursorThrottle {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INTERVAL)
    }
}
