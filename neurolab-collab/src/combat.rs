//! Self-authoritative combat state.
//!
//! Each peer owns its own health and shield and is the only one that
//! ever decrements them, in response to `receive_attack` events. Damage
//! is resolved shield-first:
//!
//! ```text
//! absorbed  = min(shield, damage)
//! shield   -= absorbed
//! health   -= damage - absorbed    (clamped at 0, 0 ⇒ Dead)
//! ```
//!
//! `Dead` is terminal. Nothing here is validated by the server; the
//! model trusts peers and is not safe against adversarial clients.

use crate::protocol::{LifeState, PeerId, PeerStatus};

pub const MAX_HEALTH: u32 = 100;
pub const DEFAULT_SHIELD: u32 = 50;

/// Outcome of one [`CombatState::apply_damage`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DamageReport {
    /// Damage soaked by the shield.
    pub absorbed: u32,
    /// Damage taken from health (after clamping).
    pub dealt: u32,
    /// This hit moved the peer from alive to dead.
    pub died: bool,
}

impl DamageReport {
    /// True when health, shield or life state changed.
    pub fn changed(&self) -> bool {
        self.absorbed > 0 || self.dealt > 0 || self.died
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CombatState {
    health: u32,
    shield: u32,
    state: LifeState,
}

impl CombatState {
    pub fn new(health: u32, shield: u32) -> Self {
        let state = if health == 0 { LifeState::Dead } else { LifeState::Alive };
        Self { health, shield, state }
    }

    pub fn health(&self) -> u32 {
        self.health
    }

    pub fn shield(&self) -> u32 {
        self.shield
    }

    pub fn state(&self) -> LifeState {
        self.state
    }

    pub fn is_dead(&self) -> bool {
        self.state == LifeState::Dead
    }

    /// Resolve an incoming hit. A dead peer ignores further damage.
    pub fn apply_damage(&mut self, damage: u32) -> DamageReport {
        if self.is_dead() {
            return DamageReport::default();
        }

        let absorbed = self.shield.min(damage);
        self.shield -= absorbed;

        let remaining = damage - absorbed;
        let dealt = remaining.min(self.health);
        self.health -= dealt;

        let died = self.health == 0;
        if died {
            self.state = LifeState::Dead;
        }

        DamageReport { absorbed, dealt, died }
    }

    /// Status object published to the room.
    pub fn status(&self, peer_id: PeerId, score: Option<f64>) -> PeerStatus {
        PeerStatus {
            peer_id,
            health: self.health,
            shield: self.shield,
            state: self.state,
            score,
        }
    }
}

impl Default for CombatState {
    fn default() -> Self {
        Self::new(MAX_HEALTH, DEFAULT_SHIELD)
    }
}
