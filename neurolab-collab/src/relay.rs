//! Fan-out of one event to the members of a room.
//!
//! The destination set is read from the [`RoomRegistry`] at call time.
//! The event is wrapped in an `Arc` once and queued on every destination
//! without waiting: delivery is best-effort, at most once, and never
//! acknowledged. Per-destination failures (full queue, closed socket) are
//! counted and logged but never abort the rest of the fan-out.
//!
//! Ordering: one sender's events are relayed sequentially by its
//! connection task and each destination queue is FIFO, so a destination
//! sees a given sender's events in send order. Nothing orders events from
//! different senders.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::RelayError;
use crate::protocol::{PeerId, RoomKey, Scope, ServerEvent};
use crate::registry::RoomRegistry;

/// Statistics for monitoring relay health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Relay calls that found at least one destination.
    pub events_relayed: u64,
    pub deliveries: u64,
    /// Dropped because the destination queue was full.
    pub dropped_backpressure: u64,
    /// Dropped because the destination connection was already closed.
    pub dropped_closed: u64,
}

/// Lock-free counters behind [`RelayStats`].
#[derive(Default)]
struct AtomicRelayStats {
    events_relayed: AtomicU64,
    deliveries: AtomicU64,
    dropped_backpressure: AtomicU64,
    dropped_closed: AtomicU64,
}

/// What happened to one relayed event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayOutcome {
    pub delivered: Vec<PeerId>,
    pub dropped: Vec<PeerId>,
    pub closed: Vec<PeerId>,
}

pub struct EventRelay {
    registry: Arc<RoomRegistry>,
    stats: AtomicRelayStats,
}

impl EventRelay {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self { registry, stats: AtomicRelayStats::default() }
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// Deliver `event` to the room, with or without the sender.
    ///
    /// A room with nobody to receive the event is a no-op: the outcome is
    /// empty and nothing is counted.
    pub async fn relay(
        &self,
        event: ServerEvent,
        sender: PeerId,
        room: &RoomKey,
        scope: Scope,
    ) -> Result<RelayOutcome, RelayError> {
        let excluding = match scope {
            Scope::ExcludingSender => Some(sender),
            Scope::IncludingSender => None,
        };

        let name = event.name();
        let targets = self.registry.members(room, excluding).await;
        if targets.is_empty() {
            log::trace!("Not relaying {name}: {}", RelayError::UnknownDestination(room.clone()));
            return Ok(RelayOutcome::default());
        }

        let event = Arc::new(event);
        let mut outcome = RelayOutcome::default();

        for target in &targets {
            match target.deliver(event.clone()) {
                Ok(()) => outcome.delivered.push(target.peer_id()),
                Err(RelayError::Backpressure(peer)) => {
                    log::warn!("Dropping {name} for {peer}: outbound queue full");
                    outcome.dropped.push(peer);
                }
                Err(e) => {
                    log::debug!("Dropping {name}: {e}");
                    outcome.closed.push(target.peer_id());
                }
            }
        }

        self.stats.events_relayed.fetch_add(1, Ordering::Relaxed);
        self.stats
            .deliveries
            .fetch_add(outcome.delivered.len() as u64, Ordering::Relaxed);
        self.stats
            .dropped_backpressure
            .fetch_add(outcome.dropped.len() as u64, Ordering::Relaxed);
        self.stats
            .dropped_closed
            .fetch_add(outcome.closed.len() as u64, Ordering::Relaxed);

        log::trace!(
            "Relayed {name} from {sender} in room {room:?} to {} peers",
            outcome.delivered.len()
        );

        Ok(outcome)
    }

    /// Snapshot of the relay counters.
    pub fn stats(&self) -> RelayStats {
        RelayStats {
            events_relayed: self.stats.events_relayed.load(Ordering::Relaxed),
            deliveries: self.stats.deliveries.load(Ordering::Relaxed),
            dropped_backpressure: self.stats.dropped_backpressure.load(Ordering::Relaxed),
            dropped_closed: self.stats.dropped_closed.load(Ordering::Relaxed),
        }
    }
}
