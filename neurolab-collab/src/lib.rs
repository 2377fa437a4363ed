//! # neurolab-collab: Room-scoped event relay for the NeuroLab arena
//!
//! Browser clients visualize and train a small neural network together.
//! The server relays events between the members of a room and keeps no
//! copy of the shared network; peers converge by re-announcing their state
//! whenever someone joins.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐   WebSocket    ┌──────────────────────┐
//! │ ReconciliationAgent  │   JSON/binary  │ RelayServer          │
//! │ + RelayClient        │ ◄────────────► │ (connection task per │
//! │ (per peer, owns the  │                │  peer, PeerLifecycle)│
//! │  artifact replica)   │                └──────────┬───────────┘
//! └──────────────────────┘                           │
//!                                                    ▼
//!                                          ┌───────────────────┐
//!                                          │ EventRelay        │
//!                                          │ (fan-out, drop on │
//!                                          │  backpressure)    │
//!                                          └─────────┬─────────┘
//!                                                    ▼
//!                                          ┌───────────────────┐
//!                                          │ RoomRegistry      │
//!                                          │ room → sessions   │
//!                                          └───────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Wire events, room keys, JSON and bincode framing
//! - [`error`]: Relay error type
//! - [`session`]: Per-connection outbound queue
//! - [`registry`]: Room membership
//! - [`relay`]: Fan-out to room members
//! - [`lifecycle`]: Join/leave notifications
//! - [`server`]: WebSocket relay server and its configuration
//! - [`client`]: WebSocket client handle
//! - [`agent`]: Client-side reconciliation of the shared network
//! - [`combat`]: Health and shield resolution
//! - [`presence`]: Cursors, leaderboard, cursor rate limiting

pub mod protocol;
pub mod error;
pub mod session;
pub mod registry;
pub mod relay;
pub mod lifecycle;
pub mod server;
pub mod client;
pub mod agent;
pub mod combat;
pub mod presence;

// Re-exports for convenience
pub use protocol::{
    ClientEvent, LifeState, PeerId, PeerStatus, ProtocolError, RoomKey, Route, Scope,
    ServerEvent, UnitId, WireFormat, WireMessage,
};
pub use error::RelayError;
pub use session::SessionHandle;
pub use registry::{JoinOutcome, RoomRegistry};
pub use relay::{EventRelay, RelayOutcome, RelayStats};
pub use lifecycle::{JoinNotice, PeerLifecycle, PeerPhase};
pub use server::{ConfigError, RelayServer, ServerConfig, ServerStats};
pub use client::{ConnectionState, RelayClient};
pub use agent::{ChatEntry, ChatLog, ReconciliationAgent, SharedArtifact};
pub use combat::{CombatState, DamageReport};
pub use presence::{CursorThrottle, CursorView, Leaderboard, Standing, Vec3};
