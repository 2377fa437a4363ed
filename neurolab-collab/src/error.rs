//! Failure taxonomy of the relay core.
//!
//! None of these errors ever crosses a session boundary: the connection
//! task that hits one logs it and keeps serving, so a single misbehaving
//! peer cannot disrupt delivery to the others.

use thiserror::Error;

use crate::protocol::{PeerId, ProtocolError, RoomKey};

#[derive(Debug, Error)]
pub enum RelayError {
    /// Blank or whitespace-only room key on join. The room is not created.
    #[error("invalid room key {0:?}: a room key needs non-whitespace text")]
    InvalidRoomKey(String),

    /// A relay found no (other) members in the room. Only logged; the relay
    /// itself treats it as a no-op.
    #[error("room {0:?} has no members to deliver to")]
    UnknownDestination(RoomKey),

    /// Write to a closed or broken connection. The frame is dropped and the
    /// session is left to its own lifecycle cleanup.
    #[error("transport to peer {0} is closed")]
    TransportFailure(PeerId),

    /// The peer's outbound queue is full; the frame is dropped.
    #[error("outbound queue of peer {0} is full")]
    Backpressure(PeerId),

    /// Frame could not be decoded into a known event.
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] ProtocolError),
}
