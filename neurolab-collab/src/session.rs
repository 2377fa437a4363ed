//! Transport session handle.
//!
//! A session is one WebSocket connection. Its handle pairs the peer id
//! assigned at accept time with a bounded outbound queue that the
//! connection task drains into the socket. Enqueueing never blocks:
//! a full queue drops the new frame, a closed queue reports a transport
//! failure. A slow peer therefore never stalls fan-out to its siblings.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::RelayError;
use crate::protocol::{PeerId, ServerEvent};

/// Pre-built event shared by every destination of one fan-out.
pub type Outbound = Arc<ServerEvent>;

#[derive(Debug, Clone)]
pub struct SessionHandle {
    peer_id: PeerId,
    outbound: mpsc::Sender<Outbound>,
}

impl SessionHandle {
    /// Create a handle and the receiver its connection task drains.
    pub fn new(peer_id: PeerId, capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        (Self { peer_id, outbound }, rx)
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Queue an event for this session without waiting.
    pub fn deliver(&self, event: Outbound) -> Result<(), RelayError> {
        match self.outbound.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(RelayError::Backpressure(self.peer_id)),
            Err(TrySendError::Closed(_)) => Err(RelayError::TransportFailure(self.peer_id)),
        }
    }

    /// True once the connection task has dropped its receiver.
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> Outbound {
        Arc::new(ServerEvent::PeerJoined { peer_id: PeerId::random() })
    }

    #[tokio::test]
    async fn test_deliver_in_order() {
        let (handle, mut rx) = SessionHandle::new(PeerId::random(), 8);
        let first = event();
        let second = event();

        handle.deliver(first.clone()).unwrap();
        handle.deliver(second.clone()).unwrap();

        assert_eq!(rx.recv().await.unwrap(), first);
        assert_eq!(rx.recv().await.unwrap(), second);
    }

    #[tokio::test]
    async fn test_full_queue_drops_new() {
        let (handle, mut rx) = SessionHandle::new(PeerId::random(), 1);
        let kept = event();

        handle.deliver(kept.clone()).unwrap();
        let err = handle.deliver(event()).unwrap_err();

        assert!(matches!(err, RelayError::Backpressure(p) if p == handle.peer_id()));
        assert_eq!(rx.recv().await.unwrap(), kept);
    }

    #[tokio::test]
    async fn test_closed_session_reports_transport_failure() {
        let (handle, rx) = SessionHandle::new(PeerId::random(), 4);
        drop(rx);

        assert!(handle.is_closed());
        let err = handle.deliver(event()).unwrap_err();
        assert!(matches!(err, RelayError::TransportFailure(_)));
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let (handle, _rx) = SessionHandle::new(PeerId::random(), 0);
        assert!(handle.deliver(event()).is_ok());
    }
}
