//! Per-connection handle shared between a gateway task and the registry.

use axum::extract::ws::Utf8Bytes;
use relay_common::{ConnectionId, RoomId, UserId};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

use crate::error::RelayError;

/// Close codes sent to clients.
pub const CLOSE_GOING_AWAY: u16 = 1001;
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;
pub const CLOSE_KICKED: u16 = 4003;

/// Why and how a connection must be closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnect {
    pub code: u16,
    pub reason: String,
}

/// The registry's view of one connection.
///
/// It holds only the sending halves of the connection's outbound queue and
/// disconnect signal; the transport itself stays with the gateway task.
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub room_id: RoomId,
    pub user_id: UserId,
    outbound: mpsc::Sender<Utf8Bytes>,
    disconnect: watch::Sender<Option<Disconnect>>,
}

/// Receiving halves, owned by the gateway task.
pub struct ConnectionInbox {
    pub outbound: mpsc::Receiver<Utf8Bytes>,
    pub disconnect: watch::Receiver<Option<Disconnect>>,
}

impl ConnectionHandle {
    pub fn new(room_id: RoomId, user_id: UserId, queue_capacity: usize) -> (Self, ConnectionInbox) {
        let (outbound_tx, outbound_rx) = mpsc::channel(queue_capacity.max(1));
        let (disconnect_tx, disconnect_rx) = watch::channel(None);
        let handle = Self {
            id: relay_common::id::connection_id(),
            room_id,
            user_id,
            outbound: outbound_tx,
            disconnect: disconnect_tx,
        };
        let inbox = ConnectionInbox {
            outbound: outbound_rx,
            disconnect: disconnect_rx,
        };
        (handle, inbox)
    }

    /// Queue a text frame without waiting.
    pub fn deliver(&self, payload: Utf8Bytes) -> Result<(), RelayError> {
        self.outbound.try_send(payload).map_err(|err| RelayError::PeerDelivery {
            connection_id: self.id.clone(),
            overflow: matches!(err, TrySendError::Full(_)),
        })
    }

    /// Ask the gateway task to close the transport. Only the first request
    /// wins; returns whether this call was it.
    pub fn request_disconnect(&self, code: u16, reason: &str) -> bool {
        self.disconnect.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(Disconnect {
                code,
                reason: reason.to_string(),
            });
            true
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_ids_are_prefixed() {
        let (handle, _inbox) = ConnectionHandle::new(1, 2, 4);
        assert!(handle.id.starts_with("conn_"));
        assert_eq!(handle.room_id, 1);
        assert_eq!(handle.user_id, 2);
    }

    #[test]
    fn deliver_reports_overflow() {
        let (handle, _inbox) = ConnectionHandle::new(1, 2, 1);
        handle.deliver(Utf8Bytes::from("a")).unwrap();

        match handle.deliver(Utf8Bytes::from("b")) {
            Err(RelayError::PeerDelivery { overflow, .. }) => assert!(overflow),
            other => panic!("expected overflow, got {other:?}"),
        }
    }

    #[test]
    fn deliver_reports_closed_peer() {
        let (handle, inbox) = ConnectionHandle::new(1, 2, 4);
        drop(inbox);

        match handle.deliver(Utf8Bytes::from("a")) {
            Err(RelayError::PeerDelivery { overflow, .. }) => assert!(!overflow),
            other => panic!("expected closed peer, got {other:?}"),
        }
    }

    #[test]
    fn first_disconnect_request_wins() {
        let (handle, inbox) = ConnectionHandle::new(1, 2, 4);

        assert!(handle.request_disconnect(CLOSE_KICKED, "blocked"));
        assert!(!handle.request_disconnect(CLOSE_GOING_AWAY, "shutdown"));

        let current = inbox.disconnect.borrow().clone().unwrap();
        assert_eq!(current.code, CLOSE_KICKED);
        assert_eq!(current.reason, "blocked");
    }
}
