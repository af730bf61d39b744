//! Connection identity, lifecycle state and the opaque update payload
//!
//! A connection moves `Connecting -> Open -> Closed` exactly once. The state
//! lives in an atomic cell shared between the socket task and every snapshot
//! of the room membership, so the fan-out loop can see a peer close mid-broadcast
//! without taking the registry lock. Closing also wakes anyone parked in
//! [`PeerHandle::closed`], which is how a socket task learns that the relay
//! closed its connection.

use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use crate::error::PeerSendFailure;

/// Unique identity of a single client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            _ => ConnectionState::Closed,
        }
    }
}

/// Shared lifecycle cell for one connection
#[derive(Debug, Clone)]
pub struct StateCell {
    state: Arc<AtomicU8>,
    closed: Arc<Notify>,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(ConnectionState::Connecting as u8)),
            closed: Arc::new(Notify::new()),
        }
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// `Connecting -> Open`. Returns false if the connection was not connecting.
    pub fn open(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Connecting as u8,
                ConnectionState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Moves to `Closed` from any state. Returns true only for the call that
    /// performed the transition.
    pub fn close(&self) -> bool {
        let transitioned =
            self.state.swap(ConnectionState::Closed as u8, Ordering::AcqRel) != ConnectionState::Closed as u8;
        if transitioned {
            self.closed.notify_waiters();
        }
        transitioned
    }

    /// Resolves once the cell is `Closed`
    pub async fn closed(&self) {
        // Registered before the state check so a concurrent close is not missed
        let notified = self.closed.notified();
        if self.get() == ConnectionState::Closed {
            return;
        }
        notified.await;
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// An opaque update as received from a client.
///
/// The frame kind is kept so the update goes back out exactly as it came in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateMessage {
    Binary(Bytes),
    Text(String),
}

impl UpdateMessage {
    pub fn binary(data: impl Into<Bytes>) -> Self {
        UpdateMessage::Binary(data.into())
    }

    pub fn text(data: impl Into<String>) -> Self {
        UpdateMessage::Text(data.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            UpdateMessage::Binary(data) => data,
            UpdateMessage::Text(text) => text.as_bytes(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> &'static str {
        match self {
            UpdateMessage::Binary(_) => "binary",
            UpdateMessage::Text(_) => "text",
        }
    }
}

impl From<UpdateMessage> for axum::extract::ws::Message {
    fn from(update: UpdateMessage) -> Self {
        match update {
            UpdateMessage::Binary(data) => axum::extract::ws::Message::Binary(data.to_vec()),
            UpdateMessage::Text(text) => axum::extract::ws::Message::Text(text),
        }
    }
}

/// Relay-side handle to one connection: identity, room, lifecycle and the
/// sending half of its outbound queue.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    id: ConnectionId,
    room: String,
    state: StateCell,
    outbound: mpsc::Sender<UpdateMessage>,
}

impl PeerHandle {
    pub fn new(room: String, outbound: mpsc::Sender<UpdateMessage>) -> Self {
        Self {
            id: ConnectionId::new(),
            room,
            state: StateCell::new(),
            outbound,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub(crate) fn state_cell(&self) -> &StateCell {
        &self.state
    }

    /// Resolves once this connection is `Closed`, whoever closed it
    pub async fn closed(&self) {
        self.state.closed().await
    }

    /// Queue an update without waiting. A full or closed queue is reported,
    /// never retried.
    pub fn try_deliver(&self, update: UpdateMessage) -> Result<(), PeerSendFailure> {
        self.outbound.try_send(update).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PeerSendFailure::QueueFull,
            mpsc::error::TrySendError::Closed(_) => PeerSendFailure::Closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let state = StateCell::new();
        assert_eq!(state.get(), ConnectionState::Connecting);

        assert!(state.open());
        assert_eq!(state.get(), ConnectionState::Open);

        // No second open
        assert!(!state.open());

        assert!(state.close());
        assert_eq!(state.get(), ConnectionState::Closed);
        assert!(!state.close());

        // Closed is terminal
        assert!(!state.open());
        assert_eq!(state.get(), ConnectionState::Closed);
    }

    #[test]
    fn test_close_before_open() {
        let state = StateCell::new();
        assert!(state.close());
        assert!(!state.open());
        assert_eq!(state.get(), ConnectionState::Closed);
    }

    #[test]
    fn test_state_shared_between_clones() {
        let (tx, _rx) = mpsc::channel(1);
        let peer = PeerHandle::new("doc-1".to_string(), tx);
        let snapshot = peer.clone();

        peer.state_cell().open();
        assert_eq!(snapshot.state(), ConnectionState::Open);
        assert_eq!(snapshot.id(), peer.id());
    }

    #[tokio::test]
    async fn test_closed_wakes_waiter() {
        let state = StateCell::new();
        state.open();

        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.closed().await })
        };
        tokio::task::yield_now().await;

        assert!(state.close());
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("waiter not woken")
            .unwrap();

        // Already closed resolves immediately
        state.closed().await;
    }

    #[test]
    fn test_try_deliver_reports_full_and_closed() {
        let (tx, rx) = mpsc::channel(1);
        let peer = PeerHandle::new("doc-1".to_string(), tx);

        assert!(peer.try_deliver(UpdateMessage::binary(vec![1u8])).is_ok());
        assert_eq!(
            peer.try_deliver(UpdateMessage::binary(vec![2u8])),
            Err(PeerSendFailure::QueueFull)
        );

        drop(rx);
        assert_eq!(
            peer.try_deliver(UpdateMessage::binary(vec![3u8])),
            Err(PeerSendFailure::Closed)
        );
    }

    #[test]
    fn test_update_message_bytes() {
        let update = UpdateMessage::binary(vec![0xDE, 0xAD]);
        assert_eq!(update.as_bytes(), &[0xDE, 0xAD]);
        assert_eq!(update.len(), 2);
        assert_eq!(update.kind(), "binary");

        let text = UpdateMessage::text("hello");
        assert_eq!(text.as_bytes(), b"hello");
        assert_eq!(text.kind(), "text");
        assert!(UpdateMessage::binary(Vec::<u8>::new()).is_empty());
    }

    #[test]
    fn test_connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }
}
