//! Room membership registry
//!
//! The only shared mutable state in the relay. A single mutex guards the whole
//! map; membership changes are rare next to message volume, and the fan-out
//! path only holds the lock long enough to clone a snapshot of the room.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;

use crate::connection::{ConnectionId, PeerHandle};

#[derive(Debug)]
struct Room {
    members: HashMap<ConnectionId, PeerHandle>,
    created_at: Instant,
}

impl Room {
    fn new() -> Self {
        Self {
            members: HashMap::new(),
            created_at: Instant::now(),
        }
    }
}

/// Result of registering a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    pub room_created: bool,
    pub members: usize,
}

/// Result of removing a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub removed: bool,
    pub room_discarded: bool,
    pub remaining: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomSummary {
    pub name: String,
    pub members: usize,
    pub age_secs: u64,
}

#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, Room>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to its room, creating the room on first use
    pub fn join(&self, peer: PeerHandle) -> JoinOutcome {
        let mut rooms = self.rooms.lock();
        let mut room_created = false;

        let room = rooms.entry(peer.room().to_string()).or_insert_with(|| {
            room_created = true;
            Room::new()
        });
        room.members.insert(peer.id(), peer);

        JoinOutcome {
            room_created,
            members: room.members.len(),
        }
    }

    /// Remove a connection. An emptied room is dropped.
    pub fn leave(&self, room_name: &str, id: ConnectionId) -> LeaveOutcome {
        let mut rooms = self.rooms.lock();

        let Some(room) = rooms.get_mut(room_name) else {
            return LeaveOutcome {
                removed: false,
                room_discarded: false,
                remaining: 0,
            };
        };

        let removed = room.members.remove(&id).is_some();
        let remaining = room.members.len();
        let room_discarded = remaining == 0;

        if room_discarded {
            rooms.remove(room_name);
        }

        LeaveOutcome {
            removed,
            room_discarded,
            remaining,
        }
    }

    /// Snapshot of every member of `room_name` except `exclude`.
    ///
    /// The lock is released before the caller iterates, so a disconnect during
    /// fan-out only affects later snapshots.
    pub fn peers_except(&self, room_name: &str, exclude: ConnectionId) -> Vec<PeerHandle> {
        let rooms = self.rooms.lock();
        rooms
            .get(room_name)
            .map(|room| {
                room.members
                    .values()
                    .filter(|peer| peer.id() != exclude)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn contains(&self, room_name: &str, id: ConnectionId) -> bool {
        self.rooms
            .lock()
            .get(room_name)
            .is_some_and(|room| room.members.contains_key(&id))
    }

    pub fn member_count(&self, room_name: &str) -> usize {
        self.rooms
            .lock()
            .get(room_name)
            .map_or(0, |room| room.members.len())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.lock().len()
    }

    pub fn connection_count(&self) -> usize {
        self.rooms.lock().values().map(|room| room.members.len()).sum()
    }

    pub fn summaries(&self) -> Vec<RoomSummary> {
        let rooms = self.rooms.lock();
        let mut summaries: Vec<RoomSummary> = rooms
            .iter()
            .map(|(name, room)| RoomSummary {
                name: name.clone(),
                members: room.members.len(),
                age_secs: room.created_at.elapsed().as_secs(),
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn peer(room: &str) -> PeerHandle {
        let (tx, _rx) = mpsc::channel(8);
        PeerHandle::new(room.to_string(), tx)
    }

    #[test]
    fn test_join_creates_room_once() {
        let registry = RoomRegistry::new();

        let first = registry.join(peer("doc-1"));
        assert!(first.room_created);
        assert_eq!(first.members, 1);

        let second = registry.join(peer("doc-1"));
        assert!(!second.room_created);
        assert_eq!(second.members, 2);

        assert_eq!(registry.room_count(), 1);
        assert_eq!(registry.connection_count(), 2);
    }

    #[test]
    fn test_leave_discards_empty_room() {
        let registry = RoomRegistry::new();
        let a = peer("doc-1");
        let b = peer("doc-1");
        registry.join(a.clone());
        registry.join(b.clone());

        let outcome = registry.leave("doc-1", a.id());
        assert!(outcome.removed);
        assert!(!outcome.room_discarded);
        assert_eq!(outcome.remaining, 1);

        let outcome = registry.leave("doc-1", b.id());
        assert!(outcome.room_discarded);
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn test_leave_unknown_is_noop() {
        let registry = RoomRegistry::new();
        let a = peer("doc-1");
        registry.join(a.clone());

        let outcome = registry.leave("doc-2", a.id());
        assert!(!outcome.removed);

        let outcome = registry.leave("doc-1", ConnectionId::new());
        assert!(!outcome.removed);
        assert_eq!(outcome.remaining, 1);
        assert!(registry.contains("doc-1", a.id()));
    }

    #[test]
    fn test_peers_except_is_room_scoped() {
        let registry = RoomRegistry::new();
        let a = peer("doc-1");
        let b = peer("doc-1");
        let c = peer("doc-2");
        registry.join(a.clone());
        registry.join(b.clone());
        registry.join(c.clone());

        let peers = registry.peers_except("doc-1", a.id());
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].id(), b.id());

        assert!(registry.peers_except("missing", a.id()).is_empty());
    }

    #[test]
    fn test_snapshot_survives_removal() {
        let registry = RoomRegistry::new();
        let a = peer("doc-1");
        let b = peer("doc-1");
        registry.join(a.clone());
        registry.join(b.clone());

        let snapshot = registry.peers_except("doc-1", a.id());
        registry.leave("doc-1", b.id());

        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.member_count("doc-1"), 1);
    }

    #[test]
    fn test_summaries_sorted() {
        let registry = RoomRegistry::new();
        registry.join(peer("zeta"));
        registry.join(peer("alpha"));
        registry.join(peer("alpha"));

        let summaries = registry.summaries();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].name, "alpha");
        assert_eq!(summaries[0].members, 2);
        assert_eq!(summaries[1].name, "zeta");
    }
}
