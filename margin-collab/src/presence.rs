//! Ephemeral collaborator presence: cursors and selections.
//!
//! Presence is advisory, never authoritative: it is applied with
//! unconditional last-arrival-wins, never persisted, never part of the
//! undo/redo timeline, and excluded from the document's convergence
//! guarantees. Disconnected collaborators are evicted on a TTL so they do
//! not linger forever in presence UI.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::element::Color;
use crate::protocol::{replica_color, CursorPos, OpPayload, Operation, ReplicaInfo};

/// Last-known state of one remote collaborator.
#[derive(Debug, Clone)]
pub struct Collaborator {
    pub replica_id: Uuid,
    pub name: String,
    pub color: Color,
    pub cursor: Option<CursorPos>,
    pub selection: Vec<Uuid>,
    last_seen: Instant,
}

impl Collaborator {
    fn new(replica_id: Uuid, name: String, color: Color) -> Self {
        Self {
            replica_id,
            name,
            color,
            cursor: None,
            selection: Vec::new(),
            last_seen: Instant::now(),
        }
    }

    /// Placeholder for a peer whose presence arrived before its
    /// announcement.
    fn placeholder(replica_id: Uuid) -> Self {
        Self::new(
            replica_id,
            format!("Peer-{}", &replica_id.to_string()[..8]),
            replica_color(replica_id),
        )
    }

    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }

    pub fn time_since_seen(&self) -> Duration {
        self.last_seen.elapsed()
    }
}

/// Tracks all remote collaborators plus the local cursor throttle.
pub struct PresenceTracker {
    local_replica: Uuid,
    peers: HashMap<Uuid, Collaborator>,
    idle_timeout: Duration,
    /// Rate limiter for outgoing cursor updates (30fps by default).
    cursor_interval: Duration,
    last_cursor_broadcast: Instant,
    local_cursor: Option<CursorPos>,
}

impl PresenceTracker {
    pub fn new(local_replica: Uuid, idle_timeout: Duration, cursor_interval: Duration) -> Self {
        Self {
            local_replica,
            peers: HashMap::new(),
            idle_timeout,
            cursor_interval,
            // allow an immediate first broadcast
            last_cursor_broadcast: Instant::now() - Duration::from_secs(1),
            local_cursor: None,
        }
    }

    pub fn with_defaults(local_replica: Uuid) -> Self {
        Self::new(local_replica, Duration::from_secs(30), Duration::from_millis(33))
    }

    /// Apply a presence operation with last-arrival-wins.
    ///
    /// Our own echoed operations are ignored. Cursor/selection from a peer
    /// we have not been introduced to creates a placeholder entry.
    pub fn observe(&mut self, op: &Operation) {
        if op.origin == self.local_replica {
            return;
        }

        let peer = self
            .peers
            .entry(op.origin)
            .or_insert_with(|| Collaborator::placeholder(op.origin));
        peer.last_seen = Instant::now();

        match &op.payload {
            OpPayload::Cursor(pos) => {
                peer.cursor = Some(*pos);
            }
            OpPayload::Selection(ids) => {
                peer.selection = ids.clone();
            }
            _ => {
                log::debug!("non-presence op {} routed to presence tracker", op.op_id);
            }
        }
    }

    /// Record a peer announcement (name + color from the relay).
    pub fn announce(&mut self, info: &ReplicaInfo) {
        if info.replica_id == self.local_replica {
            return;
        }
        let peer = self
            .peers
            .entry(info.replica_id)
            .or_insert_with(|| Collaborator::new(info.replica_id, info.name.clone(), info.color));
        peer.name = info.name.clone();
        peer.color = info.color;
        peer.last_seen = Instant::now();
    }

    /// Remove a departed peer.
    pub fn remove(&mut self, replica_id: &Uuid) -> Option<Collaborator> {
        self.peers.remove(replica_id)
    }

    /// Evict collaborators idle past the TTL; returns the evicted ids.
    pub fn evict_idle(&mut self) -> Vec<Uuid> {
        let timeout = self.idle_timeout;
        let stale: Vec<Uuid> = self
            .peers
            .iter()
            .filter(|(_, peer)| peer.is_idle(timeout))
            .map(|(id, _)| *id)
            .collect();

        for id in &stale {
            self.peers.remove(id);
            log::debug!("presence: evicted idle collaborator {id}");
        }
        stale
    }

    /// Update the local cursor; returns `Some` only when a broadcast is due
    /// (throttled to the configured interval).
    pub fn update_local_cursor(&mut self, pos: CursorPos) -> Option<CursorPos> {
        self.local_cursor = Some(pos);

        if self.last_cursor_broadcast.elapsed() < self.cursor_interval {
            return None;
        }
        self.last_cursor_broadcast = Instant::now();
        Some(pos)
    }

    /// Read-only snapshot of live collaborators.
    pub fn snapshot(&self) -> Vec<Collaborator> {
        self.peers.values().cloned().collect()
    }

    pub fn peer(&self, replica_id: &Uuid) -> Option<&Collaborator> {
        self.peers.get(replica_id)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn local_cursor(&self) -> Option<CursorPos> {
        self.local_cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn cursor_op(op_id: u128, origin: u128, x: f32) -> Operation {
        Operation::cursor(
            Uuid::from_u128(op_id),
            Uuid::from_u128(origin),
            1,
            0,
            CursorPos::new(x, 0.0, 0),
        )
    }

    fn selection_op(op_id: u128, origin: u128, ids: Vec<Uuid>) -> Operation {
        Operation::selection(Uuid::from_u128(op_id), Uuid::from_u128(origin), 1, 0, ids)
    }

    fn tracker() -> PresenceTracker {
        PresenceTracker::new(
            Uuid::from_u128(0x10CA),
            Duration::from_secs(30),
            Duration::from_millis(33),
        )
    }

    #[test]
    fn test_cursor_from_unknown_peer_creates_placeholder() {
        let mut tracker = tracker();
        tracker.observe(&cursor_op(1, 0xB, 50.0));

        assert_eq!(tracker.peer_count(), 1);
        let peer = tracker.peer(&Uuid::from_u128(0xB)).unwrap();
        assert_eq!(peer.cursor.unwrap().x, 50.0);
        assert!(peer.name.starts_with("Peer-"));
    }

    #[test]
    fn test_own_operations_ignored() {
        let local = Uuid::from_u128(0xAA);
        let mut tracker = PresenceTracker::with_defaults(local);

        let op = Operation::cursor(Uuid::from_u128(1), local, 1, 0, CursorPos::new(1.0, 1.0, 0));
        tracker.observe(&op);
        assert_eq!(tracker.peer_count(), 0);
    }

    #[test]
    fn test_last_arrival_wins() {
        let mut tracker = tracker();
        tracker.observe(&cursor_op(1, 0xB, 10.0));
        tracker.observe(&cursor_op(2, 0xB, 20.0));

        let peer = tracker.peer(&Uuid::from_u128(0xB)).unwrap();
        assert_eq!(peer.cursor.unwrap().x, 20.0);
        assert_eq!(tracker.peer_count(), 1);
    }

    #[test]
    fn test_selection_update() {
        let mut tracker = tracker();
        let ids = vec![Uuid::from_u128(1), Uuid::from_u128(2)];
        tracker.observe(&selection_op(1, 0xB, ids.clone()));

        assert_eq!(tracker.peer(&Uuid::from_u128(0xB)).unwrap().selection, ids);
    }

    #[test]
    fn test_announce_sets_identity() {
        let mut tracker = tracker();
        tracker.observe(&cursor_op(1, 0xB, 10.0));

        let info = ReplicaInfo::with_id(Uuid::from_u128(0xB), "Bob");
        tracker.announce(&info);

        let peer = tracker.peer(&Uuid::from_u128(0xB)).unwrap();
        assert_eq!(peer.name, "Bob");
        // cursor survives the announcement
        assert_eq!(peer.cursor.unwrap().x, 10.0);
    }

    #[test]
    fn test_remove_peer() {
        let mut tracker = tracker();
        tracker.observe(&cursor_op(1, 0xB, 10.0));
        assert!(tracker.remove(&Uuid::from_u128(0xB)).is_some());
        assert_eq!(tracker.peer_count(), 0);
    }

    #[test]
    fn test_ttl_eviction() {
        let mut tracker = PresenceTracker::new(
            Uuid::from_u128(0xAA),
            Duration::from_millis(5),
            Duration::from_millis(33),
        );
        tracker.observe(&cursor_op(1, 0xB, 10.0));
        assert_eq!(tracker.evict_idle().len(), 0);

        thread::sleep(Duration::from_millis(10));
        let evicted = tracker.evict_idle();
        assert_eq!(evicted, vec![Uuid::from_u128(0xB)]);
        assert_eq!(tracker.peer_count(), 0);
    }

    #[test]
    fn test_activity_refreshes_ttl() {
        let mut tracker = PresenceTracker::new(
            Uuid::from_u128(0xAA),
            Duration::from_millis(20),
            Duration::from_millis(0),
        );
        tracker.observe(&cursor_op(1, 0xB, 10.0));
        thread::sleep(Duration::from_millis(12));
        tracker.observe(&cursor_op(2, 0xB, 11.0));
        thread::sleep(Duration::from_millis(12));

        // Second observation reset the clock; still live.
        assert!(tracker.evict_idle().is_empty());
        assert_eq!(tracker.peer_count(), 1);
    }

    #[test]
    fn test_local_cursor_throttled() {
        let mut tracker = tracker();

        assert!(tracker.update_local_cursor(CursorPos::new(1.0, 1.0, 0)).is_some());
        // Immediate second update is throttled but still recorded locally.
        assert!(tracker.update_local_cursor(CursorPos::new(2.0, 2.0, 0)).is_none());
        assert_eq!(tracker.local_cursor().unwrap().x, 2.0);
    }

    #[test]
    fn test_local_cursor_after_interval() {
        let mut tracker = PresenceTracker::new(
            Uuid::from_u128(0xAA),
            Duration::from_secs(30),
            Duration::from_millis(5),
        );
        let _ = tracker.update_local_cursor(CursorPos::new(1.0, 1.0, 0));
        thread::sleep(Duration::from_millis(10));
        assert!(tracker.update_local_cursor(CursorPos::new(3.0, 3.0, 0)).is_some());
    }

    #[test]
    fn test_snapshot_is_clone() {
        let mut tracker = tracker();
        tracker.observe(&cursor_op(1, 0xB, 10.0));

        let snap = tracker.snapshot();
        assert_eq!(snap.len(), 1);

        tracker.observe(&cursor_op(2, 0xB, 99.0));
        // Snapshot is detached from later mutation.
        assert_eq!(snap[0].cursor.unwrap().x, 10.0);
    }
}
