//! Fan-out of wire frames to the peers of a room.
//!
//! Uses a tokio broadcast channel for O(1) publish to all subscribers; each
//! peer gets an independent receiver buffering up to `capacity` frames
//! before a lagging peer starts dropping (backpressure). Stats are tracked
//! via atomics so the publish path never takes a lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::protocol::{ProtocolError, ReplicaInfo, WireMessage};

/// Snapshot of fan-out health.
#[derive(Debug, Clone, Default)]
pub struct FanoutStats {
    pub frames_sent: u64,
    pub active_peers: usize,
}

struct AtomicFanoutStats {
    frames_sent: AtomicU64,
}

/// One room's broadcast channel plus its connected peers.
pub struct Fanout {
    sender: broadcast::Sender<Arc<Vec<u8>>>,
    peers: Arc<RwLock<HashMap<Uuid, ReplicaInfo>>>,
    capacity: usize,
    stats: Arc<AtomicFanoutStats>,
}

impl Fanout {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            peers: Arc::new(RwLock::new(HashMap::new())),
            capacity,
            stats: Arc::new(AtomicFanoutStats { frames_sent: AtomicU64::new(0) }),
        }
    }

    /// Register a peer; returns its receiver.
    pub async fn add_peer(&self, info: ReplicaInfo) -> broadcast::Receiver<Arc<Vec<u8>>> {
        let mut peers = self.peers.write().await;
        peers.insert(info.replica_id, info);
        self.sender.subscribe()
    }

    pub async fn remove_peer(&self, replica_id: &Uuid) -> Option<ReplicaInfo> {
        let mut peers = self.peers.write().await;
        peers.remove(replica_id)
    }

    /// Encode and publish a frame to every subscriber (including the
    /// sender's own receiver — filtering echoes is the caller's job).
    /// Returns the number of receivers reached.
    pub fn publish(&self, msg: &WireMessage) -> Result<usize, ProtocolError> {
        let encoded = msg.encode()?;
        Ok(self.publish_raw(Arc::new(encoded)))
    }

    /// Publish pre-encoded bytes (zero-copy fast path, lock-free).
    pub fn publish_raw(&self, frame: Arc<Vec<u8>>) -> usize {
        let count = self.sender.send(frame).unwrap_or(0);
        self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn peers(&self) -> Vec<ReplicaInfo> {
        self.peers.read().await.values().cloned().collect()
    }

    pub async fn has_peer(&self, replica_id: &Uuid) -> bool {
        self.peers.read().await.contains_key(replica_id)
    }

    pub async fn stats(&self) -> FanoutStats {
        FanoutStats {
            frames_sent: self.stats.frames_sent.load(Ordering::Relaxed),
            active_peers: self.peers.read().await.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Raw subscription without peer registration.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Vec<u8>>> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CursorPos, Operation};

    fn replica(n: u128, name: &str) -> ReplicaInfo {
        ReplicaInfo::with_id(Uuid::from_u128(n), name)
    }

    fn op_frame(op_id: u128, origin: u128) -> WireMessage {
        WireMessage::Op(Operation::cursor(
            Uuid::from_u128(op_id),
            Uuid::from_u128(origin),
            1,
            0,
            CursorPos::new(0.0, 0.0, 0),
        ))
    }

    #[tokio::test]
    async fn test_add_remove_peer() {
        let fanout = Fanout::new(16);
        let info = replica(1, "Alice");

        let _rx = fanout.add_peer(info.clone()).await;
        assert_eq!(fanout.peer_count().await, 1);
        assert!(fanout.has_peer(&info.replica_id).await);

        fanout.remove_peer(&info.replica_id).await;
        assert_eq!(fanout.peer_count().await, 0);
    }

    #[tokio::test]
    async fn test_fan_out_reaches_all_receivers() {
        let fanout = Fanout::new(16);
        let mut rx1 = fanout.add_peer(replica(1, "Alice")).await;
        let mut rx2 = fanout.add_peer(replica(2, "Bob")).await;
        let mut rx3 = fanout.add_peer(replica(3, "Carol")).await;

        let count = fanout.publish(&op_frame(100, 1)).unwrap();
        assert_eq!(count, 3);

        for rx in [&mut rx1, &mut rx2, &mut rx3] {
            let frame = rx.recv().await.unwrap();
            assert!(matches!(WireMessage::decode(&frame).unwrap(), WireMessage::Op(_)));
        }
    }

    #[tokio::test]
    async fn test_publish_raw_zero_copy() {
        let fanout = Fanout::new(16);
        let mut rx = fanout.add_peer(replica(1, "Alice")).await;

        let bytes = Arc::new(op_frame(100, 1).encode().unwrap());
        let count = fanout.publish_raw(bytes.clone());
        assert_eq!(count, 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(*received, *bytes);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let fanout = Fanout::new(16);
        // No receivers: frame is dropped, publish does not error.
        assert_eq!(fanout.publish(&op_frame(100, 1)).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stats_count_frames() {
        let fanout = Fanout::new(16);
        let _rx = fanout.add_peer(replica(1, "Alice")).await;

        fanout.publish(&WireMessage::Ping).unwrap();
        fanout.publish(&WireMessage::Ping).unwrap();

        let stats = fanout.stats().await;
        assert_eq!(stats.frames_sent, 2);
        assert_eq!(stats.active_peers, 1);
    }

    #[tokio::test]
    async fn test_capacity_reported() {
        assert_eq!(Fanout::new(32).capacity(), 32);
    }
}
