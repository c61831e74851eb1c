//! WebSocket relay with room-based operation routing.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── Room (room_id) ── Fanout ──► Clients A, B, C
//! Client B ──┘         │
//!                      └── Replay window (bounded OperationLog)
//! ```
//!
//! The relay never interprets element semantics: it records each operation
//! in a bounded replay window (served to late joiners) and fans the frame
//! out to the room. Ordering across simultaneous senders is not guaranteed
//! and not required — convergence is the merge engine's job on each
//! replica, not the wire's.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock};

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::Fanout;
use crate::merge::ApplyResult;
use crate::oplog::OperationLog;
use crate::protocol::WireMessage;

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum peers per room
    pub max_peers_per_room: usize,
    /// Fan-out channel capacity per room
    pub fanout_capacity: usize,
    /// Operations kept per room for replay to late joiners
    pub replay_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            max_peers_per_room: 100,
            fanout_capacity: 256,
            replay_capacity: 512,
        }
    }
}

/// Relay statistics.
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_frames: u64,
    pub total_bytes: u64,
    pub active_rooms: usize,
}

/// One room: fan-out channel plus the bounded replay window.
struct RelayRoom {
    fanout: Arc<Fanout>,
    replay: Mutex<OperationLog>,
}

impl RelayRoom {
    fn new(fanout_capacity: usize, replay_capacity: usize) -> Self {
        Self {
            fanout: Arc::new(Fanout::new(fanout_capacity)),
            replay: Mutex::new(OperationLog::with_capacity(replay_capacity)),
        }
    }
}

/// The relay server.
pub struct RelayServer {
    config: RelayConfig,
    rooms: Arc<RwLock<HashMap<Uuid, Arc<RelayRoom>>>>,
    stats: Arc<RwLock<RelayStats>>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            rooms: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(RelayStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    /// Start listening for WebSocket connections.
    ///
    /// This runs the accept loop. Call from an async runtime.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("relay listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("new TCP connection from {addr}");

            let rooms = self.rooms.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, rooms, stats, config).await {
                    log::error!("connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        rooms: Arc<RwLock<HashMap<Uuid, Arc<RelayRoom>>>>,
        stats: Arc<RwLock<RelayStats>>,
        config: RelayConfig,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        log::info!("WebSocket connection established from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        // Per-connection state, set by the Hello frame.
        let mut replica_id: Option<Uuid> = None;
        let mut room_id: Option<Uuid> = None;
        let mut room: Option<Arc<RelayRoom>> = None;
        let mut fanout_rx: Option<tokio::sync::broadcast::Receiver<Arc<Vec<u8>>>> = None;

        loop {
            tokio::select! {
                // Incoming WebSocket frame
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            {
                                let mut s = stats.write().await;
                                s.total_frames += 1;
                                s.total_bytes += bytes.len() as u64;
                            }

                            let frame = match WireMessage::decode(&bytes) {
                                Ok(frame) => frame,
                                Err(e) => {
                                    log::warn!("failed to decode frame from {addr}: {e}");
                                    continue;
                                }
                            };

                            match frame {
                                WireMessage::Hello { room_id: rid, replica } => {
                                    let joined = {
                                        let mut rooms_w = rooms.write().await;
                                        let entry = rooms_w.entry(rid).or_insert_with(|| {
                                            Arc::new(RelayRoom::new(
                                                config.fanout_capacity,
                                                config.replay_capacity,
                                            ))
                                        });
                                        entry.clone()
                                    };

                                    if joined.fanout.peer_count().await >= config.max_peers_per_room {
                                        log::warn!(
                                            "room {rid} full ({} peers); refusing {}",
                                            config.max_peers_per_room,
                                            replica.replica_id
                                        );
                                        break;
                                    }

                                    replica_id = Some(replica.replica_id);
                                    room_id = Some(rid);
                                    fanout_rx = Some(joined.fanout.add_peer(replica.clone()).await);

                                    // Serve the replay window to the late joiner.
                                    let backlog: Vec<WireMessage> = {
                                        let replay = joined.replay.lock().await;
                                        replay.applied_ops().cloned().map(WireMessage::Op).collect()
                                    };
                                    let backlog_len = backlog.len();
                                    for frame in backlog {
                                        ws_sender.send(Message::Binary(frame.encode()?.into())).await?;
                                    }

                                    // Announce the join to the room.
                                    let _ = joined.fanout.publish(&WireMessage::PeerJoined(replica.clone()));
                                    room = Some(joined);

                                    {
                                        let mut s = stats.write().await;
                                        s.active_rooms = rooms.read().await.len();
                                    }

                                    log::info!(
                                        "peer {} ({}) joined room {rid}, replayed {} ops",
                                        replica.name,
                                        replica.replica_id,
                                        backlog_len
                                    );
                                }

                                WireMessage::Op(op) => {
                                    match &room {
                                        Some(room) => {
                                            {
                                                let mut replay = room.replay.lock().await;
                                                replay.record(op, ApplyResult::Applied);
                                            }
                                            // Fan out the original bytes, zero-copy.
                                            room.fanout.publish_raw(Arc::new(bytes));
                                        }
                                        None => {
                                            log::warn!("operation from {addr} before Hello; dropped");
                                        }
                                    }
                                }

                                WireMessage::Ping => {
                                    ws_sender
                                        .send(Message::Binary(WireMessage::Pong.encode()?.into()))
                                        .await?;
                                }

                                other => {
                                    log::debug!("unhandled frame from {addr}: {other:?}");
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("connection closed from {addr}");
                            break;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                // Outgoing fan-out frame
                frame = async {
                    match fanout_rx {
                        Some(ref mut rx) => rx.recv().await,
                        // Not in a room yet — wait forever.
                        None => std::future::pending().await,
                    }
                } => {
                    match frame {
                        Ok(bytes) => {
                            // Don't echo a peer's own frames back at it.
                            let own = match WireMessage::decode(&bytes) {
                                Ok(WireMessage::Op(op)) => Some(op.origin) == replica_id,
                                Ok(WireMessage::PeerJoined(info)) => {
                                    Some(info.replica_id) == replica_id
                                }
                                _ => false,
                            };
                            if own {
                                continue;
                            }
                            ws_sender.send(Message::Binary(bytes.to_vec().into())).await?;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("peer {replica_id:?} lagged by {n} frames");
                        }
                        Err(_) => break,
                    }
                }
            }
        }

        // Cleanup: remove the peer from its room.
        if let (Some(pid), Some(rid), Some(room)) = (replica_id, room_id, room) {
            room.fanout.remove_peer(&pid).await;
            let _ = room.fanout.publish(&WireMessage::PeerLeft(pid));

            if room.fanout.peer_count().await == 0 {
                let mut rooms_w = rooms.write().await;
                rooms_w.remove(&rid);
                log::info!("room {rid} removed (empty)");
            }
        }

        {
            let mut s = stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
            s.active_rooms = rooms.read().await.len();
        }

        Ok(())
    }

    /// Relay statistics snapshot.
    pub async fn stats(&self) -> RelayStats {
        self.stats.read().await.clone()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }
}
