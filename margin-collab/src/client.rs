//! WebSocket wire client for the relay.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect)
//! - Operation send/receive as [`WireMessage`] frames
//! - An offline queue for operations composed while disconnected,
//!   replayed on reconnect
//!
//! The client is the engine's [`Transport`]: sends are fire-and-forget and
//! the channel may duplicate, reorder or drop frames — convergence is the
//! merge engine's job, not the wire's.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::protocol::{Operation, ProtocolError, ReplicaInfo, WireMessage};
use crate::transport::{Transport, TransportError};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the wire client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Connection established
    Connected,
    /// Connection lost
    Disconnected,
    /// A remote operation arrived (own echoes already filtered)
    Remote(Operation),
    /// A peer joined the room
    PeerJoined(ReplicaInfo),
    /// A peer left the room
    PeerLeft(Uuid),
}

/// Bounded queue of operations composed while disconnected.
///
/// Queued operations are replayed, in order, on the next connect.
pub struct OfflineQueue {
    queue: VecDeque<Operation>,
    max_size: usize,
}

impl OfflineQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    /// Queue an operation; `false` when the queue is full.
    pub fn enqueue(&mut self, op: Operation) -> bool {
        if self.queue.len() >= self.max_size {
            return false;
        }
        self.queue.push_back(op);
        true
    }

    pub fn drain(&mut self) -> Vec<Operation> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

struct WireShared {
    replica: ReplicaInfo,
    room_id: Uuid,
    state: RwLock<ConnectionState>,
    offline: Mutex<OfflineQueue>,
    outgoing: RwLock<Option<mpsc::Sender<Vec<u8>>>>,
}

impl WireShared {
    fn state(&self) -> ConnectionState {
        self.state
            .read()
            .map(|s| *s)
            .unwrap_or(ConnectionState::Disconnected)
    }

    fn set_state(&self, next: ConnectionState) {
        if let Ok(mut s) = self.state.write() {
            *s = next;
        }
    }

    fn queue_offline(&self, op: Operation) -> Result<(), TransportError> {
        match self.offline.lock() {
            Ok(mut queue) => {
                if queue.enqueue(op) {
                    Ok(())
                } else {
                    Err(TransportError::QueueFull)
                }
            }
            Err(_) => Err(TransportError::Closed),
        }
    }
}

/// Cloneable, synchronous sending half of the client.
///
/// This is what an [`crate::session::EditorSession`] is constructed with.
#[derive(Clone)]
pub struct WireTransport {
    shared: Arc<WireShared>,
}

impl Transport for WireTransport {
    fn send(&self, op: Operation) -> Result<(), TransportError> {
        if self.shared.state() != ConnectionState::Connected {
            return self.shared.queue_offline(op);
        }

        let encoded = match WireMessage::Op(op).encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("failed to encode outgoing operation: {e}");
                return Err(TransportError::Closed);
            }
        };

        let tx = match self.shared.outgoing.read() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        };
        match tx {
            Some(tx) => tx.try_send(encoded).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => TransportError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
            }),
            None => Err(TransportError::Closed),
        }
    }
}

/// The wire client.
///
/// Manages a WebSocket connection to the relay, frames operations, and
/// replays the offline queue on connect.
pub struct WireClient {
    shared: Arc<WireShared>,
    server_url: String,
    event_tx: mpsc::Sender<ClientEvent>,
    event_rx: Option<mpsc::Receiver<ClientEvent>>,
}

impl WireClient {
    pub fn new(replica: ReplicaInfo, room_id: Uuid, server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            shared: Arc::new(WireShared {
                replica,
                room_id,
                state: RwLock::new(ConnectionState::Disconnected),
                offline: Mutex::new(OfflineQueue::new(10_000)),
                outgoing: RwLock::new(None),
            }),
            server_url: server_url.into(),
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx.take()
    }

    /// The sending half, for constructing a session.
    pub fn transport(&self) -> WireTransport {
        WireTransport { shared: self.shared.clone() }
    }

    /// Connect to the relay and join the room.
    ///
    /// Spawns background tasks for reading/writing WebSocket frames and
    /// replays any offline-queued operations.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        self.shared.set_state(ConnectionState::Connecting);

        let ws_result = tokio_tungstenite::connect_async(&self.server_url).await;
        let (ws_stream, _) = match ws_result {
            Ok(ok) => ok,
            Err(_) => {
                self.shared.set_state(ConnectionState::Disconnected);
                return Err(ProtocolError::ConnectionClosed);
            }
        };

        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward the outgoing channel to the socket.
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
        if let Ok(mut guard) = self.shared.outgoing.write() {
            *guard = Some(out_tx.clone());
        }
        tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                    break;
                }
            }
        });

        // Join the room.
        let hello = WireMessage::Hello {
            room_id: self.shared.room_id,
            replica: self.shared.replica.clone(),
        };
        out_tx
            .send(hello.encode()?)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)?;

        self.shared.set_state(ConnectionState::Connected);
        let _ = self.event_tx.send(ClientEvent::Connected).await;

        // Replay operations composed while disconnected.
        let queued = match self.shared.offline.lock() {
            Ok(mut queue) => queue.drain(),
            Err(_) => Vec::new(),
        };
        if !queued.is_empty() {
            log::info!("replaying {} offline operations", queued.len());
            for op in queued {
                if let Ok(encoded) = WireMessage::Op(op).encode() {
                    let _ = out_tx.send(encoded).await;
                }
            }
        }

        // Reader task: decode frames into client events.
        let event_tx = self.event_tx.clone();
        let shared = self.shared.clone();
        let pong_tx = out_tx.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => {
                        let bytes: Vec<u8> = data.into();
                        let frame = match WireMessage::decode(&bytes) {
                            Ok(frame) => frame,
                            Err(e) => {
                                log::warn!("undecodable frame from relay: {e}");
                                continue;
                            }
                        };

                        let event = match frame {
                            WireMessage::Op(op) => {
                                // The relay may echo our own operations.
                                if op.origin == shared.replica.replica_id {
                                    continue;
                                }
                                Some(ClientEvent::Remote(op))
                            }
                            WireMessage::PeerJoined(info) => {
                                if info.replica_id == shared.replica.replica_id {
                                    continue;
                                }
                                Some(ClientEvent::PeerJoined(info))
                            }
                            WireMessage::PeerLeft(id) => Some(ClientEvent::PeerLeft(id)),
                            WireMessage::Ping => {
                                if let Ok(pong) = WireMessage::Pong.encode() {
                                    let _ = pong_tx.try_send(pong);
                                }
                                None
                            }
                            WireMessage::Pong | WireMessage::Hello { .. } => None,
                        };

                        if let Some(event) = event {
                            let _ = event_tx.send(event).await;
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            // Connection lost.
            shared.set_state(ConnectionState::Disconnected);
            if let Ok(mut guard) = shared.outgoing.write() {
                *guard = None;
            }
            let _ = event_tx.send(ClientEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Send a heartbeat ping.
    pub fn ping(&self) -> Result<(), ProtocolError> {
        let tx = match self.shared.outgoing.read() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        };
        match tx {
            Some(tx) => {
                tx.try_send(WireMessage::Ping.encode()?)
                    .map_err(|_| ProtocolError::ConnectionClosed)
            }
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    /// Drop the connection. Queued-but-unsent operations stay in the
    /// offline queue for the next connect.
    pub fn close(&self) {
        if let Ok(mut guard) = self.shared.outgoing.write() {
            *guard = None;
        }
        self.shared.set_state(ConnectionState::Disconnected);
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn replica(&self) -> &ReplicaInfo {
        &self.shared.replica
    }

    pub fn room_id(&self) -> Uuid {
        self.shared.room_id
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn offline_len(&self) -> usize {
        self.shared.offline.lock().map(|q| q.len()).unwrap_or(0)
    }
}
