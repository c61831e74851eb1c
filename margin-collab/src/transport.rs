//! Transport boundary.
//!
//! The engine hands finished operations to a [`Transport`] and receives
//! remote operations from whoever owns the channel. Sending is
//! fire-and-forget: retries and acknowledgements are the transport's
//! concern. The channel may duplicate, reorder or drop messages; it never
//! corrupts them.

use tokio::sync::mpsc;

use crate::protocol::Operation;

/// Transport failures. Never fatal to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The channel is gone; the operation was not handed over.
    Closed,
    /// The outgoing buffer is full; the operation was not handed over.
    QueueFull,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Closed => write!(f, "transport closed"),
            TransportError::QueueFull => write!(f, "transport queue full"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Outbound half of the collaborator channel.
pub trait Transport: Send {
    /// Hand one operation to the channel, fire-and-forget.
    fn send(&self, op: Operation) -> Result<(), TransportError>;
}

/// Transport that discards everything — for local-only sessions and tests.
#[derive(Debug, Default)]
pub struct NullTransport;

impl Transport for NullTransport {
    fn send(&self, _op: Operation) -> Result<(), TransportError> {
        Ok(())
    }
}

/// In-process transport over a tokio mpsc channel.
///
/// The receiver half is handed to whoever pumps remote sessions (tests, or
/// an in-process relay).
pub struct ChannelTransport {
    tx: mpsc::Sender<Operation>,
}

impl ChannelTransport {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Operation>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, op: Operation) -> Result<(), TransportError> {
        self.tx.try_send(op).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }
}
