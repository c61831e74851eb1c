//! Operations and the binary wire protocol.
//!
//! An [`Operation`] is the unit of replication: one independently
//! deliverable mutation intent (add/update/delete/presence). Operations are
//! stamped with a per-replica monotonic version; cross-replica ordering is
//! established solely by the [`Stamp`] total order, never by wall-clock
//! timestamps.
//!
//! Wire frames ([`WireMessage`]) are bincode-encoded:
//! ```text
//! ┌──────────┬───────────┬──────────┬──────────┬──────────┐
//! │ frame    │ op_id     │ origin   │ version  │ payload  │
//! │ tag      │ 16 bytes  │ 16 bytes │ 8 bytes  │ variable │
//! └──────────┴───────────┴──────────┴──────────┴──────────┘
//! ```
//!
//! Reference: Kleppmann, Chapter 5 — Replication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::element::{Color, Element, ElementPatch};

// ───────────────────────────────────────────────────────────────────
// Replication order
// ───────────────────────────────────────────────────────────────────

/// The deterministic, replica-independent replication order.
///
/// Versions are minted by each replica's own monotonic counter and are only
/// meaningful within that replica; the derived lexicographic order
/// (version, then replica id) is total across replicas and identical
/// everywhere, which is the sole convergence guarantee. Equal versions from
/// different replicas resolve to the higher replica id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Stamp {
    pub version: u64,
    pub replica: Uuid,
}

impl Stamp {
    pub fn new(version: u64, replica: Uuid) -> Self {
        Self { version, replica }
    }
}

// ───────────────────────────────────────────────────────────────────
// Operations
// ───────────────────────────────────────────────────────────────────

/// Collaborator cursor position in document coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorPos {
    pub x: f32,
    pub y: f32,
    pub page_index: u32,
}

impl CursorPos {
    pub fn new(x: f32, y: f32, page_index: u32) -> Self {
        Self { x, y, page_index }
    }
}

/// Operation payload, one per operation kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpPayload {
    /// Create an element (full state).
    Add(Element),
    /// Patch an existing element.
    Update(ElementPatch),
    /// Tombstone an element.
    Delete,
    /// Replace the sender's selection (presence only).
    Selection(Vec<Uuid>),
    /// Move the sender's cursor (presence only).
    Cursor(CursorPos),
}

/// Operation kind, for dispatch and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Add,
    Update,
    Delete,
    Selection,
    Cursor,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Add => "add",
            OpKind::Update => "update",
            OpKind::Delete => "delete",
            OpKind::Selection => "selection",
            OpKind::Cursor => "cursor",
        }
    }
}

/// A single replicable mutation intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Globally unique operation id (idempotence key).
    pub op_id: Uuid,
    /// Target element id. Required for Add/Update/Delete, absent for
    /// presence payloads.
    pub target: Option<Uuid>,
    /// Originating replica.
    pub origin: Uuid,
    /// Origin-local monotonic version.
    pub version: u64,
    /// Advisory wall-clock milliseconds. Never used to break ties.
    pub timestamp_ms: u64,
    pub payload: OpPayload,
}

impl Operation {
    pub fn add(op_id: Uuid, origin: Uuid, version: u64, timestamp_ms: u64, element: Element) -> Self {
        Self {
            op_id,
            target: Some(element.id),
            origin,
            version,
            timestamp_ms,
            payload: OpPayload::Add(element),
        }
    }

    pub fn update(
        op_id: Uuid,
        origin: Uuid,
        version: u64,
        timestamp_ms: u64,
        target: Uuid,
        patch: ElementPatch,
    ) -> Self {
        Self {
            op_id,
            target: Some(target),
            origin,
            version,
            timestamp_ms,
            payload: OpPayload::Update(patch),
        }
    }

    pub fn delete(op_id: Uuid, origin: Uuid, version: u64, timestamp_ms: u64, target: Uuid) -> Self {
        Self {
            op_id,
            target: Some(target),
            origin,
            version,
            timestamp_ms,
            payload: OpPayload::Delete,
        }
    }

    pub fn selection(op_id: Uuid, origin: Uuid, version: u64, timestamp_ms: u64, ids: Vec<Uuid>) -> Self {
        Self {
            op_id,
            target: None,
            origin,
            version,
            timestamp_ms,
            payload: OpPayload::Selection(ids),
        }
    }

    pub fn cursor(op_id: Uuid, origin: Uuid, version: u64, timestamp_ms: u64, pos: CursorPos) -> Self {
        Self {
            op_id,
            target: None,
            origin,
            version,
            timestamp_ms,
            payload: OpPayload::Cursor(pos),
        }
    }

    /// The replication stamp of this operation.
    pub fn stamp(&self) -> Stamp {
        Stamp::new(self.version, self.origin)
    }

    pub fn kind(&self) -> OpKind {
        match self.payload {
            OpPayload::Add(_) => OpKind::Add,
            OpPayload::Update(_) => OpKind::Update,
            OpPayload::Delete => OpKind::Delete,
            OpPayload::Selection(_) => OpKind::Selection,
            OpPayload::Cursor(_) => OpKind::Cursor,
        }
    }

    /// Presence payloads bypass the authoritative element set.
    pub fn is_presence(&self) -> bool {
        matches!(self.payload, OpPayload::Selection(_) | OpPayload::Cursor(_))
    }

    /// Structural sanity check, applied before an operation reaches the
    /// merge engine or the wire. Malformed operations are never broadcast.
    pub fn validate_shape(&self) -> Result<(), ProtocolError> {
        if self.op_id.is_nil() || self.origin.is_nil() {
            return Err(ProtocolError::MalformedOperation("nil id"));
        }
        match &self.payload {
            OpPayload::Add(element) => {
                if self.target != Some(element.id) {
                    return Err(ProtocolError::MalformedOperation("add target mismatch"));
                }
            }
            OpPayload::Update(patch) => {
                if self.target.is_none() {
                    return Err(ProtocolError::MalformedOperation("update without target"));
                }
                if patch.is_empty() {
                    return Err(ProtocolError::MalformedOperation("empty patch"));
                }
            }
            OpPayload::Delete => {
                if self.target.is_none() {
                    return Err(ProtocolError::MalformedOperation("delete without target"));
                }
            }
            OpPayload::Selection(_) | OpPayload::Cursor(_) => {
                if self.target.is_some() {
                    return Err(ProtocolError::MalformedOperation("presence with target"));
                }
            }
        }
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────────
// Replica identity
// ───────────────────────────────────────────────────────────────────

/// Replica identity with display metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaInfo {
    pub replica_id: Uuid,
    pub name: String,
    /// Stable cursor/selection color derived from the replica id.
    pub color: Color,
}

impl ReplicaInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), name)
    }

    pub fn with_id(replica_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            replica_id,
            name: name.into(),
            color: replica_color(replica_id),
        }
    }
}

/// Stable, visually distinct color from a replica id.
///
/// Hue is derived from the id hash; high saturation keeps cursors vivid.
pub fn replica_color(replica_id: Uuid) -> Color {
    let hash = replica_id.as_u128();
    let hue = ((hash % 360) as f32) / 360.0;
    let (r, g, b) = hsl_to_rgb(hue, 0.7, 0.6);
    Color::rgba(r, g, b, 1.0)
}

fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s == 0.0 {
        return (l, l, l);
    }

    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;

    (
        hue_to_rgb(p, q, h + 1.0 / 3.0),
        hue_to_rgb(p, q, h),
        hue_to_rgb(p, q, h - 1.0 / 3.0),
    )
}

fn hue_to_rgb(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        return p + (q - p) * 6.0 * t;
    }
    if t < 1.0 / 2.0 {
        return q;
    }
    if t < 2.0 / 3.0 {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    p
}

// ───────────────────────────────────────────────────────────────────
// Wire frames
// ───────────────────────────────────────────────────────────────────

/// Top-level frame exchanged with the relay.
///
/// Serialized with bincode for minimal overhead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireMessage {
    /// First frame on a connection: join a room.
    Hello { room_id: Uuid, replica: ReplicaInfo },
    /// A replicated operation.
    Op(Operation),
    /// A peer joined the room (relay announcement).
    PeerJoined(ReplicaInfo),
    /// A peer left the room (relay announcement).
    PeerLeft(Uuid),
    /// Heartbeat.
    Ping,
    Pong,
}

impl WireMessage {
    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(msg)
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    MalformedOperation(&'static str),
    ConnectionClosed,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::MalformedOperation(why) => write!(f, "Malformed operation: {why}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}
