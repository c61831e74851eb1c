//! # margin-collab — Collaborative annotation sync engine
//!
//! Operation-based state synchronization for annotation elements (text,
//! strokes, shapes, images) overlaid on a paginated document. Every replica
//! applies the same operations through the same deterministic
//! last-writer-wins policy, so replicas that receive the same operation set
//! converge regardless of arrival order.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐   WireMessage    ┌──────────────┐
//! │ EditorSession │ ◄──────────────► │ RelayServer  │
//! │ (per replica) │   (WebSocket)    │ (fan-out +   │
//! └──────┬────────┘                  │  replay)     │
//!        │                           └──────────────┘
//!        ▼
//! ┌───────────────┐   serial drain   ┌──────────────┐
//! │ OperationQueue│ ───────────────► │ MergeEngine  │
//! └───────────────┘                  │ (LWW + tomb- │
//!                                    │  stones)     │
//!                                    └──────┬───────┘
//!                                           ▼
//!                                    ┌──────────────┐
//!                                    │ DerivedViews │
//!                                    │ (memoized)   │
//!                                    └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`element`] — annotation value types and validation
//! - [`protocol`] — operations, stamps, binary wire frames
//! - [`version`] — session version counter and id sources
//! - [`merge`] — the LWW merge engine over the authoritative set
//! - [`queue`] — serial operation queue with poisoned-op isolation
//! - [`oplog`] — bounded diagnostic operation log
//! - [`history`] — local-only undo/redo timeline
//! - [`presence`] — ephemeral collaborator cursors/selections
//! - [`view`] — memoized by-page/by-id/selection projections
//! - [`session`] — the per-replica editing facade
//! - [`transport`], [`client`], [`broadcast`], [`relay`] — the wire

pub mod broadcast;
pub mod client;
pub mod element;
pub mod history;
pub mod merge;
pub mod oplog;
pub mod presence;
pub mod protocol;
pub mod queue;
pub mod relay;
pub mod session;
pub mod transport;
pub mod version;
pub mod view;

// Re-exports for convenience
pub use broadcast::{Fanout, FanoutStats};
pub use client::{ClientEvent, ConnectionState, OfflineQueue, WireClient, WireTransport};
pub use element::{
    Bounds, Color, Element, ElementBody, ElementPatch, PageMetrics, Point, ShapeKind,
    ValidationError,
};
pub use history::{HistoryEntry, UndoRedo, UndoRedoTimeline};
pub use merge::{ApplyResult, MergeEngine, RejectReason};
pub use oplog::{LogEntry, OperationLog};
pub use presence::{Collaborator, PresenceTracker};
pub use protocol::{
    replica_color, CursorPos, OpKind, OpPayload, Operation, ProtocolError, ReplicaInfo, Stamp,
    WireMessage,
};
pub use queue::OperationQueue;
pub use relay::{RelayConfig, RelayServer, RelayStats};
pub use session::{EditorSession, SessionConfig, SubmitError};
pub use transport::{ChannelTransport, NullTransport, Transport, TransportError};
pub use version::{IdSource, RandomIds, SequentialIds, VersionCounter};
pub use view::DerivedViews;
