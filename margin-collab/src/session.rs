//! Editing session: the single public surface over the sync engine.
//!
//! One session per replica. All mutation funnels through here:
//!
//! ```text
//! local edit ──► validate ──► stamp ──► apply ──► history ──► transport
//!                                        ▲
//! remote op ──► enqueue ──► pump (serial drain)
//! ```
//!
//! Local failures surface synchronously so the caller can reconcile an
//! optimistic change; remote failures are absorbed and logged — a remote
//! replica's malformed or stale operation must never break the local
//! session. Nothing here is fatal to the process.

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::element::{Bounds, Element, ElementBody, ElementPatch, PageMetrics, ValidationError};
use crate::history::{HistoryEntry, UndoRedo, UndoRedoTimeline};
use crate::merge::{ApplyResult, MergeEngine};
use crate::oplog::OperationLog;
use crate::presence::{Collaborator, PresenceTracker};
use crate::protocol::{CursorPos, OpPayload, Operation, ReplicaInfo};
use crate::queue::{dispatch, OperationQueue};
use crate::transport::{NullTransport, Transport};
use crate::version::{IdSource, RandomIds, VersionCounter};
use crate::view::DerivedViews;

/// Session construction parameters.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub replica_id: Uuid,
    pub replica_name: String,
    /// Highest version previously used by this replica id; supplied on
    /// session resume so versions are never reused after a reconnect.
    pub version_floor: u64,
    pub oplog_capacity: usize,
    pub history_depth: usize,
    /// Collaborators idle past this are evicted from presence.
    pub presence_ttl: Duration,
    /// Minimum interval between outgoing cursor updates.
    pub cursor_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            replica_id: Uuid::new_v4(),
            replica_name: "Anonymous".to_string(),
            version_floor: 0,
            oplog_capacity: 256,
            history_depth: 128,
            presence_ttl: Duration::from_secs(30),
            cursor_interval: Duration::from_millis(33),
        }
    }
}

/// Failures of locally originated operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    Validation(ValidationError),
    /// Update/Delete against an id that does not exist in the local view;
    /// the caller should refresh its view and retry or drop the edit.
    UnknownTarget,
    EmptyPatch,
}

impl std::fmt::Display for SubmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitError::Validation(e) => write!(f, "validation failed: {e}"),
            SubmitError::UnknownTarget => write!(f, "no such element"),
            SubmitError::EmptyPatch => write!(f, "empty patch"),
        }
    }
}

impl std::error::Error for SubmitError {}

impl From<ValidationError> for SubmitError {
    fn from(e: ValidationError) -> Self {
        SubmitError::Validation(e)
    }
}

/// One replica's editing session.
pub struct EditorSession {
    config: SessionConfig,
    pages: PageMetrics,
    engine: MergeEngine,
    inbound: OperationQueue,
    versions: VersionCounter,
    ids: Box<dyn IdSource>,
    history: UndoRedoTimeline,
    presence: PresenceTracker,
    oplog: OperationLog,
    views: DerivedViews,
    transport: Box<dyn Transport>,
}

impl EditorSession {
    pub fn new(
        config: SessionConfig,
        pages: PageMetrics,
        ids: Box<dyn IdSource>,
        transport: Box<dyn Transport>,
    ) -> Self {
        let presence = PresenceTracker::new(
            config.replica_id,
            config.presence_ttl,
            config.cursor_interval,
        );
        Self {
            engine: MergeEngine::new(config.oplog_capacity.max(1024)),
            inbound: OperationQueue::new(),
            versions: VersionCounter::resume(config.version_floor),
            ids,
            history: UndoRedoTimeline::new(config.history_depth),
            presence,
            oplog: OperationLog::with_capacity(config.oplog_capacity),
            views: DerivedViews::new(),
            transport,
            pages,
            config,
        }
    }

    /// Local-only session with random ids and no transport.
    pub fn detached(pages: PageMetrics) -> Self {
        Self::new(
            SessionConfig::default(),
            pages,
            Box::new(RandomIds),
            Box::new(NullTransport),
        )
    }

    // ── Local write path ─────────────────────────────────────────

    /// Create an element. Returns its id.
    pub fn submit_add(
        &mut self,
        page_index: u32,
        bounds: Bounds,
        body: ElementBody,
    ) -> Result<Uuid, SubmitError> {
        let element_id = self.ids.next_id();
        let element = Element::new(
            element_id,
            page_index,
            bounds,
            body,
            now_ms(),
            self.config.replica_id,
        );
        element.validate(&self.pages)?;

        let op = Operation::add(
            self.ids.next_id(),
            self.config.replica_id,
            self.versions.next(),
            now_ms(),
            element.clone(),
        );
        self.apply_local(op, Some(HistoryEntry {
            element_id,
            before: None,
            after: Some(element),
        }));
        Ok(element_id)
    }

    /// Patch an existing element.
    pub fn submit_update(&mut self, target: Uuid, patch: ElementPatch) -> Result<(), SubmitError> {
        if patch.is_empty() {
            return Err(SubmitError::EmptyPatch);
        }
        let before = match self.engine.get(&target) {
            Some(element) => element.clone(),
            None => return Err(SubmitError::UnknownTarget),
        };

        // Validate the would-be result before anything is applied or sent.
        let mut preview = before.clone();
        preview.apply_patch(&patch, now_ms(), self.config.replica_id);
        preview.validate(&self.pages)?;

        let op = Operation::update(
            self.ids.next_id(),
            self.config.replica_id,
            self.versions.next(),
            now_ms(),
            target,
            patch,
        );
        self.apply_local(op, Some(HistoryEntry {
            element_id: target,
            before: Some(before),
            after: Some(preview),
        }));
        Ok(())
    }

    /// Delete an element.
    pub fn submit_delete(&mut self, target: Uuid) -> Result<(), SubmitError> {
        let before = match self.engine.get(&target) {
            Some(element) => element.clone(),
            None => return Err(SubmitError::UnknownTarget),
        };

        let op = Operation::delete(
            self.ids.next_id(),
            self.config.replica_id,
            self.versions.next(),
            now_ms(),
            target,
        );
        self.apply_local(op, Some(HistoryEntry {
            element_id: target,
            before: Some(before),
            after: None,
        }));
        Ok(())
    }

    /// Replace the local selection and announce it to collaborators.
    /// Presence only: no undo entry, no authoritative change.
    pub fn submit_selection(&mut self, ids: Vec<Uuid>) {
        self.views.set_selection(ids.clone());
        let op = Operation::selection(
            self.ids.next_id(),
            self.config.replica_id,
            self.versions.next(),
            now_ms(),
            ids,
        );
        self.oplog.record(op.clone(), ApplyResult::Applied);
        self.forward(op);
    }

    /// Move the local cursor. Throttled; a `false` return means the update
    /// was recorded locally but not broadcast yet.
    pub fn submit_cursor(&mut self, pos: CursorPos) -> bool {
        match self.presence.update_local_cursor(pos) {
            Some(pos) => {
                let op = Operation::cursor(
                    self.ids.next_id(),
                    self.config.replica_id,
                    self.versions.next(),
                    now_ms(),
                    pos,
                );
                self.oplog.record(op.clone(), ApplyResult::Applied);
                self.forward(op);
                true
            }
            None => false,
        }
    }

    // ── Undo / redo ──────────────────────────────────────────────

    /// Undo the most recent local edit.
    ///
    /// The compensating operation is an ordinary local edit: freshly
    /// stamped, broadcast, and subject to the same tie-break as any other —
    /// not a privileged rollback.
    pub fn undo(&mut self) -> UndoRedo {
        let entry = match self.history.undo() {
            Some(entry) => entry.clone(),
            None => return UndoRedo::Unavailable,
        };
        let op = self.compensating_op(&entry.before, entry.element_id);
        self.apply_local(op, None);
        UndoRedo::Applied
    }

    /// Redo the most recently undone edit.
    pub fn redo(&mut self) -> UndoRedo {
        let entry = match self.history.redo() {
            Some(entry) => entry.clone(),
            None => return UndoRedo::Unavailable,
        };
        let op = self.compensating_op(&entry.after, entry.element_id);
        self.apply_local(op, None);
        UndoRedo::Applied
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// Operation that restores `state` for `element_id`.
    fn compensating_op(&mut self, state: &Option<Element>, element_id: Uuid) -> Operation {
        let op_id = self.ids.next_id();
        let version = self.versions.next();
        match state {
            // The edit created the element: compensate by deleting it.
            None => Operation::delete(op_id, self.config.replica_id, version, now_ms(), element_id),
            Some(element) => {
                if self.engine.get(&element_id).is_some() {
                    Operation::update(
                        op_id,
                        self.config.replica_id,
                        version,
                        now_ms(),
                        element_id,
                        ElementPatch::restoring(element),
                    )
                } else {
                    // Deleted (locally or remotely) in the meantime: a fresh
                    // Add with a newer stamp may recreate the id.
                    Operation::add(op_id, self.config.replica_id, version, now_ms(), element.clone())
                }
            }
        }
    }

    // ── Remote read path ─────────────────────────────────────────

    /// Queue a remote operation for the next [`EditorSession::pump`].
    ///
    /// Malformed operations are dropped here, before they can reach the
    /// merge engine; remote input is not trusted.
    pub fn enqueue_remote(&mut self, op: Operation) {
        if let Err(e) = op.validate_shape() {
            log::warn!("malformed remote op {} dropped: {e}", op.op_id);
            return;
        }
        if let OpPayload::Add(element) = &op.payload {
            if let Err(e) = element.validate(&self.pages) {
                log::warn!("invalid element in remote op {} dropped: {e}", op.op_id);
                return;
            }
        }
        // Lamport-style: later local edits must stamp above everything seen.
        self.versions.observe(op.version);
        self.inbound.enqueue(op);
    }

    /// Serially apply all queued remote operations. Remote failures are
    /// absorbed and logged, never surfaced.
    pub fn pump(&mut self) -> usize {
        self.inbound
            .drain(&mut self.engine, &mut self.presence, &mut self.oplog)
    }

    /// Record a peer announcement from the relay.
    pub fn peer_joined(&mut self, info: &ReplicaInfo) {
        self.presence.announce(info);
    }

    /// Drop a departed peer from presence.
    pub fn peer_left(&mut self, replica_id: &Uuid) {
        self.presence.remove(replica_id);
    }

    // ── Read surface ─────────────────────────────────────────────

    /// Refreshed derived views (by page, by id, selection).
    pub fn views(&mut self) -> &DerivedViews {
        self.views.refresh(&self.engine);
        &self.views
    }

    /// Snapshot of live collaborators, after TTL eviction.
    pub fn presence(&mut self) -> Vec<Collaborator> {
        self.presence.evict_idle();
        self.presence.snapshot()
    }

    pub fn replica_id(&self) -> Uuid {
        self.config.replica_id
    }

    pub fn replica_info(&self) -> ReplicaInfo {
        ReplicaInfo::with_id(self.config.replica_id, self.config.replica_name.clone())
    }

    /// Highest version minted so far — the resume floor for the next
    /// session of this replica.
    pub fn current_version(&self) -> u64 {
        self.versions.current()
    }

    pub fn oplog(&self) -> &OperationLog {
        &self.oplog
    }

    pub fn pages(&self) -> &PageMetrics {
        &self.pages
    }

    pub fn element_count(&self) -> usize {
        self.engine.live_count()
    }

    /// Deterministic digest of the live set, for convergence checks.
    pub fn digest(&self) -> Vec<(Uuid, crate::protocol::Stamp)> {
        self.engine.digest()
    }

    // ── Internals ────────────────────────────────────────────────

    /// Apply a locally originated operation: optimistic local apply, then
    /// history (for plain edits), then broadcast. Only operations that
    /// actually changed state are recorded in history or sent.
    fn apply_local(&mut self, op: Operation, history: Option<HistoryEntry>) {
        let outcome = dispatch(&op, &mut self.engine, &mut self.presence);
        self.oplog.record(op.clone(), outcome.clone());

        match outcome {
            ApplyResult::Applied => {
                if let Some(entry) = history {
                    self.history.push_edit(entry);
                }
                self.forward(op);
            }
            ApplyResult::NoOp => {
                // A local edit can only land stale if remote state already
                // dominates it; nothing changed, so nothing is broadcast.
                log::debug!("local op {} was a no-op", op.op_id);
            }
            ApplyResult::Rejected(reason) => {
                log::error!("local op {} rejected: {reason}", op.op_id);
            }
        }
    }

    fn forward(&mut self, op: Operation) {
        if let Err(e) = self.transport.send(op) {
            // Fire-and-forget: the channel owns retries. An edit that was
            // applied locally but not handed over is recovered by resync.
            log::warn!("transport send failed: {e}");
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
