//! Merge engine: the single writer of the authoritative element set.
//!
//! Conflict resolution is last-writer-wins per element (not per field, so a
//! partial update never interleaves with a competing rewrite). The winner of
//! any conflict is chosen by the [`Stamp`] total order, which is identical
//! on every replica — two replicas that apply the same operation set
//! converge to the same authoritative set regardless of arrival order.
//!
//! Deleted ids are kept as tombstones so a late-arriving, lower-stamped
//! Add/Update cannot resurrect them; only a genuinely newer Add may recreate
//! an id.
//!
//! Reference: Kleppmann, Chapter 5 — Detecting Concurrent Writes

use std::collections::{HashMap, HashSet, VecDeque};
use uuid::Uuid;

use crate::element::Element;
use crate::protocol::{OpPayload, Operation, Stamp};

/// Outcome of applying one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyResult {
    /// The operation changed authoritative state.
    Applied,
    /// Duplicate or stale operation; dropped without error. Expected under
    /// eventual delivery, not exceptional.
    NoOp,
    /// The operation cannot be applied and was discarded.
    Rejected(RejectReason),
}

impl ApplyResult {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyResult::Applied)
    }
}

/// Why an operation was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Update/Delete against an id this replica has never seen.
    UnknownTarget,
    /// Structurally invalid operation (never broadcast by a well-behaved
    /// replica, but remote input is not trusted).
    Malformed,
    /// Presence payloads never reach the authoritative set; routing them
    /// here is a caller bug that must not corrupt state.
    PresencePayload,
    /// The apply itself failed unexpectedly; caught at the queue boundary.
    Internal,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::UnknownTarget => write!(f, "no-such-element"),
            RejectReason::Malformed => write!(f, "malformed-operation"),
            RejectReason::PresencePayload => write!(f, "presence-payload"),
            RejectReason::Internal => write!(f, "apply-failure"),
        }
    }
}

#[derive(Debug, Clone)]
enum SlotBody {
    Live(Element),
    Tombstone,
}

/// One entry in the authoritative set: the element (or its grave) plus the
/// stamp of the last winning operation.
#[derive(Debug, Clone)]
struct Slot {
    stamp: Stamp,
    body: SlotBody,
}

/// The authoritative element set and the policy that mutates it.
///
/// Exactly one writer: `apply` takes `&mut self` and is only reachable from
/// the session's serial drain. Everything else reads snapshots.
pub struct MergeEngine {
    slots: HashMap<Uuid, Slot>,
    /// Bounded idempotence window of already-applied operation ids.
    seen: HashSet<Uuid>,
    seen_order: VecDeque<Uuid>,
    seen_capacity: usize,
    /// Bumped on every visible mutation; drives view memoization.
    revision: u64,
}

impl MergeEngine {
    pub fn new(seen_capacity: usize) -> Self {
        Self {
            slots: HashMap::new(),
            seen: HashSet::with_capacity(seen_capacity.min(1024)),
            seen_order: VecDeque::with_capacity(seen_capacity.min(1024)),
            seen_capacity,
            revision: 0,
        }
    }

    /// Apply one operation under the LWW policy.
    ///
    /// Idempotent: re-applying an already-applied operation id is a `NoOp`.
    pub fn apply(&mut self, op: &Operation) -> ApplyResult {
        if op.validate_shape().is_err() {
            return ApplyResult::Rejected(RejectReason::Malformed);
        }
        if op.is_presence() {
            return ApplyResult::Rejected(RejectReason::PresencePayload);
        }
        if self.seen.contains(&op.op_id) {
            log::debug!("duplicate op {} ignored", op.op_id);
            return ApplyResult::NoOp;
        }

        let stamp = op.stamp();
        let result = match &op.payload {
            OpPayload::Add(element) => self.apply_add(element, stamp),
            OpPayload::Update(_) => self.apply_update(op, stamp),
            OpPayload::Delete => self.apply_delete(op, stamp),
            // unreachable: presence handled above
            OpPayload::Selection(_) | OpPayload::Cursor(_) => {
                ApplyResult::Rejected(RejectReason::PresencePayload)
            }
        };

        if result.is_applied() {
            self.remember(op.op_id);
        }
        result
    }

    fn apply_add(&mut self, element: &Element, stamp: Stamp) -> ApplyResult {
        match self.slots.get_mut(&element.id) {
            None => {
                self.slots.insert(
                    element.id,
                    Slot { stamp, body: SlotBody::Live(element.clone()) },
                );
                self.revision += 1;
                ApplyResult::Applied
            }
            Some(slot) => {
                if stamp > slot.stamp {
                    // Full replacement: the higher stamp wins the element
                    // wholesale, including over a tombstone.
                    slot.stamp = stamp;
                    slot.body = SlotBody::Live(element.clone());
                    self.revision += 1;
                    ApplyResult::Applied
                } else {
                    log::debug!(
                        "stale add for {} (incoming {:?} <= stored {:?})",
                        element.id,
                        stamp,
                        slot.stamp
                    );
                    ApplyResult::NoOp
                }
            }
        }
    }

    fn apply_update(&mut self, op: &Operation, stamp: Stamp) -> ApplyResult {
        let target = match op.target {
            Some(t) => t,
            None => return ApplyResult::Rejected(RejectReason::Malformed),
        };
        let patch = match &op.payload {
            OpPayload::Update(patch) => patch,
            _ => return ApplyResult::Rejected(RejectReason::Malformed),
        };

        match self.slots.get_mut(&target) {
            None => ApplyResult::Rejected(RejectReason::UnknownTarget),
            Some(Slot { body: SlotBody::Tombstone, .. }) => {
                // Updates never resurrect a deleted id.
                log::debug!("update for tombstoned element {target} dropped");
                ApplyResult::NoOp
            }
            Some(slot) => {
                if stamp > slot.stamp {
                    if let SlotBody::Live(ref mut element) = slot.body {
                        element.apply_patch(patch, op.timestamp_ms, op.origin);
                    }
                    slot.stamp = stamp;
                    self.revision += 1;
                    ApplyResult::Applied
                } else {
                    log::debug!(
                        "stale update for {target} (incoming {:?} <= stored {:?})",
                        stamp,
                        slot.stamp
                    );
                    ApplyResult::NoOp
                }
            }
        }
    }

    fn apply_delete(&mut self, op: &Operation, stamp: Stamp) -> ApplyResult {
        let target = match op.target {
            Some(t) => t,
            None => return ApplyResult::Rejected(RejectReason::Malformed),
        };

        match self.slots.get_mut(&target) {
            None => ApplyResult::Rejected(RejectReason::UnknownTarget),
            Some(slot) => {
                if stamp > slot.stamp {
                    let was_live = matches!(slot.body, SlotBody::Live(_));
                    slot.stamp = stamp;
                    slot.body = SlotBody::Tombstone;
                    if was_live {
                        self.revision += 1;
                    }
                    ApplyResult::Applied
                } else {
                    log::debug!(
                        "stale delete for {target} (incoming {:?} <= stored {:?})",
                        stamp,
                        slot.stamp
                    );
                    ApplyResult::NoOp
                }
            }
        }
    }

    fn remember(&mut self, op_id: Uuid) {
        if self.seen_capacity == 0 {
            return;
        }
        if self.seen_order.len() >= self.seen_capacity {
            if let Some(oldest) = self.seen_order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(op_id);
        self.seen_order.push_back(op_id);
    }

    // ── Read surface ─────────────────────────────────────────────

    /// Live element by id (tombstoned ids return `None`).
    pub fn get(&self, id: &Uuid) -> Option<&Element> {
        match self.slots.get(id) {
            Some(Slot { body: SlotBody::Live(element), .. }) => Some(element),
            _ => None,
        }
    }

    /// Whether an id is currently tombstoned.
    pub fn is_tombstoned(&self, id: &Uuid) -> bool {
        matches!(self.slots.get(id), Some(Slot { body: SlotBody::Tombstone, .. }))
    }

    /// The last-writer stamp stored for an id, live or tombstoned.
    pub fn stamp_of(&self, id: &Uuid) -> Option<Stamp> {
        self.slots.get(id).map(|slot| slot.stamp)
    }

    /// Iterate all live elements.
    pub fn live_elements(&self) -> impl Iterator<Item = &Element> {
        self.slots.values().filter_map(|slot| match &slot.body {
            SlotBody::Live(element) => Some(element),
            SlotBody::Tombstone => None,
        })
    }

    pub fn live_count(&self) -> usize {
        self.live_elements().count()
    }

    pub fn tombstone_count(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| matches!(slot.body, SlotBody::Tombstone))
            .count()
    }

    /// Monotonic revision of the authoritative set.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Deterministic digest of the live set, for convergence checks:
    /// (id, stamp) pairs sorted by id.
    pub fn digest(&self) -> Vec<(Uuid, Stamp)> {
        let mut pairs: Vec<(Uuid, Stamp)> = self
            .slots
            .iter()
            .filter(|(_, slot)| matches!(slot.body, SlotBody::Live(_)))
            .map(|(id, slot)| (*id, slot.stamp))
            .collect();
        pairs.sort();
        pairs
    }
}

impl Default for MergeEngine {
    fn default() -> Self {
        Self::new(4_096)
    }
}
