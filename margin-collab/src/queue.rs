//! Serial operation queue.
//!
//! All mutation of the authoritative element set funnels through a single
//! drain loop: operations are popped one at a time and dispatched, so no
//! two applies can ever interleave. Arrival order from a single connection
//! is preserved; cross-sender order is not guaranteed and not required —
//! the merge engine's tie-break is arrival-order-independent.
//!
//! A panicking apply is caught at the queue boundary, logged with the
//! offending operation, and the drain continues: one poisoned operation
//! never stalls the queue.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::merge::{ApplyResult, MergeEngine, RejectReason};
use crate::oplog::OperationLog;
use crate::presence::PresenceTracker;
use crate::protocol::Operation;

/// Route one operation to its owner: presence payloads go to the presence
/// table (unconditional last-arrival-wins), everything else to the merge
/// engine.
pub(crate) fn dispatch(
    op: &Operation,
    engine: &mut MergeEngine,
    presence: &mut PresenceTracker,
) -> ApplyResult {
    if op.is_presence() {
        presence.observe(op);
        ApplyResult::Applied
    } else {
        engine.apply(op)
    }
}

/// FIFO queue of inbound operations awaiting serial application.
pub struct OperationQueue {
    pending: VecDeque<Operation>,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self { pending: VecDeque::new() }
    }

    /// Append an operation; it will be applied on the next drain.
    pub fn enqueue(&mut self, op: Operation) {
        self.pending.push_back(op);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drain the queue, applying each operation through `dispatch` and
    /// recording every outcome in the log. Returns the number of
    /// operations processed.
    pub fn drain(
        &mut self,
        engine: &mut MergeEngine,
        presence: &mut PresenceTracker,
        log: &mut OperationLog,
    ) -> usize {
        self.drain_with(log, |op| dispatch(op, engine, presence))
    }

    /// Drain with a caller-supplied apply function (the production path
    /// goes through [`OperationQueue::drain`]).
    pub fn drain_with<F>(&mut self, log: &mut OperationLog, mut apply: F) -> usize
    where
        F: FnMut(&Operation) -> ApplyResult,
    {
        let mut processed = 0;
        while let Some(op) = self.pending.pop_front() {
            let outcome = match catch_unwind(AssertUnwindSafe(|| apply(&op))) {
                Ok(outcome) => outcome,
                Err(_) => {
                    log::error!(
                        "apply panicked for op {} ({}); continuing drain",
                        op.op_id,
                        op.kind().as_str()
                    );
                    ApplyResult::Rejected(RejectReason::Internal)
                }
            };

            match &outcome {
                ApplyResult::Applied => {}
                ApplyResult::NoOp => {
                    log::debug!("op {} ({}) was a no-op", op.op_id, op.kind().as_str());
                }
                ApplyResult::Rejected(reason) => {
                    log::warn!("op {} ({}) rejected: {reason}", op.op_id, op.kind().as_str());
                }
            }

            log.record(op, outcome);
            processed += 1;
        }
        processed
    }
}

impl Default for OperationQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Bounds, Color, Element, ElementBody};
    use crate::protocol::CursorPos;
    use std::time::Duration;
    use uuid::Uuid;

    fn add_op(op_id: u128, element_id: u128, version: u64) -> Operation {
        let origin = Uuid::from_u128(0xA);
        Operation::add(
            Uuid::from_u128(op_id),
            origin,
            version,
            0,
            Element::new(
                Uuid::from_u128(element_id),
                0,
                Bounds::new(0.0, 0.0, 10.0, 10.0),
                ElementBody::Text {
                    text: "x".into(),
                    font_size: 12.0,
                    color: Color::BLACK,
                },
                0,
                origin,
            ),
        )
    }

    fn fixtures() -> (MergeEngine, PresenceTracker, OperationLog) {
        (
            MergeEngine::default(),
            PresenceTracker::new(
                Uuid::from_u128(0x10CA),
                Duration::from_secs(30),
                Duration::from_millis(33),
            ),
            OperationLog::with_capacity(100),
        )
    }

    #[test]
    fn test_drain_preserves_fifo_order() {
        let (mut engine, mut presence, mut log) = fixtures();
        let mut queue = OperationQueue::new();

        queue.enqueue(add_op(1, 1, 1));
        queue.enqueue(add_op(2, 2, 2));
        queue.enqueue(add_op(3, 3, 3));

        let processed = queue.drain(&mut engine, &mut presence, &mut log);
        assert_eq!(processed, 3);
        assert!(queue.is_empty());

        let ids: Vec<u128> = log.iter().map(|e| e.op.op_id.as_u128()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(engine.live_count(), 3);
    }

    #[test]
    fn test_presence_routed_to_tracker() {
        let (mut engine, mut presence, mut log) = fixtures();
        let mut queue = OperationQueue::new();

        queue.enqueue(Operation::cursor(
            Uuid::from_u128(1),
            Uuid::from_u128(0xB),
            1,
            0,
            CursorPos::new(5.0, 5.0, 0),
        ));
        queue.drain(&mut engine, &mut presence, &mut log);

        assert_eq!(presence.peer_count(), 1);
        // Presence never touches the authoritative set.
        assert_eq!(engine.live_count(), 0);
        assert_eq!(engine.revision(), 0);
    }

    #[test]
    fn test_poisoned_op_does_not_stall_queue() {
        let mut log = OperationLog::with_capacity(100);
        let mut queue = OperationQueue::new();

        queue.enqueue(add_op(1, 1, 1));
        queue.enqueue(add_op(2, 2, 2)); // poisoned below
        queue.enqueue(add_op(3, 3, 3));

        let mut applied = Vec::new();
        let processed = queue.drain_with(&mut log, |op| {
            if op.op_id == Uuid::from_u128(2) {
                panic!("poisoned operation");
            }
            applied.push(op.op_id.as_u128());
            ApplyResult::Applied
        });

        assert_eq!(processed, 3);
        assert_eq!(applied, vec![1, 3]);
        assert_eq!(
            log.find(&Uuid::from_u128(2)).unwrap().outcome,
            ApplyResult::Rejected(RejectReason::Internal)
        );
    }

    #[test]
    fn test_rejected_remote_op_absorbed() {
        let (mut engine, mut presence, mut log) = fixtures();
        let mut queue = OperationQueue::new();

        // Delete for an id this replica has never seen.
        queue.enqueue(Operation::delete(
            Uuid::from_u128(1),
            Uuid::from_u128(0xB),
            1,
            0,
            Uuid::from_u128(42),
        ));
        queue.enqueue(add_op(2, 1, 1));

        let processed = queue.drain(&mut engine, &mut presence, &mut log);
        assert_eq!(processed, 2);
        // The rejection did not prevent the following add.
        assert_eq!(engine.live_count(), 1);
    }

    #[test]
    fn test_drain_empty_queue() {
        let (mut engine, mut presence, mut log) = fixtures();
        let mut queue = OperationQueue::new();
        assert_eq!(queue.drain(&mut engine, &mut presence, &mut log), 0);
    }
}
