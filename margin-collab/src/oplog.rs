//! Bounded, append-only log of applied operations.
//!
//! Diagnostic only — never the source of truth. The oldest entry is evicted
//! first once the window is full. The relay reuses the same structure as a
//! bounded replay window for late joiners.

use std::collections::VecDeque;
use uuid::Uuid;

use crate::merge::ApplyResult;
use crate::protocol::Operation;

/// One logged operation with its apply outcome.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub op: Operation,
    pub outcome: ApplyResult,
}

/// Bounded operation history, oldest evicted first.
pub struct OperationLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl OperationLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest if the window is full.
    pub fn record(&mut self, op: Operation, outcome: ApplyResult) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry { op, outcome });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest-first iteration.
    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// Operations that changed state, oldest first (the relay's replay set).
    pub fn applied_ops(&self) -> impl Iterator<Item = &Operation> {
        self.entries
            .iter()
            .filter(|entry| entry.outcome.is_applied())
            .map(|entry| &entry.op)
    }

    pub fn find(&self, op_id: &Uuid) -> Option<&LogEntry> {
        self.entries.iter().find(|entry| entry.op.op_id == *op_id)
    }
}
