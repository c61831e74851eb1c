//! Session version counter and id generation.
//!
//! Both are explicit, constructor-injected dependencies so tests can supply
//! deterministic sequences — there are no ambient singletons.

use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Per-session monotonic version counter.
///
/// Strictly increasing for the lifetime of the session; the first stamped
/// version is `floor + 1`. On session resume the caller supplies the highest
/// version previously used by this replica so versions are never reused
/// after a reconnect.
#[derive(Debug)]
pub struct VersionCounter {
    current: AtomicU64,
}

impl VersionCounter {
    /// Fresh session: first `next()` returns 1.
    pub fn new() -> Self {
        Self::resume(0)
    }

    /// Resumed session: first `next()` returns `floor + 1`.
    pub fn resume(floor: u64) -> Self {
        Self { current: AtomicU64::new(floor) }
    }

    /// Mint the next version. Never decreases, never repeats.
    pub fn next(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Raise the counter to at least `seen` (Lamport-style), so the next
    /// locally minted version stamps above every remote edit observed so
    /// far.
    pub fn observe(&self, seen: u64) {
        self.current.fetch_max(seen, Ordering::SeqCst);
    }

    /// Highest version minted so far (the resume floor for the next session).
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }
}

impl Default for VersionCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Source of unique ids for elements and operations.
pub trait IdSource: Send {
    fn next_id(&mut self) -> Uuid;
}

/// Production id source: random v4 UUIDs.
#[derive(Debug, Default)]
pub struct RandomIds;

impl IdSource for RandomIds {
    fn next_id(&mut self) -> Uuid {
        Uuid::new_v4()
    }
}

/// Deterministic id source for tests.
#[derive(Debug)]
pub struct SequentialIds {
    next: u128,
}

impl SequentialIds {
    pub fn starting_at(next: u128) -> Self {
        Self { next }
    }
}

impl IdSource for SequentialIds {
    fn next_id(&mut self) -> Uuid {
        let id = Uuid::from_u128(self.next);
        self.next += 1;
        id
    }
}
