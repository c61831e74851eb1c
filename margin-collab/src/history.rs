//! Local-only undo/redo timeline.
//!
//! Two stacks of per-element before/after snapshots, populated only by
//! locally originated edits — remote merges never create entries, and
//! undoing a local edit is expressed as a fresh, ordinary local operation
//! (broadcast and tie-broken like any other edit), never as a privileged
//! rollback of replicated state.

use std::collections::VecDeque;
use uuid::Uuid;

use crate::element::Element;

/// One local edit: the element's state before and after.
///
/// `before == None` means the edit created the element; `after == None`
/// means it deleted it.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub element_id: Uuid,
    pub before: Option<Element>,
    pub after: Option<Element>,
}

/// Whether an undo/redo request did anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoRedo {
    Applied,
    /// The respective stack was empty; nothing happened.
    Unavailable,
}

/// Past/future stacks with bounded depth (oldest undo states evicted
/// first).
pub struct UndoRedoTimeline {
    past: VecDeque<HistoryEntry>,
    future: Vec<HistoryEntry>,
    max_depth: usize,
}

impl UndoRedoTimeline {
    pub fn new(max_depth: usize) -> Self {
        Self {
            past: VecDeque::with_capacity(max_depth.min(256)),
            future: Vec::new(),
            max_depth,
        }
    }

    /// Record a fresh local edit. Clears the future stack (standard
    /// branch-discard-on-new-edit semantics).
    pub fn push_edit(&mut self, entry: HistoryEntry) {
        self.future.clear();
        if self.max_depth == 0 {
            return;
        }
        if self.past.len() >= self.max_depth {
            self.past.pop_front();
        }
        self.past.push_back(entry);
    }

    /// Pop the most recent edit for undoing; the entry moves to the future
    /// stack. The caller applies `before` as a new local operation.
    pub fn undo(&mut self) -> Option<&HistoryEntry> {
        let entry = self.past.pop_back()?;
        self.future.push(entry);
        self.future.last()
    }

    /// Pop the most recently undone edit for redoing; the entry moves back
    /// to the past stack. The caller applies `after` as a new local
    /// operation.
    pub fn redo(&mut self) -> Option<&HistoryEntry> {
        let entry = self.future.pop()?;
        self.past.push_back(entry);
        self.past.back()
    }

    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.past.len()
    }

    pub fn clear(&mut self) {
        self.past.clear();
        self.future.clear();
    }
}
