//! Memoized, read-only projections over the authoritative element set.
//!
//! Consumers read by-page, by-id and selected-element views built from an
//! immutable snapshot. The memoization key is (merge revision, selection
//! revision): any mismatch rebuilds before serving. A stale view is a
//! correctness bug, not a performance nuance — it can cause edits to target
//! elements that no longer exist.

use std::collections::HashMap;
use uuid::Uuid;

use crate::element::Element;
use crate::merge::MergeEngine;

/// Derived-view cache. Owned by the session; refreshed lazily on read.
pub struct DerivedViews {
    /// Merge revision the cache was built from (`None` = never built).
    built_revision: Option<u64>,
    /// Bumped on every local selection change.
    selection_revision: u64,
    built_selection_revision: Option<u64>,

    by_id: HashMap<Uuid, Element>,
    by_page: HashMap<u32, Vec<Element>>,
    selection: Vec<Uuid>,
    selected: Vec<Element>,
}

impl DerivedViews {
    pub fn new() -> Self {
        Self {
            built_revision: None,
            selection_revision: 0,
            built_selection_revision: None,
            by_id: HashMap::new(),
            by_page: HashMap::new(),
            selection: Vec::new(),
            selected: Vec::new(),
        }
    }

    /// Replace the local selection id list.
    pub fn set_selection(&mut self, ids: Vec<Uuid>) {
        self.selection = ids;
        self.selection_revision += 1;
    }

    pub fn selection_ids(&self) -> &[Uuid] {
        &self.selection
    }

    /// Rebuild whatever is stale. Cheap when nothing changed.
    pub fn refresh(&mut self, engine: &MergeEngine) {
        let revision = engine.revision();
        let elements_stale = self.built_revision != Some(revision);

        if elements_stale {
            self.by_id.clear();
            self.by_page.clear();
            for element in engine.live_elements() {
                self.by_id.insert(element.id, element.clone());
                self.by_page
                    .entry(element.page_index)
                    .or_insert_with(Vec::new)
                    .push(element.clone());
            }
            // Stable order per page: creation time, id as tie-break.
            for list in self.by_page.values_mut() {
                list.sort_by_key(|e| (e.created_at_ms, e.id));
            }
            self.built_revision = Some(revision);
        }

        if elements_stale || self.built_selection_revision != Some(self.selection_revision) {
            self.selected = self
                .selection
                .iter()
                .filter_map(|id| self.by_id.get(id).cloned())
                .collect();
            self.built_selection_revision = Some(self.selection_revision);
        }
    }

    /// Elements on a page, in stable order. Empty slice for unknown pages.
    pub fn by_page(&self, page_index: u32) -> &[Element] {
        self.by_page.get(&page_index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn by_id(&self, id: &Uuid) -> Option<&Element> {
        self.by_id.get(id)
    }

    /// Currently selected elements that still exist.
    pub fn selected(&self) -> &[Element] {
        &self.selected
    }

    pub fn element_count(&self) -> usize {
        self.by_id.len()
    }
}

impl Default for DerivedViews {
    fn default() -> Self {
        Self::new()
    }
}
