//! Per-root normalization of an event stream.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use super::entry::ChangeSetEntry;

/// Normalized created/modified/deleted sets for one root, accumulated
/// between consumptions. The three sets are pairwise disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    created: HashSet<ChangeSetEntry>,
    modified: HashSet<ChangeSetEntry>,
    deleted: HashSet<ChangeSetEntry>,
}

impl ChangeSet {
    /// Paths that appeared within the window.
    #[must_use]
    pub fn created(&self) -> &HashSet<ChangeSetEntry> {
        &self.created
    }

    /// Paths whose content changed within the window.
    #[must_use]
    pub fn modified(&self) -> &HashSet<ChangeSetEntry> {
        &self.modified
    }

    /// Paths that disappeared within the window.
    #[must_use]
    pub fn deleted(&self) -> &HashSet<ChangeSetEntry> {
        &self.deleted
    }

    /// True when nothing was observed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Folds a stream of events for one root into a [`ChangeSet`].
///
/// Transitions for a path within one un-consumed window:
///
/// | current  | CREATE   | MODIFY   | DELETE  |
/// |----------|----------|----------|---------|
/// | (absent) | created  | modified | deleted |
/// | created  | created  | created  | (absent)|
/// | modified | modified | modified | deleted |
/// | deleted  | modified | ignored  | deleted |
#[derive(Debug, Default)]
pub(crate) struct ChangeSetBuilder {
    created: HashMap<PathBuf, ChangeSetEntry>,
    modified: HashMap<PathBuf, ChangeSetEntry>,
    deleted: HashMap<PathBuf, ChangeSetEntry>,
}

impl ChangeSetBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_created(&mut self, entry: ChangeSetEntry) {
        let path = entry.path().to_path_buf();
        if self.modified.contains_key(&path) {
            self.modified.insert(path, entry);
        } else if self.deleted.remove(&path).is_some() {
            // Deleted then re-created within the window: the net effect is
            // a modification.
            self.modified.insert(path, entry);
        } else {
            self.created.insert(path, entry);
        }
    }

    pub(crate) fn add_modified(&mut self, entry: ChangeSetEntry) {
        let path = entry.path().to_path_buf();
        if self.created.contains_key(&path) {
            self.created.insert(path, entry);
        } else if self.deleted.contains_key(&path) {
            // A modify for a path already reported deleted carries no
            // usable information.
        } else {
            self.modified.insert(path, entry);
        }
    }

    pub(crate) fn add_deleted(&mut self, entry: ChangeSetEntry) {
        let path = entry.path().to_path_buf();
        if self.created.remove(&path).is_some() {
            // Created and deleted before consumption: nothing to report.
            return;
        }
        self.modified.remove(&path);
        self.deleted.insert(path, entry);
    }

    pub(crate) fn to_change_set(&self) -> ChangeSet {
        ChangeSet {
            created: self.created.values().cloned().collect(),
            modified: self.modified.values().cloned().collect(),
            deleted: self.deleted.values().cloned().collect(),
        }
    }
}
