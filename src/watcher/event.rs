//! Directory change events delivered to listeners.

use std::path::{Path, PathBuf};

use crate::hashing::FileHash;

/// What happened to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A new file or directory appeared.
    Create,
    /// An existing file's content changed.
    Modify,
    /// A file or directory disappeared.
    Delete,
    /// Events were lost; `count` says how many.
    Overflow,
}

/// One observed change below a registered root.
///
/// Immutable; produced by the watcher's event loop and owned by the
/// listener once delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryChangeEvent {
    kind: EventKind,
    is_directory: bool,
    path: Option<PathBuf>,
    hash: Option<FileHash>,
    count: usize,
    root: PathBuf,
}

impl DirectoryChangeEvent {
    /// Build an event. `path` is `None` only for overflow.
    #[must_use]
    pub fn new(
        kind: EventKind,
        is_directory: bool,
        path: Option<PathBuf>,
        hash: Option<FileHash>,
        count: usize,
        root: PathBuf,
    ) -> Self {
        Self {
            kind,
            is_directory,
            path,
            hash,
            count,
            root,
        }
    }

    /// What happened.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// True when the affected path is a directory.
    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.is_directory
    }

    /// The affected absolute path. `None` only for overflow events.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Content hash recorded for the path, when hashing is enabled and the
    /// event is a create or modify.
    #[must_use]
    pub fn hash(&self) -> Option<&FileHash> {
        self.hash.as_ref()
    }

    /// Coalescing count; for overflow, the number of lost events.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// The registered root this event was observed under.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}
