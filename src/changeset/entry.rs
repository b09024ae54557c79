//! Entries of a normalized change set.

use std::path::{Path, PathBuf};

use crate::hashing::FileHash;

/// One path in a [`ChangeSet`](crate::ChangeSet), with what was known
/// about it when its last event arrived.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeSetEntry {
    path: PathBuf,
    is_directory: bool,
    hash: Option<FileHash>,
    root: PathBuf,
}

impl ChangeSetEntry {
    /// Build an entry.
    #[must_use]
    pub fn new(path: PathBuf, is_directory: bool, hash: Option<FileHash>, root: PathBuf) -> Self {
        Self {
            path,
            is_directory,
            hash,
            root,
        }
    }

    /// The affected absolute path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when the path is a directory.
    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.is_directory
    }

    /// Content hash recorded with the entry's last event, if any.
    #[must_use]
    pub fn hash(&self) -> Option<&FileHash> {
        self.hash.as_ref()
    }

    /// The registered root the path belongs to.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}
