//! The hash-diff engine.
//!
//! FSEvents tells us *which directory* changed, not what happened inside
//! it. This engine reconstructs per-file create/modify/delete events by
//! comparing the directory's current on-disk contents against a cached map
//! of content hashes. The engine itself is platform-independent; the macOS
//! backend drives it from the FSEvents callback.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::hashing::{hash_path, FileHash, FileHasher};
use crate::visitor::FileTreeVisitor;
use crate::Result;

/// Outcome of one rescan. Consumers must deliver the three groups in
/// order (create, then modify, then delete) so an observer never sees a
/// deletion for a path that is re-created within the same rescan.
#[derive(Debug, Default)]
pub struct DiffOutcome {
    /// Paths that appeared, with their recorded hash.
    pub created: Vec<(PathBuf, FileHash)>,
    /// Paths whose hash changed, with the new hash.
    pub modified: Vec<(PathBuf, FileHash)>,
    /// Paths that disappeared, deepest-first so every descendant's
    /// deletion precedes its enclosing directory's.
    pub deleted: Vec<PathBuf>,
    /// True when the cache is empty after the rescan: everything under the
    /// watched root is gone and the registration should be cancelled.
    pub drained: bool,
}

/// Diffs on-disk state against a cached path-to-hash map.
pub struct HashDiffer {
    hashes: BTreeMap<PathBuf, FileHash>,
    hasher: Arc<dyn FileHasher>,
    visitor: Arc<dyn FileTreeVisitor>,
}

impl HashDiffer {
    /// Create an empty differ.
    #[must_use]
    pub fn new(hasher: Arc<dyn FileHasher>, visitor: Arc<dyn FileTreeVisitor>) -> Self {
        Self {
            hashes: BTreeMap::new(),
            hasher,
            visitor,
        }
    }

    /// Populate the cache by walking `root` and hashing everything below
    /// it, the root included. Unhashable entries are skipped; they will
    /// surface as creates once they become readable.
    ///
    /// # Errors
    ///
    /// Returns an error if the visitor propagates one.
    pub fn seed(&mut self, root: &Path) -> Result<()> {
        let hashes = RefCell::new(&mut self.hashes);
        let hasher = &self.hasher;
        let record = |path: &Path| {
            if let Some(hash) = hash_path(hasher.as_ref(), path) {
                hashes.borrow_mut().insert(path.to_path_buf(), hash);
            }
            Ok(())
        };
        self.visitor
            .visit(root, &mut |dir| record(dir), &mut |file| record(file))
    }

    /// Rescan `path` (a directory or, with file-level events, a single
    /// file) and diff against the cache.
    pub fn rescan(&mut self, path: &Path) -> DiffOutcome {
        let on_disk = self.list_on_disk(path);
        let mut outcome = DiffOutcome::default();

        for current in &on_disk {
            match self.hashes.get(current).cloned() {
                None => {
                    if let Some(hash) = hash_path(self.hasher.as_ref(), current) {
                        self.hashes.insert(current.clone(), hash.clone());
                        outcome.created.push((current.clone(), hash));
                    }
                }
                Some(stored) => {
                    if let Some(fresh) = hash_path(self.hasher.as_ref(), current) {
                        if fresh != stored {
                            self.hashes.insert(current.clone(), fresh.clone());
                            outcome.modified.push((current.clone(), fresh));
                        }
                    }
                }
            }
        }

        let gone: Vec<PathBuf> = self
            .hashes
            .range::<Path, _>((Bound::Included(path), Bound::Unbounded))
            .map(|(p, _)| p.clone())
            .take_while(|p| p.starts_with(path))
            .filter(|p| !on_disk.contains(p))
            .collect();
        for p in &gone {
            self.hashes.remove(p);
        }
        // Deepest-first: a directory's deletion is reported after its
        // contents'.
        outcome.deleted = gone.into_iter().rev().collect();

        outcome.drained = self.hashes.is_empty();
        outcome
    }

    /// Stored hash for a path, if any.
    #[must_use]
    pub fn stored(&self, path: &Path) -> Option<&FileHash> {
        self.hashes.get(path)
    }

    /// Number of cached paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    /// True when the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    fn list_on_disk(&self, path: &Path) -> BTreeSet<PathBuf> {
        let mut found = BTreeSet::new();
        if path.symlink_metadata().is_err() {
            return found;
        }
        found.insert(path.to_path_buf());
        {
            let cell = RefCell::new(&mut found);
            let _ = self.visitor.visit(
                path,
                &mut |p| {
                    cell.borrow_mut().insert(p.to_path_buf());
                    Ok(())
                },
                &mut |p| {
                    cell.borrow_mut().insert(p.to_path_buf());
                    Ok(())
                },
            );
        }
        found
    }
}

impl std::fmt::Debug for HashDiffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashDiffer")
            .field("tracked", &self.hashes.len())
            .finish_non_exhaustive()
    }
}
