//! The ordered path-to-hash table and known-directory set.
//!
//! One table backs each watcher. It is mutated only by the event-loop
//! thread; everything handed out to clients is a snapshot.

use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::hashing::{hash_path, FileHash, FileHasher};
use crate::visitor::FileTreeVisitor;
use crate::Result;

/// Ordered mapping of absolute paths to content hashes, plus the set of
/// paths known to be directories.
#[derive(Debug, Default)]
pub struct PathTable {
    hashes: BTreeMap<PathBuf, FileHash>,
    directories: HashSet<PathBuf>,
}

impl PathTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a hash for a path, returning the previous one if present.
    pub fn put(&mut self, path: impl Into<PathBuf>, hash: FileHash) -> Option<FileHash> {
        self.hashes.insert(path.into(), hash)
    }

    /// Look up the stored hash for a path.
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<&FileHash> {
        self.hashes.get(path)
    }

    /// Remove a path, returning its hash if present.
    pub fn remove(&mut self, path: &Path) -> Option<FileHash> {
        self.hashes.remove(path)
    }

    /// Number of tracked paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    /// True when no paths are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// All entries at or below `prefix`, in ascending path order. The
    /// prefix itself is included when present. Only whole path components
    /// match: `/a/b` does not cover `/a/bc`.
    #[must_use]
    pub fn subtree(&self, prefix: &Path) -> Vec<(PathBuf, FileHash)> {
        self.hashes
            .range::<Path, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(path, hash)| (path.clone(), hash.clone()))
            .collect()
    }

    /// Mark a path as a known directory.
    pub fn add_directory(&mut self, path: impl Into<PathBuf>) {
        self.directories.insert(path.into());
    }

    /// Unmark a directory, returning whether it was known.
    pub fn remove_directory(&mut self, path: &Path) -> bool {
        self.directories.remove(path)
    }

    /// True when the path is a known directory.
    #[must_use]
    pub fn is_directory(&self, path: &Path) -> bool {
        self.directories.contains(path)
    }

    /// A read-only snapshot of the path-to-hash mapping.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<PathBuf, FileHash> {
        self.hashes.clone()
    }

    /// Drop all entries.
    pub fn clear(&mut self) {
        self.hashes.clear();
        self.directories.clear();
    }
}

/// Seed a table from a set of root directories.
///
/// With a hasher, every directory and file below each root is hashed and
/// recorded; without one, only the directory set is populated. Unhashable
/// entries are skipped, matching how events for them will later be treated.
///
/// # Errors
///
/// Returns an error if the visitor propagates one.
pub fn seed_from_roots(
    roots: &[PathBuf],
    hasher: Option<&Arc<dyn FileHasher>>,
    visitor: &dyn FileTreeVisitor,
    table: &mut PathTable,
) -> Result<()> {
    // Both visit callbacks need the table; RefCell lets them share it.
    let table = std::cell::RefCell::new(table);
    for root in roots {
        match hasher {
            None => visitor.visit(
                root,
                &mut |dir| {
                    table.borrow_mut().add_directory(dir);
                    Ok(())
                },
                &mut |_| Ok(()),
            )?,
            Some(hasher) => visitor.visit(
                root,
                &mut |dir| {
                    let mut table = table.borrow_mut();
                    table.add_directory(dir);
                    if let Some(hash) = hash_path(hasher.as_ref(), dir) {
                        table.put(dir, hash);
                    }
                    Ok(())
                },
                &mut |file| {
                    if let Some(hash) = hash_path(hasher.as_ref(), file) {
                        table.borrow_mut().put(file, hash);
                    }
                    Ok(())
                },
            )?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::Murmur3Hasher;
    use crate::visitor::DefaultFileTreeVisitor;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_put_get_remove() {
        let mut table = PathTable::new();
        assert!(table.is_empty());

        assert!(table.put("/a/f", FileHash::from_u64(1)).is_none());
        assert_eq!(table.get(Path::new("/a/f")), Some(&FileHash::from_u64(1)));

        let prev = table.put("/a/f", FileHash::from_u64(2));
        assert_eq!(prev, Some(FileHash::from_u64(1)));

        assert_eq!(table.remove(Path::new("/a/f")), Some(FileHash::from_u64(2)));
        assert!(table.is_empty());
    }

    #[test]
    fn test_subtree_includes_prefix_and_descendants() {
        let mut table = PathTable::new();
        table.put("/r", FileHash::DIRECTORY);
        table.put("/r/a", FileHash::from_u64(1));
        table.put("/r/a/b", FileHash::from_u64(2));
        table.put("/r/c", FileHash::from_u64(3));

        let sub = table.subtree(Path::new("/r/a"));
        let paths: Vec<_> = sub.iter().map(|(p, _)| p.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("/r/a"), PathBuf::from("/r/a/b")]);
    }

    #[test]
    fn test_subtree_matches_whole_components_only() {
        let mut table = PathTable::new();
        table.put("/r/ab", FileHash::from_u64(1));
        table.put("/r/a", FileHash::from_u64(2));
        table.put("/r/a/x", FileHash::from_u64(3));

        let sub = table.subtree(Path::new("/r/a"));
        assert_eq!(sub.len(), 2);
        assert!(sub.iter().all(|(p, _)| !p.ends_with("ab")));
    }

    #[test]
    fn test_subtree_is_ordered_ascending() {
        let mut table = PathTable::new();
        table.put("/r/z", FileHash::from_u64(1));
        table.put("/r/a", FileHash::from_u64(2));
        table.put("/r/m", FileHash::from_u64(3));

        let sub = table.subtree(Path::new("/r"));
        let paths: Vec<_> = sub.iter().map(|(p, _)| p.clone()).collect();
        let mut sorted = paths.clone();
        sorted.sort();
        assert_eq!(paths, sorted);
    }

    #[test]
    fn test_directory_set() {
        let mut table = PathTable::new();
        table.add_directory("/r/d");
        assert!(table.is_directory(Path::new("/r/d")));
        assert!(!table.is_directory(Path::new("/r/other")));
        assert!(table.remove_directory(Path::new("/r/d")));
        assert!(!table.remove_directory(Path::new("/r/d")));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut table = PathTable::new();
        table.put("/r/f", FileHash::from_u64(1));

        let snap = table.snapshot();
        table.put("/r/g", FileHash::from_u64(2));

        assert_eq!(snap.len(), 1);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_seed_with_hasher_records_dirs_and_files() {
        let tmp = TempDir::new().unwrap();
        let sub = tmp.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("f.txt"), "hello").unwrap();

        let mut table = PathTable::new();
        let hasher: Arc<dyn FileHasher> = Arc::new(Murmur3Hasher);
        seed_from_roots(
            &[tmp.path().to_path_buf()],
            Some(&hasher),
            &DefaultFileTreeVisitor,
            &mut table,
        )
        .unwrap();

        assert_eq!(table.get(tmp.path()), Some(&FileHash::DIRECTORY));
        assert_eq!(table.get(&sub), Some(&FileHash::DIRECTORY));
        let file_hash = table.get(&sub.join("f.txt")).unwrap();
        assert!(!file_hash.is_directory());
        assert!(table.is_directory(&sub));
        assert!(!table.is_directory(&sub.join("f.txt")));
    }

    #[test]
    fn test_seed_without_hasher_records_directories_only() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("f.txt"), "hello").unwrap();

        let mut table = PathTable::new();
        seed_from_roots(
            &[tmp.path().to_path_buf()],
            None,
            &DefaultFileTreeVisitor,
            &mut table,
        )
        .unwrap();

        assert!(table.is_empty());
        assert!(table.is_directory(tmp.path()));
    }
}
