//! Content fingerprints and pluggable file hashers.
//!
//! The watcher deduplicates kernel events by comparing a stored
//! [`FileHash`] against a freshly computed one. Hashes are opaque and
//! equality-only; the special [`FileHash::DIRECTORY`] value marks
//! directories and never equals any file hash.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

/// An opaque, equality-only fingerprint of a path's content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FileHash {
    /// Sentinel for directories. Never equal to any file hash.
    Directory,
    /// Fingerprint bytes of a regular file's content.
    Content(Box<[u8]>),
}

impl FileHash {
    /// The directory sentinel.
    pub const DIRECTORY: FileHash = FileHash::Directory;

    /// Create a hash from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::Content(bytes.to_vec().into_boxed_slice())
    }

    /// Create a hash from a 128-bit value (big-endian bytes).
    #[must_use]
    pub fn from_u128(value: u128) -> Self {
        Self::Content(value.to_be_bytes().to_vec().into_boxed_slice())
    }

    /// Create a hash from a 64-bit value (big-endian bytes).
    #[must_use]
    pub fn from_u64(value: u64) -> Self {
        Self::Content(value.to_be_bytes().to_vec().into_boxed_slice())
    }

    /// True when this is the directory sentinel.
    #[must_use]
    pub fn is_directory(&self) -> bool {
        matches!(self, Self::Directory)
    }

    /// The fingerprint bytes. Empty for the directory sentinel.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Directory => &[],
            Self::Content(bytes) => bytes,
        }
    }
}

impl fmt::Display for FileHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Directory => f.write_str("DIRECTORY"),
            Self::Content(bytes) => {
                for b in bytes.iter() {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// Computes the fingerprint of a regular file.
///
/// Called after the caller has established that the path exists and is not
/// a directory. An `Err` return is treated as "cannot hash right now" (the
/// file may be locked, unreadable, or deleted concurrently) and makes the
/// watcher drop or degrade the associated event; see [`hash_path`].
pub trait FileHasher: Send + Sync {
    /// Hash the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read.
    fn hash(&self, path: &Path) -> io::Result<FileHash>;
}

/// Murmur3 x64 128-bit content hasher. The default.
///
/// Not cryptographic; this is a change detector, and 128 bits make
/// accidental collisions between distinct contents vanishingly unlikely.
#[derive(Debug, Clone, Copy, Default)]
pub struct Murmur3Hasher;

impl FileHasher for Murmur3Hasher {
    fn hash(&self, path: &Path) -> io::Result<FileHash> {
        let mut reader = BufReader::new(File::open(path)?);
        let value = murmur3::murmur3_x64_128(&mut reader, 0)?;
        Ok(FileHash::from_u128(value))
    }
}

/// Blake3 content hasher. Faster than Murmur3 on large files.
#[derive(Debug, Clone, Copy, Default)]
pub struct Blake3Hasher;

impl FileHasher for Blake3Hasher {
    fn hash(&self, path: &Path) -> io::Result<FileHash> {
        let mut reader = File::open(path)?;
        let mut hasher = blake3::Hasher::new();
        io::copy(&mut reader, &mut hasher)?;
        Ok(FileHash::from_bytes(hasher.finalize().as_bytes()))
    }
}

/// Uses the last-modified time as the fingerprint instead of file content.
///
/// Much cheaper than content hashing but only valid on filesystems with at
/// least millisecond timestamp resolution; coarser clocks make back-to-back
/// writes invisible.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastModifiedHasher;

impl FileHasher for LastModifiedHasher {
    fn hash(&self, path: &Path) -> io::Result<FileHash> {
        let modified = path.symlink_metadata()?.modified()?;
        let nanos = modified
            .duration_since(UNIX_EPOCH)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
            .as_nanos();
        Ok(FileHash::from_u128(nanos))
    }
}

/// A hasher that returns a new value on every call, so every observation of
/// a path is treated as a change. Used when hashing is disabled but the
/// backend still needs per-path bookkeeping.
#[derive(Debug, Default)]
pub struct CountingHasher {
    value: AtomicU64,
}

impl CountingHasher {
    /// Create a counting hasher starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl FileHasher for CountingHasher {
    fn hash(&self, _path: &Path) -> io::Result<FileHash> {
        Ok(FileHash::from_u64(
            self.value.fetch_add(1, Ordering::Relaxed) + 1,
        ))
    }
}

/// The default content hasher.
#[must_use]
pub fn default_hasher() -> Arc<dyn FileHasher> {
    Arc::new(Murmur3Hasher)
}

/// Hash a path, folding every failure mode into `None`.
///
/// Returns [`FileHash::DIRECTORY`] for directories, `None` when the path
/// does not exist or cannot be read. Symlinks are not followed for the
/// directory check, so a link to a directory hashes as a file.
#[must_use]
pub fn hash_path(hasher: &dyn FileHasher, path: &Path) -> Option<FileHash> {
    match path.symlink_metadata() {
        Ok(meta) if meta.is_dir() => Some(FileHash::Directory),
        Ok(_) => hasher.hash(path).ok(),
        Err(_) => None,
    }
}
