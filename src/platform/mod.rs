//! Kernel watch backends behind a common contract.
//!
//! A [`WatchService`] registers directories and delivers raw events keyed
//! by a [`WatchKey`]. The default backend wraps the kernel facility exposed
//! by the `notify` crate (inotify, `ReadDirectoryChangesW`, kqueue). On
//! macOS the [`fsevents`] backend reimplements the contract on top of
//! FSEvents plus the [`diff`] engine, because the generic polling fallback
//! there is unusable.

pub mod diff;
#[cfg(target_os = "macos")]
pub mod fsevents;
pub mod native;
mod queue;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::hashing::FileHash;
use crate::Result;

pub use native::NativeWatchService;
pub use queue::{ReadyQueue, WatchKey, DEFAULT_QUEUE_SIZE};

/// Raw event kinds delivered by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawEventKind {
    /// A path appeared.
    Create,
    /// A path's content or metadata changed.
    Modify,
    /// A path disappeared.
    Delete,
    /// Events were lost; the `count` on the event says how many.
    Overflow,
}

/// A raw event drained from a [`WatchKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// What happened.
    pub kind: RawEventKind,
    /// Absolute path the event refers to. `None` only for overflow.
    pub path: Option<PathBuf>,
    /// Content hash the backend already computed, if any.
    pub hash: Option<FileHash>,
    /// Coalescing count; for overflow, the number of discarded events.
    pub count: usize,
}

impl RawEvent {
    /// A single event for `path`.
    #[must_use]
    pub fn new(kind: RawEventKind, path: PathBuf, hash: Option<FileHash>) -> Self {
        Self {
            kind,
            path: Some(path),
            hash,
            count: 1,
        }
    }

    /// A synthetic overflow event covering `count` discarded events.
    #[must_use]
    pub fn overflow(count: usize) -> Self {
        Self {
            kind: RawEventKind::Overflow,
            path: None,
            hash: None,
            count,
        }
    }
}

/// How a directory should be registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationMode {
    /// One registration covers the directory and its whole subtree.
    /// Backends without kernel support reject this with an unsupported
    /// registration error.
    Recursive,
    /// The registration covers direct children only.
    NonRecursive,
}

/// A source of raw directory events.
///
/// Implementations are shared across threads: the watcher's event loop
/// drains keys while backend threads fill them.
pub trait WatchService: Send + Sync {
    /// Register a directory for event delivery.
    ///
    /// Registering the same directory twice returns the existing key.
    ///
    /// # Errors
    ///
    /// Fails with an unsupported registration error when `mode` is
    /// [`RegistrationMode::Recursive`] and the kernel facility has no
    /// native recursive mode, or with a watch-failed error when the kernel
    /// rejects the path.
    fn register(&self, directory: &Path, mode: RegistrationMode) -> Result<Arc<WatchKey>>;

    /// Return a signalled key without blocking, or `None` if none is ready.
    fn poll(&self) -> Option<Arc<WatchKey>>;

    /// Block until a key is signalled.
    ///
    /// # Errors
    ///
    /// Fails with a state error once the service is closed.
    fn take(&self) -> Result<Arc<WatchKey>>;

    /// Close the service. Idempotent; wakes any blocked [`take`].
    ///
    /// [`take`]: WatchService::take
    fn close(&self);

    /// True once [`close`] has been called.
    ///
    /// [`close`]: WatchService::close
    fn is_closed(&self) -> bool;

    /// True when the backend already reports every path inside a newly
    /// created directory, so the consumer must not re-walk it to
    /// synthesize creates.
    fn delivers_recursive_creates(&self) -> bool {
        false
    }
}
