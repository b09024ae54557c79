//! Watch service backed by the kernel facility the `notify` crate exposes:
//! inotify on Linux, `ReadDirectoryChangesW` on Windows, kqueue on the
//! BSDs. Native recursive registration is only offered where the kernel
//! has it (Windows); everywhere else a recursive registration attempt is
//! rejected so callers fall back to per-directory registration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;

use super::queue::{ReadyQueue, WatchKey, DEFAULT_QUEUE_SIZE};
use super::{RawEvent, RawEventKind, RegistrationMode, WatchService};
use crate::error::RegistrationError;
use crate::{Error, Result};

/// Whether the kernel facility behind `notify` can watch a whole subtree
/// with a single registration.
const NATIVE_RECURSIVE: bool = cfg!(windows);

/// The default cross-platform watch service.
pub struct NativeWatchService {
    inner: Arc<Inner>,
}

struct Inner {
    watcher: Mutex<Option<RecommendedWatcher>>,
    keys: Mutex<HashMap<PathBuf, Arc<WatchKey>>>,
    ready: ReadyQueue,
    queue_size: usize,
}

impl NativeWatchService {
    /// Create a service with the default per-key queue capacity.
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel watcher cannot be created.
    pub fn new() -> Result<Self> {
        Self::with_queue_size(DEFAULT_QUEUE_SIZE)
    }

    /// Create a service with a custom per-key queue capacity.
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel watcher cannot be created.
    pub fn with_queue_size(queue_size: usize) -> Result<Self> {
        let inner = Arc::new(Inner {
            watcher: Mutex::new(None),
            keys: Mutex::new(HashMap::new()),
            ready: ReadyQueue::new(),
            queue_size,
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle(res);
                }
            },
            notify::Config::default(),
        )
        .map_err(|e| Error::internal(format!("failed to create kernel watcher: {e}")))?;

        *inner.watcher.lock() = Some(watcher);
        Ok(Self { inner })
    }
}

impl WatchService for NativeWatchService {
    fn register(&self, directory: &Path, mode: RegistrationMode) -> Result<Arc<WatchKey>> {
        if self.inner.ready.is_closed() {
            return Err(Error::state("watch service closed"));
        }
        if mode == RegistrationMode::Recursive && !NATIVE_RECURSIVE {
            return Err(RegistrationError::Unsupported(
                "kernel has no native recursive registration".to_string(),
            )
            .into());
        }
        if !directory.is_dir() {
            return Err(RegistrationError::NotADirectory(directory.to_path_buf()).into());
        }

        let directory = directory.to_path_buf();
        let mut keys = self.inner.keys.lock();
        if let Some(existing) = keys.get(&directory) {
            return Ok(Arc::clone(existing));
        }

        let recursive = match mode {
            RegistrationMode::Recursive => RecursiveMode::Recursive,
            RegistrationMode::NonRecursive => RecursiveMode::NonRecursive,
        };
        {
            let mut watcher = self.inner.watcher.lock();
            let watcher = watcher
                .as_mut()
                .ok_or_else(|| Error::state("watch service closed"))?;
            watcher
                .watch(&directory, recursive)
                .map_err(|e| RegistrationError::watch_failed(&directory, e))?;
        }

        tracing::debug!(path = %directory.display(), ?mode, "Registered directory");
        let key = WatchKey::new(
            directory.clone(),
            self.inner.queue_size,
            self.inner.ready.sender(),
        );
        keys.insert(directory, Arc::clone(&key));
        Ok(key)
    }

    fn poll(&self) -> Option<Arc<WatchKey>> {
        self.inner.ready.poll()
    }

    fn take(&self) -> Result<Arc<WatchKey>> {
        self.inner.ready.take()
    }

    fn close(&self) {
        self.inner.ready.close();
        // Dropping the kernel watcher stops its callback thread.
        self.inner.watcher.lock().take();
        let mut keys = self.inner.keys.lock();
        for key in keys.values() {
            key.cancel();
        }
        keys.clear();
    }

    fn is_closed(&self) -> bool {
        self.inner.ready.is_closed()
    }
}

impl Drop for NativeWatchService {
    fn drop(&mut self) {
        self.close();
    }
}

impl Inner {
    fn handle(&self, res: notify::Result<Event>) {
        match res {
            Ok(event) => self.route(&event),
            Err(e) => tracing::warn!(error = %e, "Kernel watcher reported an error"),
        }
    }

    fn route(&self, event: &Event) {
        if event.need_rescan() {
            // The kernel lost events somewhere below every watched path.
            let keys = self.keys.lock();
            for key in keys.values() {
                key.signal_event(RawEvent::overflow(1));
            }
        }
        for (kind, path) in translate(event) {
            self.deliver(kind, path);
        }
    }

    fn deliver(&self, kind: RawEventKind, path: PathBuf) {
        let target = {
            let mut keys = self.keys.lock();
            let target = path
                .ancestors()
                .skip(1)
                .find_map(|ancestor| keys.get(ancestor).cloned())
                .or_else(|| keys.get(path.as_path()).cloned());

            // A deleted directory's own registration is gone at the kernel
            // level; invalidate and forget the key.
            if kind == RawEventKind::Delete {
                if let Some(own) = keys.remove(&path) {
                    own.cancel();
                }
            }
            target
        };

        match target {
            Some(key) => key.signal(kind, path, None),
            None => {
                tracing::trace!(path = %path.display(), ?kind, "Event for unwatched path dropped");
            }
        }
    }
}

/// Translate a kernel event into raw event kinds. Renames become
/// delete-plus-create; access notifications are dropped.
fn translate(event: &Event) -> Vec<(RawEventKind, PathBuf)> {
    let mut out = Vec::new();
    let first = event.paths.first().cloned();
    match event.kind {
        EventKind::Create(_) => {
            if let Some(path) = first {
                out.push((RawEventKind::Create, path));
            }
        }
        EventKind::Remove(_) => {
            if let Some(path) = first {
                out.push((RawEventKind::Delete, path));
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            if let Some(path) = first {
                out.push((RawEventKind::Delete, path));
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            if let Some(path) = first {
                out.push((RawEventKind::Create, path));
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if let Some(from) = first {
                out.push((RawEventKind::Delete, from));
            }
            if let Some(to) = event.paths.get(1).cloned() {
                out.push((RawEventKind::Create, to));
            }
        }
        EventKind::Modify(ModifyKind::Name(_)) => {
            // Kernel did not say which side of the rename this is.
            if let Some(path) = first {
                if path.symlink_metadata().is_ok() {
                    out.push((RawEventKind::Create, path));
                } else {
                    out.push((RawEventKind::Delete, path));
                }
            }
        }
        EventKind::Modify(_) | EventKind::Any => {
            if let Some(path) = first {
                out.push((RawEventKind::Modify, path));
            }
        }
        EventKind::Access(_) | EventKind::Other => {}
    }
    out
}
