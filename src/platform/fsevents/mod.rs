//! Watch service built on macOS FSEvents.
//!
//! FSEvents reports directory-granularity changes on a Core Foundation run
//! loop. This backend owns one run-loop thread per registered root and
//! reconstructs per-file events with the [`HashDiffer`]: each callback
//! rescans the reported path, diffs it against the cached hash map, and
//! signals create, modify, then delete events on the registration's key.
//! When the cache drains completely the root itself is gone; the stream is
//! torn down and the key cancelled before the pending deletes are
//! delivered, so consumers observe the deletions and then the
//! invalidation.
//!
//! If the root is replaced by a new directory of the same name while
//! watched, behavior is undefined; re-register to watch the replacement.

mod runloop;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::diff::HashDiffer;
use super::queue::{ReadyQueue, WatchKey, DEFAULT_QUEUE_SIZE};
use super::{RawEventKind, RegistrationMode, WatchService};
use crate::error::RegistrationError;
use crate::hashing::{default_hasher, CountingHasher, FileHasher};
use crate::visitor::{DefaultFileTreeVisitor, FileTreeVisitor};
use crate::{Error, Result};

use runloop::RunLoop;

/// Default FSEvents latency in seconds.
pub const DEFAULT_LATENCY: f64 = 0.5;

/// Configuration for [`FsEventsWatchService`].
pub struct FsEventsConfig {
    /// Maximum number of seconds the kernel may coalesce events before the
    /// callback fires.
    pub latency: f64,
    /// Capacity of each registration's event queue.
    pub queue_size: usize,
    /// Ask the kernel for file-granularity events. Costs more; forced on
    /// when no hasher is configured, because without hashes the diff
    /// engine cannot tell which files in a directory actually changed.
    pub file_level_events: bool,
    /// Content hasher for the diff engine. `None` disables hashing and
    /// substitutes an ever-incrementing counter so every observation is
    /// treated as changed.
    pub hasher: Option<Arc<dyn FileHasher>>,
    /// Tree walker used for seeding and rescans.
    pub visitor: Arc<dyn FileTreeVisitor>,
}

impl Default for FsEventsConfig {
    fn default() -> Self {
        Self {
            latency: DEFAULT_LATENCY,
            queue_size: DEFAULT_QUEUE_SIZE,
            file_level_events: false,
            hasher: Some(default_hasher()),
            visitor: Arc::new(DefaultFileTreeVisitor),
        }
    }
}

/// FSEvents-backed watch service. Registrations are natively recursive:
/// one key covers the whole subtree of its root.
pub struct FsEventsWatchService {
    inner: Arc<FsInner>,
}

struct FsInner {
    latency: f64,
    queue_size: usize,
    file_level_events: bool,
    hasher: Option<Arc<dyn FileHasher>>,
    visitor: Arc<dyn FileTreeVisitor>,
    ready: ReadyQueue,
    streams: Mutex<Vec<Arc<StreamHandle>>>,
}

pub(crate) struct StreamHandle {
    key: Arc<WatchKey>,
    watched: PathBuf,
    runloop: Mutex<Option<RunLoop>>,
}

/// Per-stream state handed to the FSEvents callback. Owned by the stream;
/// freed by its release callback when the stream is released.
pub(crate) struct CallbackState {
    key: Arc<WatchKey>,
    differ: Mutex<HashDiffer>,
    /// Root in the user-supplied form.
    abs: String,
    /// Root in the kernel's resolved (real-path) form; callback paths are
    /// translated back by swapping this prefix for `abs`.
    real: String,
    service: Weak<FsInner>,
    handle: Weak<StreamHandle>,
}

impl FsEventsWatchService {
    /// Create a service with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(FsEventsConfig::default())
    }

    /// Create a service with custom configuration.
    #[must_use]
    pub fn with_config(config: FsEventsConfig) -> Self {
        Self {
            inner: Arc::new(FsInner {
                latency: config.latency,
                queue_size: config.queue_size,
                file_level_events: config.file_level_events,
                hasher: config.hasher,
                visitor: config.visitor,
                ready: ReadyQueue::new(),
                streams: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl Default for FsEventsWatchService {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchService for FsEventsWatchService {
    fn register(&self, directory: &Path, _mode: RegistrationMode) -> Result<Arc<WatchKey>> {
        let inner = &self.inner;
        if inner.ready.is_closed() {
            return Err(Error::state("watch service closed"));
        }
        if !directory.is_dir() {
            return Err(RegistrationError::NotADirectory(directory.to_path_buf()).into());
        }

        let abs = if directory.is_absolute() {
            directory.to_path_buf()
        } else {
            std::env::current_dir()?.join(directory)
        };

        {
            // A stream on an ancestor already covers this subtree; hand
            // back an inert key rather than a second stream.
            let streams = inner.streams.lock();
            if let Some(covering) = streams.iter().find(|s| abs.starts_with(&s.watched)) {
                tracing::debug!(
                    path = %abs.display(),
                    covered_by = %covering.watched.display(),
                    "Already covered by an existing stream"
                );
                return Ok(WatchKey::new(abs, inner.queue_size, inner.ready.sender()));
            }
        }

        let real = abs
            .canonicalize()
            .map_err(|e| RegistrationError::watch_failed(&abs, e))?;

        let hasher = inner
            .hasher
            .clone()
            .unwrap_or_else(|| Arc::new(CountingHasher::new()) as Arc<dyn FileHasher>);
        let file_level_events = inner.file_level_events || inner.hasher.is_none();

        let mut differ = HashDiffer::new(hasher, Arc::clone(&inner.visitor));
        differ.seed(&abs)?;

        let key = WatchKey::new(abs.clone(), inner.queue_size, inner.ready.sender());
        let handle = Arc::new(StreamHandle {
            key: Arc::clone(&key),
            watched: abs.clone(),
            runloop: Mutex::new(None),
        });

        let state = Box::new(CallbackState {
            key: Arc::clone(&key),
            differ: Mutex::new(differ),
            abs: abs.to_string_lossy().into_owned(),
            real: real.to_string_lossy().into_owned(),
            service: Arc::downgrade(inner),
            handle: Arc::downgrade(&handle),
        });

        let runloop = RunLoop::spawn(&abs, inner.latency, file_level_events, state)?;
        *handle.runloop.lock() = Some(runloop);
        inner.streams.lock().push(handle);

        tracing::debug!(path = %abs.display(), "Registered FSEvents stream");
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
        let handles: Vec<Arc<StreamHandle>> = self.inner.streams.lock().drain(..).collect();
        for handle in handles {
            handle.key.cancel();
            // Release the lock before joining: the run-loop thread may be
            // inside a callback that is tearing this stream down itself.
            let runloop = handle.runloop.lock().take();
            if let Some(runloop) = runloop {
                runloop.close();
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.inner.ready.is_closed()
    }

    fn delivers_recursive_creates(&self) -> bool {
        true
    }
}

impl Drop for FsEventsWatchService {
    fn drop(&mut self) {
        self.close();
    }
}

impl FsInner {
    /// Tear down one stream from inside its own callback. The run loop
    /// cannot be stopped and joined from its own thread, so the close runs
    /// on a disposable thread.
    fn close_stream(&self, handle: &Arc<StreamHandle>) {
        let mut streams = self.streams.lock();
        if let Some(pos) = streams.iter().position(|s| Arc::ptr_eq(s, handle)) {
            streams.remove(pos);
        }
        drop(streams);

        if let Some(runloop) = handle.runloop.lock().take() {
            std::thread::spawn(move || runloop.close());
        }
    }
}

impl CallbackState {
    /// Handle one batch of FSEvents paths.
    pub(crate) fn on_paths(&self, paths: &[String]) {
        for raw_path in paths {
            let suffix = raw_path.get(self.real.len()..).unwrap_or("");
            let translated = format!("{}{}", self.abs, suffix);
            let path = PathBuf::from(translated.trim_end_matches('/'));

            let outcome = self.differ.lock().rescan(&path);

            for (p, hash) in outcome.created {
                self.key.signal(RawEventKind::Create, p, Some(hash));
            }
            for (p, hash) in outcome.modified {
                self.key.signal(RawEventKind::Modify, p, Some(hash));
            }
            if outcome.drained {
                // Everything under the root is gone: tear the stream down
                // first so the key invalidation is observed after the
                // deletions drained below.
                if let (Some(service), Some(handle)) =
                    (self.service.upgrade(), self.handle.upgrade())
                {
                    service.close_stream(&handle);
                }
                self.key.cancel();
            }
            for p in outcome.deleted {
                self.key.signal(RawEventKind::Delete, p, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn wait_for_key(
        service: &FsEventsWatchService,
        timeout: Duration,
    ) -> Option<Arc<WatchKey>> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Some(key) = service.poll() {
                return Some(key);
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        None
    }

    #[test]
    fn test_create_modify_delete_cycle() {
        let tmp = TempDir::new().unwrap();
        let service = FsEventsWatchService::with_config(FsEventsConfig {
            latency: 0.1,
            ..FsEventsConfig::default()
        });
        let registered = service
            .register(tmp.path(), RegistrationMode::Recursive)
            .unwrap();

        fs::write(tmp.path().join("f.txt"), "one").unwrap();

        let key = wait_for_key(&service, Duration::from_secs(10)).expect("no events");
        assert_eq!(key.id(), registered.id());
        let events = key.drain();
        assert!(events.iter().any(|e| e.kind == RawEventKind::Create));
        service.close();
    }

    #[test]
    fn test_nested_registration_is_inert() {
        let tmp = TempDir::new().unwrap();
        let sub = tmp.path().join("sub");
        fs::create_dir(&sub).unwrap();

        let service = FsEventsWatchService::new();
        let root_key = service
            .register(tmp.path(), RegistrationMode::Recursive)
            .unwrap();
        let sub_key = service.register(&sub, RegistrationMode::Recursive).unwrap();

        assert_ne!(root_key.id(), sub_key.id());
        assert_eq!(service.inner.streams.lock().len(), 1);
        service.close();
    }
}
