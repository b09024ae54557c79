//! The recursive directory watcher and its event pipeline.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::event::{DirectoryChangeEvent, EventKind};
use super::listener::{DirectoryChangeListener, NoOpListener};
use super::registry::Registry;
use crate::config::Settings;
use crate::hashing::{default_hasher, hash_path, FileHash, FileHasher};
use crate::platform::{RawEvent, RawEventKind, WatchKey, WatchService};
use crate::state::{seed_from_roots, PathTable};
use crate::visitor::{DefaultFileTreeVisitor, FileTreeVisitor};
use crate::{Error, Result};

/// Watches a set of root directories recursively and delivers
/// deduplicated CREATE / MODIFY / DELETE / OVERFLOW events to a listener.
///
/// Build one with [`DirectoryWatcher::builder`], then drive it with
/// [`watch`](DirectoryWatcher::watch) on a dedicated thread or
/// [`watch_async`](DirectoryWatcher::watch_async) on a tokio runtime.
pub struct DirectoryWatcher {
    service: Arc<dyn WatchService>,
    listener: Mutex<Box<dyn DirectoryChangeListener>>,
    state: Mutex<PathTable>,
    registry: Mutex<Registry>,
    hasher: Option<Arc<dyn FileHasher>>,
    visitor: Arc<dyn FileTreeVisitor>,
    event_count: AtomicUsize,
    closed: AtomicBool,
}

/// Configures and creates a [`DirectoryWatcher`].
pub struct DirectoryWatcherBuilder {
    paths: Vec<PathBuf>,
    listener: Box<dyn DirectoryChangeListener>,
    hasher: Option<Arc<dyn FileHasher>>,
    service: Option<Arc<dyn WatchService>>,
    visitor: Arc<dyn FileTreeVisitor>,
}

impl DirectoryWatcherBuilder {
    fn new() -> Self {
        Self {
            paths: Vec::new(),
            listener: Box::new(NoOpListener),
            hasher: Some(default_hasher()),
            service: None,
            visitor: Arc::new(DefaultFileTreeVisitor),
        }
    }

    /// Add a root directory to watch.
    #[must_use]
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.push(path.into());
        self
    }

    /// Replace the set of root directories to watch.
    #[must_use]
    pub fn paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.paths = paths;
        self
    }

    /// Set the event listener. Defaults to a no-op.
    #[must_use]
    pub fn listener(mut self, listener: impl DirectoryChangeListener + 'static) -> Self {
        self.listener = Box::new(listener);
        self
    }

    /// Enable or disable content hashing. Enabled by default; disabling
    /// turns off duplicate-event suppression.
    #[must_use]
    pub fn file_hashing(mut self, enabled: bool) -> Self {
        self.hasher = if enabled { Some(default_hasher()) } else { None };
        self
    }

    /// Use a custom content hasher. Implies hashing is enabled.
    #[must_use]
    pub fn file_hasher(mut self, hasher: Arc<dyn FileHasher>) -> Self {
        self.hasher = Some(hasher);
        self
    }

    /// Use a custom watch service instead of the platform default.
    #[must_use]
    pub fn watch_service(mut self, service: Arc<dyn WatchService>) -> Self {
        self.service = Some(service);
        self
    }

    /// Use a custom file-tree visitor for seeding, registration walks, and
    /// post-create rescans.
    #[must_use]
    pub fn file_tree_visitor(mut self, visitor: Arc<dyn FileTreeVisitor>) -> Self {
        self.visitor = visitor;
        self
    }

    /// Seed the hash table from the roots and register them.
    ///
    /// # Errors
    ///
    /// Returns an error when a root cannot be walked or registered.
    pub fn build(self) -> Result<DirectoryWatcher> {
        let hasher = if Settings::get().prevent_file_hashing {
            None
        } else {
            self.hasher
        };
        let service = match self.service {
            Some(service) => service,
            None => default_watch_service()?,
        };

        let mut state = PathTable::new();
        seed_from_roots(
            &self.paths,
            hasher.as_ref(),
            self.visitor.as_ref(),
            &mut state,
        )?;

        let mut registry = Registry::new();
        for root in &self.paths {
            registry.register_all(service.as_ref(), root, root, self.visitor.as_ref())?;
        }

        Ok(DirectoryWatcher {
            service,
            listener: Mutex::new(self.listener),
            state: Mutex::new(state),
            registry: Mutex::new(registry),
            hasher,
            visitor: self.visitor,
            event_count: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }
}

#[cfg(target_os = "macos")]
fn default_watch_service() -> Result<Arc<dyn WatchService>> {
    use crate::platform::fsevents::{FsEventsConfig, FsEventsWatchService};
    // Hashing and deduplication happen in the pipeline; the backend runs
    // with hashing disabled so files are not hashed twice.
    Ok(Arc::new(FsEventsWatchService::with_config(FsEventsConfig {
        hasher: None,
        ..FsEventsConfig::default()
    })))
}

#[cfg(not(target_os = "macos"))]
fn default_watch_service() -> Result<Arc<dyn WatchService>> {
    use crate::platform::NativeWatchService;
    Ok(Arc::new(NativeWatchService::new()?))
}

impl DirectoryWatcher {
    /// Start configuring a watcher.
    #[must_use]
    pub fn builder() -> DirectoryWatcherBuilder {
        DirectoryWatcherBuilder::new()
    }

    /// Watch the registered roots, blocking the calling thread until the
    /// listener stops watching, every registration disappears, or the
    /// watcher is closed.
    ///
    /// # Errors
    ///
    /// Fails with a state error when called on a closed watcher.
    pub fn watch(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::state("watcher already closed"));
        }
        while self.listener.lock().is_watching() {
            let key = match self.service.poll() {
                Some(key) => key,
                None => {
                    let count = self.event_count.load(Ordering::Relaxed);
                    self.listener.lock().on_idle(count);
                    match self.service.take() {
                        Ok(key) => key,
                        Err(_) => break,
                    }
                }
            };

            for raw in key.drain() {
                if let Err(e) = self.dispatch(&key, raw) {
                    tracing::debug!(error = %e, "Error while processing an event");
                    self.listener.lock().on_exception(&e);
                }
            }

            if !key.reset() {
                tracing::debug!(
                    path = %key.directory().display(),
                    "Registration no longer valid; removing"
                );
                let mut registry = self.registry.lock();
                registry.forget(&key);
                if registry.is_empty() {
                    tracing::debug!("No more directories left to watch; terminating watcher");
                    break;
                }
            }
        }
        self.close();
        Ok(())
    }

    /// Run [`watch`](DirectoryWatcher::watch) on the current tokio
    /// runtime's blocking pool and return its completion handle.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn watch_async(self: Arc<Self>) -> tokio::task::JoinHandle<Result<()>> {
        tokio::task::spawn_blocking(move || self.watch())
    }

    /// Like [`watch_async`](DirectoryWatcher::watch_async), but on the
    /// supplied runtime instead of the ambient one.
    pub fn watch_async_on(
        self: Arc<Self>,
        runtime: &tokio::runtime::Handle,
    ) -> tokio::task::JoinHandle<Result<()>> {
        runtime.spawn_blocking(move || self.watch())
    }

    /// Close the watcher and its watch service. Safe from any thread and
    /// idempotent; a blocked event loop exits on its next iteration.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!("Closing watcher");
            self.service.close();
        }
    }

    /// True once the watcher has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// A read-only snapshot of the tracked path-to-hash mapping.
    #[must_use]
    pub fn path_hashes(&self) -> BTreeMap<PathBuf, FileHash> {
        self.state.lock().snapshot()
    }

    fn dispatch(&self, key: &Arc<WatchKey>, raw: RawEvent) -> Result<()> {
        let root = {
            let registry = self.registry.lock();
            if !registry.contains(key.id()) {
                return Err(Error::state(format!(
                    "backend returned key [{}] for '{}' but it is not registered",
                    key.id(),
                    key.directory().display()
                )));
            }
            registry.root_of(key.directory()).cloned().ok_or_else(|| {
                Error::state(format!(
                    "no root recorded for registered path '{}'",
                    key.directory().display()
                ))
            })?
        };

        tracing::debug!(kind = ?raw.kind, path = ?raw.path, "Raw event");
        match raw.kind {
            RawEventKind::Overflow => {
                self.emit(EventKind::Overflow, false, raw.path, None, raw.count, root)
            }
            kind => {
                let path = raw.path.ok_or_else(|| {
                    Error::state(format!("backend returned a null path for {kind:?}"))
                })?;
                match kind {
                    RawEventKind::Create => self.on_create(&path, raw.count, &root),
                    RawEventKind::Modify => self.on_modify(path, raw.count, &root),
                    RawEventKind::Delete => self.on_delete(path, raw.count, &root),
                    RawEventKind::Overflow => unreachable!(),
                }
            }
        }
    }

    fn on_create(&self, child: &Path, count: usize, root: &Path) -> Result<()> {
        let is_directory = child
            .symlink_metadata()
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if is_directory {
            {
                let mut registry = self.registry.lock();
                if registry.native_recursive() != Some(true) {
                    registry.register_all(
                        self.service.as_ref(),
                        child,
                        root,
                        self.visitor.as_ref(),
                    )?;
                }
            }
            if !self.service.delivers_recursive_creates() {
                // Files may land in the new directory before its
                // registration takes effect; walk it and synthesize their
                // creates. Duplicates are suppressed by the hash table.
                self.visitor.visit(
                    child,
                    &mut |dir| self.notify_create(dir, count, root, true),
                    &mut |file| self.notify_create(file, count, root, false),
                )?;
            }
        }
        self.notify_create(child, count, root, is_directory)
    }

    fn on_modify(&self, child: PathBuf, count: usize, root: &Path) -> Result<()> {
        let is_directory = self.state.lock().is_directory(&child);
        let Some(hasher) = &self.hasher else {
            return self.emit(
                EventKind::Modify,
                is_directory,
                Some(child),
                None,
                count,
                root.to_path_buf(),
            );
        };

        // The stored hash may be missing for files created before watching
        // began; such a modify must still be delivered.
        let existing = self.state.lock().get(&child).cloned();
        match hash_path(hasher.as_ref(), &child) {
            Some(fresh) if existing.as_ref() != Some(&fresh) => {
                self.state.lock().put(child.clone(), fresh.clone());
                self.emit(
                    EventKind::Modify,
                    is_directory,
                    Some(child),
                    Some(fresh),
                    count,
                    root.to_path_buf(),
                )
            }
            Some(_) => Ok(()),
            None => {
                tracing::debug!(
                    path = %child.display(),
                    "Could not hash modified path; it may have been deleted"
                );
                Ok(())
            }
        }
    }

    fn on_delete(&self, child: PathBuf, count: usize, root: &Path) -> Result<()> {
        if self.hasher.is_none() {
            let is_directory = self.state.lock().remove_directory(&child);
            return self.emit(
                EventKind::Delete,
                is_directory,
                Some(child),
                None,
                count,
                root.to_path_buf(),
            );
        }

        // Sweep the stored subtree deepest-first so descendants are
        // reported gone before the directory that contained them.
        let swept: Vec<(PathBuf, bool)> = {
            let mut state = self.state.lock();
            let subtree = state.subtree(&child);
            subtree
                .into_iter()
                .rev()
                .map(|(path, _)| {
                    state.remove(&path);
                    let is_directory = state.remove_directory(&path);
                    (path, is_directory)
                })
                .collect()
        };
        for (path, is_directory) in swept {
            self.emit(
                EventKind::Delete,
                is_directory,
                Some(path),
                None,
                count,
                root.to_path_buf(),
            )?;
        }
        Ok(())
    }

    /// The unified create-notification path: record the hash, suppress
    /// already-tracked paths, and keep creates for unreadable-but-present
    /// files.
    fn notify_create(
        &self,
        path: &Path,
        count: usize,
        root: &Path,
        is_directory: bool,
    ) -> Result<()> {
        let mut hash = None;
        if let Some(hasher) = &self.hasher {
            match hash_path(hasher.as_ref(), path) {
                None => {
                    if path.symlink_metadata().is_err() {
                        tracing::debug!(
                            path = %path.display(),
                            "Could not hash created path; it may have been deleted"
                        );
                        return Ok(());
                    }
                    // Locked or unreadable but present: the create must
                    // not be lost.
                    tracing::debug!(
                        path = %path.display(),
                        "Could not hash created path; it may be locked"
                    );
                }
                Some(fresh) => {
                    let previous = self.state.lock().put(path.to_path_buf(), fresh.clone());
                    if previous.is_some() {
                        tracing::debug!(
                            path = %path.display(),
                            "Skipping create for already-tracked path"
                        );
                        return Ok(());
                    }
                    hash = Some(fresh);
                }
            }
        }
        if is_directory {
            self.state.lock().add_directory(path.to_path_buf());
        }
        self.emit(
            EventKind::Create,
            is_directory,
            Some(path.to_path_buf()),
            hash,
            count,
            root.to_path_buf(),
        )
    }

    fn emit(
        &self,
        kind: EventKind,
        is_directory: bool,
        path: Option<PathBuf>,
        hash: Option<FileHash>,
        count: usize,
        root: PathBuf,
    ) -> Result<()> {
        tracing::debug!(?kind, path = ?path, is_directory, "Emitting event");
        let event = DirectoryChangeEvent::new(kind, is_directory, path, hash, count, root);
        self.event_count.fetch_add(1, Ordering::Relaxed);
        self.listener.lock().on_event(&event)
    }
}

impl std::fmt::Debug for DirectoryWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryWatcher")
            .field("closed", &self.is_closed())
            .field("tracked_paths", &self.state.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::testutil::MockWatchService;
    use std::fs;
    use std::thread::JoinHandle;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    type Events = Arc<Mutex<Vec<DirectoryChangeEvent>>>;

    struct Recording {
        events: Events,
        errors: Arc<Mutex<Vec<String>>>,
    }

    struct RecordingListener {
        events: Events,
        errors: Arc<Mutex<Vec<String>>>,
    }

    impl DirectoryChangeListener for RecordingListener {
        fn on_event(&mut self, event: &DirectoryChangeEvent) -> Result<()> {
            self.events.lock().push(event.clone());
            Ok(())
        }

        fn on_exception(&mut self, error: &Error) {
            self.errors.lock().push(error.to_string());
        }
    }

    fn recording() -> (Recording, RecordingListener) {
        let events: Events = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(Mutex::new(Vec::new()));
        (
            Recording {
                events: Arc::clone(&events),
                errors: Arc::clone(&errors),
            },
            RecordingListener { events, errors },
        )
    }

    fn start(watcher: &Arc<DirectoryWatcher>) -> JoinHandle<Result<()>> {
        let watcher = Arc::clone(watcher);
        std::thread::spawn(move || watcher.watch())
    }

    fn wait_until(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        condition()
    }

    fn build_with_mock(
        root: &Path,
        listener: RecordingListener,
    ) -> (Arc<DirectoryWatcher>, Arc<MockWatchService>) {
        let service = Arc::new(MockWatchService::non_recursive());
        let watcher = Arc::new(
            DirectoryWatcher::builder()
                .path(root)
                .listener(listener)
                .watch_service(Arc::clone(&service) as Arc<dyn WatchService>)
                .build()
                .unwrap(),
        );
        (watcher, service)
    }

    #[test]
    fn test_duplicate_create_is_suppressed() {
        let tmp = TempDir::new().unwrap();
        let (recording, listener) = recording();
        let (watcher, service) = build_with_mock(tmp.path(), listener);
        let handle = start(&watcher);

        let file = tmp.path().join("f.txt");
        fs::write(&file, "content").unwrap();
        service.signal(tmp.path(), RawEventKind::Create, file.clone(), None);
        service.signal(tmp.path(), RawEventKind::Create, file.clone(), None);

        assert!(wait_until(
            || !recording.events.lock().is_empty(),
            Duration::from_secs(5)
        ));
        std::thread::sleep(Duration::from_millis(100));

        {
            let events = recording.events.lock();
            let creates: Vec<_> = events
                .iter()
                .filter(|e| e.kind() == EventKind::Create)
                .collect();
            assert_eq!(creates.len(), 1);
            assert_eq!(creates[0].path(), Some(file.as_path()));
            assert!(creates[0].hash().is_some());
        }

        watcher.close();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_modify_without_content_change_is_suppressed() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("f.txt");
        fs::write(&file, "same").unwrap();

        let (recording, listener) = recording();
        let (watcher, service) = build_with_mock(tmp.path(), listener);
        let handle = start(&watcher);

        // Kernel noise: a modify without any content change.
        service.signal(tmp.path(), RawEventKind::Modify, file.clone(), None);
        std::thread::sleep(Duration::from_millis(150));
        assert!(recording.events.lock().is_empty());

        fs::write(&file, "different").unwrap();
        service.signal(tmp.path(), RawEventKind::Modify, file.clone(), None);

        assert!(wait_until(
            || !recording.events.lock().is_empty(),
            Duration::from_secs(5)
        ));
        {
            let events = recording.events.lock();
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].kind(), EventKind::Modify);
            assert!(!events[0].is_directory());
        }

        watcher.close();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_delete_sweeps_subtree_deepest_first() {
        let tmp = TempDir::new().unwrap();
        let tree = tmp.path().join("tree");
        fs::create_dir(&tree).unwrap();
        fs::write(tree.join("t1"), "1").unwrap();
        fs::write(tree.join("t2"), "2").unwrap();

        let (recording, listener) = recording();
        let (watcher, service) = build_with_mock(tmp.path(), listener);
        let handle = start(&watcher);

        fs::remove_dir_all(&tree).unwrap();
        service.signal(tmp.path(), RawEventKind::Delete, tree.clone(), None);

        assert!(wait_until(
            || recording.events.lock().len() >= 3,
            Duration::from_secs(5)
        ));
        {
            let events = recording.events.lock();
            assert_eq!(events.len(), 3);
            assert!(events.iter().all(|e| e.kind() == EventKind::Delete));
            // Directory last, flagged as a directory.
            assert_eq!(events[2].path(), Some(tree.as_path()));
            assert!(events[2].is_directory());
            assert!(!events[0].is_directory());
        }

        watcher.close();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_overflow_is_forwarded_verbatim() {
        let tmp = TempDir::new().unwrap();
        let (recording, listener) = recording();
        let (watcher, service) = build_with_mock(tmp.path(), listener);
        let handle = start(&watcher);

        let key = service.key_for(tmp.path()).unwrap();
        key.signal_event(RawEvent::overflow(42));

        assert!(wait_until(
            || !recording.events.lock().is_empty(),
            Duration::from_secs(5)
        ));
        {
            let events = recording.events.lock();
            assert_eq!(events[0].kind(), EventKind::Overflow);
            assert_eq!(events[0].count(), 42);
            assert!(events[0].path().is_none());
        }

        watcher.close();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_unknown_key_is_reported_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let stray = tmp.path().join("stray");
        fs::create_dir(&stray).unwrap();

        let (recording, listener) = recording();
        let (watcher, service) = build_with_mock(tmp.path(), listener);
        let handle = start(&watcher);

        // Registered with the service but never recorded by the watcher.
        let key = service
            .register(&stray, crate::platform::RegistrationMode::NonRecursive)
            .unwrap();
        key.signal(RawEventKind::Create, stray.join("x"), None);

        assert!(wait_until(
            || !recording.errors.lock().is_empty(),
            Duration::from_secs(5)
        ));
        assert!(recording.errors.lock()[0].contains("not registered"));
        assert!(recording.events.lock().is_empty());

        watcher.close();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_listener_can_stop_the_loop() {
        struct StopImmediately;
        impl DirectoryChangeListener for StopImmediately {
            fn on_event(&mut self, _event: &DirectoryChangeEvent) -> Result<()> {
                Ok(())
            }
            fn is_watching(&self) -> bool {
                false
            }
        }

        let tmp = TempDir::new().unwrap();
        let service = Arc::new(MockWatchService::non_recursive());
        let watcher = DirectoryWatcher::builder()
            .path(tmp.path())
            .listener(StopImmediately)
            .watch_service(service as Arc<dyn WatchService>)
            .build()
            .unwrap();

        watcher.watch().unwrap();
        assert!(watcher.is_closed());
    }

    #[test]
    fn test_watch_on_closed_watcher_fails() {
        let tmp = TempDir::new().unwrap();
        let service = Arc::new(MockWatchService::non_recursive());
        let watcher = DirectoryWatcher::builder()
            .path(tmp.path())
            .watch_service(service as Arc<dyn WatchService>)
            .build()
            .unwrap();

        watcher.close();
        watcher.close();
        let err = watcher.watch().unwrap_err();
        assert!(matches!(err, Error::State(_)));
    }

    #[test]
    fn test_path_hashes_snapshot_contains_seeded_entries() {
        let tmp = TempDir::new().unwrap();
        let sub = tmp.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("f.txt"), "seeded").unwrap();

        let service = Arc::new(MockWatchService::non_recursive());
        let watcher = DirectoryWatcher::builder()
            .path(tmp.path())
            .watch_service(service as Arc<dyn WatchService>)
            .build()
            .unwrap();

        let hashes = watcher.path_hashes();
        assert_eq!(hashes.get(&sub), Some(&FileHash::DIRECTORY));
        assert!(!hashes.get(&sub.join("f.txt")).unwrap().is_directory());
    }
}
