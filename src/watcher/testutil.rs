//! Scriptable watch service for unit tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::platform::{
    RawEventKind, ReadyQueue, RegistrationMode, WatchKey, WatchService, DEFAULT_QUEUE_SIZE,
};
use crate::error::RegistrationError;
use crate::hashing::FileHash;
use crate::{Error, Result};

/// In-memory watch service. Events are injected with [`signal`]; recursive
/// registration support is configurable so both probe outcomes can be
/// exercised.
///
/// [`signal`]: MockWatchService::signal
pub(crate) struct MockWatchService {
    recursive_supported: bool,
    ready: ReadyQueue,
    keys: Mutex<HashMap<PathBuf, Arc<WatchKey>>>,
    registrations: Mutex<Vec<(PathBuf, RegistrationMode)>>,
}

impl MockWatchService {
    pub(crate) fn recursive() -> Self {
        Self::new(true)
    }

    pub(crate) fn non_recursive() -> Self {
        Self::new(false)
    }

    fn new(recursive_supported: bool) -> Self {
        Self {
            recursive_supported,
            ready: ReadyQueue::new(),
            keys: Mutex::new(HashMap::new()),
            registrations: Mutex::new(Vec::new()),
        }
    }

    /// Every successful registration, in order.
    pub(crate) fn registrations(&self) -> Vec<(PathBuf, RegistrationMode)> {
        self.registrations.lock().clone()
    }

    /// The key registered for a directory.
    pub(crate) fn key_for(&self, directory: &Path) -> Option<Arc<WatchKey>> {
        self.keys.lock().get(directory).cloned()
    }

    /// Inject a raw event for the key registered at `registered`.
    pub(crate) fn signal(
        &self,
        registered: &Path,
        kind: RawEventKind,
        path: PathBuf,
        hash: Option<FileHash>,
    ) {
        let key = self
            .key_for(registered)
            .expect("signal on unregistered directory");
        key.signal(kind, path, hash);
    }
}

impl WatchService for MockWatchService {
    fn register(&self, directory: &Path, mode: RegistrationMode) -> Result<Arc<WatchKey>> {
        if self.ready.is_closed() {
            return Err(Error::state("watch service closed"));
        }
        if mode == RegistrationMode::Recursive && !self.recursive_supported {
            return Err(
                RegistrationError::Unsupported("recursive mode disabled in mock".into()).into(),
            );
        }
        let mut keys = self.keys.lock();
        if let Some(existing) = keys.get(directory) {
            return Ok(Arc::clone(existing));
        }
        let key = WatchKey::new(
            directory.to_path_buf(),
            DEFAULT_QUEUE_SIZE,
            self.ready.sender(),
        );
        keys.insert(directory.to_path_buf(), Arc::clone(&key));
        self.registrations
            .lock()
            .push((directory.to_path_buf(), mode));
        Ok(key)
    }

    fn poll(&self) -> Option<Arc<WatchKey>> {
        self.ready.poll()
    }

    fn take(&self) -> Result<Arc<WatchKey>> {
        self.ready.take()
    }

    fn close(&self) {
        self.ready.close();
        for key in self.keys.lock().values() {
            key.cancel();
        }
    }

    fn is_closed(&self) -> bool {
        self.ready.is_closed()
    }
}
