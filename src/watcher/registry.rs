//! Keeps subtree registrations in sync with the tree.
//!
//! The first registration probes whether the backend supports native
//! recursion. If it does, one registration per root is enough; if not,
//! every directory is registered individually, and directories created
//! later are registered as they are observed.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::platform::{RegistrationMode, WatchKey, WatchService};
use crate::visitor::FileTreeVisitor;
use crate::Result;

/// Registration bookkeeping: which key belongs to which directory, and
/// which user root each registered directory reports under.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    key_roots: HashMap<u64, PathBuf>,
    registered_to_root: HashMap<PathBuf, PathBuf>,
    native_recursive: Option<bool>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Result of the native-recursion probe, once it has run.
    pub(crate) fn native_recursive(&self) -> Option<bool> {
        self.native_recursive
    }

    /// Register `start` (and, without native recursion, every directory
    /// below it) so that all events inside the subtree are delivered and
    /// attributed to `root`.
    pub(crate) fn register_all(
        &mut self,
        service: &dyn WatchService,
        start: &Path,
        root: &Path,
        visitor: &dyn FileTreeVisitor,
    ) -> Result<()> {
        if self.native_recursive != Some(false) {
            match service.register(start, RegistrationMode::Recursive) {
                Ok(key) => {
                    self.native_recursive = Some(true);
                    self.record(&key, root);
                    return Ok(());
                }
                Err(e) if e.is_unsupported() => {
                    tracing::debug!(
                        "Native recursive registration unsupported; registering directories individually"
                    );
                    self.native_recursive = Some(false);
                }
                Err(e) => return Err(e),
            }
        }

        let registry = RefCell::new(self);
        visitor.visit(
            start,
            &mut |dir| {
                let key = service.register(dir, RegistrationMode::NonRecursive)?;
                registry.borrow_mut().record(&key, root);
                Ok(())
            },
            &mut |_| Ok(()),
        )
    }

    /// Record a key's mappings.
    pub(crate) fn record(&mut self, key: &Arc<WatchKey>, root: &Path) {
        self.key_roots.insert(key.id(), key.directory().to_path_buf());
        self.registered_to_root
            .insert(key.directory().to_path_buf(), root.to_path_buf());
    }

    /// True when the key id belongs to a live registration.
    pub(crate) fn contains(&self, key_id: u64) -> bool {
        self.key_roots.contains_key(&key_id)
    }

    /// The user root a registered directory reports under.
    pub(crate) fn root_of(&self, registered: &Path) -> Option<&PathBuf> {
        self.registered_to_root.get(registered)
    }

    /// Drop both mappings for an invalidated key.
    pub(crate) fn forget(&mut self, key: &Arc<WatchKey>) {
        self.key_roots.remove(&key.id());
        self.registered_to_root.remove(key.directory());
    }

    /// True when no registrations remain.
    pub(crate) fn is_empty(&self) -> bool {
        self.key_roots.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.key_roots.len()
    }
}
