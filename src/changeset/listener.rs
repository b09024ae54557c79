//! A listener that folds the event stream into per-root change sets.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::builder::{ChangeSet, ChangeSetBuilder};
use super::entry::ChangeSetEntry;
use super::timer::IdleTimer;
use crate::watcher::{DirectoryChangeEvent, DirectoryChangeListener, EventKind};
use crate::{Error, Result};

/// Accumulates events into one normalized [`ChangeSet`] per root, for
/// batch consumption with [`take`](ChangeSetListener::take).
///
/// The listener is a cheap clonable handle: pass one clone to the watcher
/// builder and keep another to consume from.
///
/// Overflow events are refused with an error, since lost events cannot be
/// normalized; the watcher reports the refusal through `on_exception`.
#[derive(Debug, Clone, Default)]
pub struct ChangeSetListener {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    builders: Mutex<HashMap<PathBuf, ChangeSetBuilder>>,
    timer: Option<IdleTimer>,
}

impl ChangeSetListener {
    /// A listener without idle flushing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A listener that also invokes `callback` with the watcher's event
    /// count once the watcher has been idle for `timeout` after a burst of
    /// events. A new event cancels and a new idle period reschedules the
    /// pending flush; only the last one fires.
    #[must_use]
    pub fn with_idle_timeout(
        timeout: Duration,
        callback: impl FnMut(usize) + Send + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                builders: Mutex::new(HashMap::new()),
                timer: Some(IdleTimer::new(timeout, Box::new(callback))),
            }),
        }
    }

    /// Consume the accumulated change sets, atomically resetting the
    /// accumulator. Roots without any observed change are absent.
    #[must_use]
    pub fn take(&self) -> HashMap<PathBuf, ChangeSet> {
        let drained = std::mem::take(&mut *self.inner.builders.lock());
        drained
            .into_iter()
            .map(|(root, builder)| (root, builder.to_change_set()))
            .collect()
    }
}

impl DirectoryChangeListener for ChangeSetListener {
    fn on_event(&mut self, event: &DirectoryChangeEvent) -> Result<()> {
        if event.kind() == EventKind::Overflow {
            return Err(Error::Overflow {
                count: event.count(),
            });
        }
        let path = event
            .path()
            .ok_or_else(|| Error::state("event without a path cannot be aggregated"))?;

        let entry = ChangeSetEntry::new(
            path.to_path_buf(),
            event.is_directory(),
            event.hash().cloned(),
            event.root().to_path_buf(),
        );

        let mut builders = self.inner.builders.lock();
        let builder = builders
            .entry(event.root().to_path_buf())
            .or_insert_with(ChangeSetBuilder::new);
        match event.kind() {
            EventKind::Create => builder.add_created(entry),
            EventKind::Modify => builder.add_modified(entry),
            EventKind::Delete => builder.add_deleted(entry),
            EventKind::Overflow => unreachable!(),
        }
        drop(builders);

        if let Some(timer) = &self.inner.timer {
            timer.cancel();
        }
        Ok(())
    }

    fn on_idle(&mut self, count: usize) {
        if let Some(timer) = &self.inner.timer {
            timer.schedule(count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::FileHash;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(kind: EventKind, path: &str, root: &str) -> DirectoryChangeEvent {
        DirectoryChangeEvent::new(
            kind,
            false,
            Some(PathBuf::from(path)),
            Some(FileHash::from_u64(1)),
            1,
            PathBuf::from(root),
        )
    }

    #[test]
    fn test_events_accumulate_per_root() {
        let mut listener = ChangeSetListener::new();
        listener
            .on_event(&event(EventKind::Create, "/r1/a", "/r1"))
            .unwrap();
        listener
            .on_event(&event(EventKind::Delete, "/r2/b", "/r2"))
            .unwrap();

        let sets = listener.take();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[&PathBuf::from("/r1")].created().len(), 1);
        assert_eq!(sets[&PathBuf::from("/r2")].deleted().len(), 1);
    }

    #[test]
    fn test_take_resets_the_accumulator() {
        let mut listener = ChangeSetListener::new();
        listener
            .on_event(&event(EventKind::Create, "/r/a", "/r"))
            .unwrap();

        assert_eq!(listener.take().len(), 1);
        assert!(listener.take().is_empty());
    }

    #[test]
    fn test_clones_share_state() {
        let mut listener = ChangeSetListener::new();
        let handle = listener.clone();
        listener
            .on_event(&event(EventKind::Create, "/r/a", "/r"))
            .unwrap();

        let sets = handle.take();
        assert_eq!(sets.len(), 1);
    }

    #[test]
    fn test_overflow_is_refused() {
        let mut listener = ChangeSetListener::new();
        let overflow = DirectoryChangeEvent::new(
            EventKind::Overflow,
            false,
            None,
            None,
            9,
            PathBuf::from("/r"),
        );
        let err = listener.on_event(&overflow).unwrap_err();
        assert!(matches!(err, Error::Overflow { count: 9 }));
    }

    #[test]
    fn test_idle_flush_fires_after_quiet_period() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        let mut listener =
            ChangeSetListener::with_idle_timeout(Duration::from_millis(50), move |_count| {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            });

        listener
            .on_event(&event(EventKind::Create, "/r/a", "/r"))
            .unwrap();
        listener.on_idle(1);

        std::thread::sleep(Duration::from_millis(250));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_event_cancels_pending_flush() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        let mut listener =
            ChangeSetListener::with_idle_timeout(Duration::from_millis(80), move |_count| {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            });

        listener.on_idle(0);
        std::thread::sleep(Duration::from_millis(30));
        // A fresh event before the deadline disarms the flush.
        listener
            .on_event(&event(EventKind::Create, "/r/a", "/r"))
            .unwrap();

        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        // The following idle period re-arms it.
        listener.on_idle(1);
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
