//! Per-key event queues and the shared ready queue.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_channel::{select, unbounded, Receiver, Sender};
use parking_lot::Mutex;

use super::{RawEvent, RawEventKind};
use crate::hashing::FileHash;
use crate::{Error, Result};

/// Default capacity of a per-key event queue.
pub const DEFAULT_QUEUE_SIZE: usize = 1024;

static NEXT_KEY_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Default)]
struct KeyQueue {
    events: VecDeque<RawEvent>,
    discarded: usize,
    signalled: bool,
}

/// Handle correlating raw events to a registered directory.
///
/// A key starts valid, accumulates events in a bounded queue, and is
/// cancelled either explicitly or when its directory disappears.
/// Cancellation is idempotent and does not drop already-queued events.
#[derive(Debug)]
pub struct WatchKey {
    id: u64,
    directory: PathBuf,
    capacity: usize,
    valid: AtomicBool,
    queue: Mutex<KeyQueue>,
    ready: Sender<Arc<WatchKey>>,
    me: Weak<WatchKey>,
}

impl WatchKey {
    /// Create a key for `directory`. Backends obtain `ready` from their
    /// [`ReadyQueue::sender`].
    #[must_use]
    pub fn new(directory: PathBuf, capacity: usize, ready: Sender<Arc<WatchKey>>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id: NEXT_KEY_ID.fetch_add(1, Ordering::Relaxed),
            directory,
            capacity,
            valid: AtomicBool::new(true),
            queue: Mutex::new(KeyQueue::default()),
            ready,
            me: me.clone(),
        })
    }

    /// Unique id of this registration.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The registered directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// True until the key is cancelled.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Cancel the key. Idempotent. Queued events stay drainable so
    /// consumers can observe deletions that preceded the cancellation.
    pub fn cancel(&self) {
        self.valid.store(false, Ordering::Release);
    }

    /// Enqueue a raw event, signalling the ready queue on the transition
    /// from empty. Past capacity the event is discarded and folded into a
    /// single synthetic overflow.
    pub fn signal(&self, kind: RawEventKind, path: PathBuf, hash: Option<FileHash>) {
        self.signal_event(RawEvent::new(kind, path, hash));
    }

    /// Enqueue an already-built raw event. See [`signal`](WatchKey::signal).
    pub fn signal_event(&self, event: RawEvent) {
        let wake = {
            let mut queue = self.queue.lock();
            if queue.events.len() < self.capacity {
                queue.events.push_back(event);
            } else {
                queue.discarded += 1;
            }
            if queue.signalled {
                false
            } else {
                queue.signalled = true;
                true
            }
        };
        if wake {
            self.announce();
        }
    }

    /// Drain all pending events. If any were discarded since the last
    /// drain, a synthetic overflow event carrying the discard count is
    /// appended.
    #[must_use]
    pub fn drain(&self) -> Vec<RawEvent> {
        let mut queue = self.queue.lock();
        let mut events: Vec<RawEvent> = queue.events.drain(..).collect();
        if queue.discarded > 0 {
            events.push(RawEvent::overflow(queue.discarded));
            queue.discarded = 0;
        }
        events
    }

    /// Re-arm the key after processing. Returns `false` when the key has
    /// been cancelled; a still-valid key with events queued in the meantime
    /// is re-signalled.
    #[must_use]
    pub fn reset(&self) -> bool {
        if !self.is_valid() {
            return false;
        }
        let resignal = {
            let mut queue = self.queue.lock();
            if queue.events.is_empty() && queue.discarded == 0 {
                queue.signalled = false;
                false
            } else {
                true
            }
        };
        if resignal {
            self.announce();
        }
        true
    }

    fn announce(&self) {
        if let Some(me) = self.me.upgrade() {
            let _ = self.ready.send(me);
        }
    }
}

/// Shared ready-queue plumbing used by every backend: keys announce
/// themselves here when their queue transitions from empty, and the event
/// loop blocks on [`take`](ReadyQueue::take) until one arrives or the
/// service closes.
#[derive(Debug)]
pub struct ReadyQueue {
    ready_tx: Sender<Arc<WatchKey>>,
    ready_rx: Receiver<Arc<WatchKey>>,
    close_tx: Mutex<Option<Sender<()>>>,
    close_rx: Receiver<()>,
    closed: AtomicBool,
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadyQueue {
    /// Create an open ready queue.
    #[must_use]
    pub fn new() -> Self {
        let (ready_tx, ready_rx) = unbounded();
        let (close_tx, close_rx) = unbounded();
        Self {
            ready_tx,
            ready_rx,
            close_tx: Mutex::new(Some(close_tx)),
            close_rx,
            closed: AtomicBool::new(false),
        }
    }

    /// Sender handed to new keys.
    #[must_use]
    pub fn sender(&self) -> Sender<Arc<WatchKey>> {
        self.ready_tx.clone()
    }

    /// Next signalled key, if one is already waiting.
    #[must_use]
    pub fn poll(&self) -> Option<Arc<WatchKey>> {
        if self.is_closed() {
            return None;
        }
        self.ready_rx.try_recv().ok()
    }

    /// Block until a key is signalled.
    ///
    /// # Errors
    ///
    /// Fails with a state error once the queue is closed.
    pub fn take(&self) -> Result<Arc<WatchKey>> {
        if self.is_closed() {
            return Err(Error::state("watch service closed"));
        }
        select! {
            recv(self.ready_rx) -> key => {
                key.map_err(|_| Error::state("watch service closed"))
            }
            recv(self.close_rx) -> _ => Err(Error::state("watch service closed")),
        }
    }

    /// Close the queue, waking any blocked `take`. Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        // Dropping the sender disconnects close_rx, which wakes the select.
        self.close_tx.lock().take();
    }

    /// True once closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
