//! Single-shot idle timer with cancel-and-reschedule semantics.

use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};

enum Msg {
    Schedule(usize),
    Cancel,
}

/// Fires a callback once, a fixed delay after the most recent
/// [`schedule`](IdleTimer::schedule). Scheduling again before the delay
/// elapses restarts it; the last schedule is the only one that fires.
/// The timer thread exits when the timer is dropped.
pub(crate) struct IdleTimer {
    tx: Sender<Msg>,
}

impl IdleTimer {
    pub(crate) fn new(timeout: Duration, callback: Box<dyn FnMut(usize) + Send>) -> Self {
        let (tx, rx) = unbounded();
        thread::spawn(move || {
            let mut callback = callback;
            let mut pending: Option<usize> = None;
            loop {
                let msg = match pending {
                    Some(count) => match rx.recv_timeout(timeout) {
                        Ok(msg) => msg,
                        Err(RecvTimeoutError::Timeout) => {
                            pending = None;
                            callback(count);
                            continue;
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    },
                    None => match rx.recv() {
                        Ok(msg) => msg,
                        Err(_) => break,
                    },
                };
                match msg {
                    Msg::Schedule(count) => pending = Some(count),
                    Msg::Cancel => pending = None,
                }
            }
        });
        Self { tx }
    }

    /// Arm (or re-arm) the timer to fire with `count`.
    pub(crate) fn schedule(&self, count: usize) {
        let _ = self.tx.send(Msg::Schedule(count));
    }

    /// Disarm a pending timer, if any.
    pub(crate) fn cancel(&self) {
        let _ = self.tx.send(Msg::Cancel);
    }
}

impl std::fmt::Debug for IdleTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdleTimer").finish_non_exhaustive()
    }
}
