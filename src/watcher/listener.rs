//! The listener contract.

use crate::watcher::DirectoryChangeEvent;
use crate::{Error, Result};

/// Receives directory change events from a watcher.
///
/// Every callback runs on the watcher's event-loop thread. A failure
/// returned from [`on_event`] is caught by the loop and reported through
/// [`on_exception`]; it never terminates the watcher.
///
/// Plain closures taking `&DirectoryChangeEvent` implement this trait.
///
/// [`on_event`]: DirectoryChangeListener::on_event
/// [`on_exception`]: DirectoryChangeListener::on_exception
pub trait DirectoryChangeListener: Send {
    /// Called for every observed change.
    ///
    /// # Errors
    ///
    /// Any error is routed to [`on_exception`](DirectoryChangeListener::on_exception).
    fn on_event(&mut self, event: &DirectoryChangeEvent) -> Result<()>;

    /// Called when event handling failed. The default logs and continues.
    fn on_exception(&mut self, error: &Error) {
        tracing::debug!(error = %error, "Listener error while watching");
    }

    /// Called at most once per idle period, just before the loop blocks,
    /// with the number of events delivered so far.
    fn on_idle(&mut self, count: usize) {
        let _ = count;
    }

    /// Polled before each blocking wait; returning `false` makes the loop
    /// exit cleanly.
    fn is_watching(&self) -> bool {
        true
    }
}

impl<F> DirectoryChangeListener for F
where
    F: FnMut(&DirectoryChangeEvent) + Send,
{
    fn on_event(&mut self, event: &DirectoryChangeEvent) -> Result<()> {
        self(event);
        Ok(())
    }
}

/// Listener that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpListener;

impl DirectoryChangeListener for NoOpListener {
    fn on_event(&mut self, _event: &DirectoryChangeEvent) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::EventKind;
    use std::path::PathBuf;

    fn sample_event() -> DirectoryChangeEvent {
        DirectoryChangeEvent::new(
            EventKind::Create,
            false,
            Some(PathBuf::from("/r/f")),
            None,
            1,
            PathBuf::from("/r"),
        )
    }

    #[test]
    fn test_closure_is_a_listener() {
        let mut seen = 0;
        {
            let mut listener = |_event: &DirectoryChangeEvent| {
                seen += 1;
            };
            listener.on_event(&sample_event()).unwrap();
            assert!(listener.is_watching());
        }
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_noop_listener_accepts_events() {
        let mut listener = NoOpListener;
        assert!(listener.on_event(&sample_event()).is_ok());
        assert!(listener.is_watching());
        listener.on_idle(3);
        listener.on_exception(&Error::state("x"));
    }
}
