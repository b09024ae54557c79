//! Error types and Result aliases for treewatch.
//!
//! This module defines the error hierarchy used throughout the crate.
//! All public functions return `Result<T, Error>` or `Result<T>`.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using treewatch's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for treewatch operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The watcher or watch service is in the wrong state for the call.
    #[error("illegal state: {0}")]
    State(String),

    /// Directory registration error.
    #[error("registration error: {0}")]
    Registration(#[from] RegistrationError),

    /// The event queue overflowed and events were lost.
    #[error("event overflow: {count} events lost")]
    Overflow {
        /// Number of raw events discarded.
        count: usize,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Registration-specific errors.
#[derive(Error, Debug)]
pub enum RegistrationError {
    /// The backend does not support the requested registration mode.
    #[error("unsupported registration mode: {0}")]
    Unsupported(String),

    /// The backend refused to watch the directory.
    #[error("failed to watch path {path:?}: {reason}")]
    WatchFailed { path: PathBuf, reason: String },

    /// The path handed to `register` is not a directory.
    #[error("not a directory: {0:?}")]
    NotADirectory(PathBuf),
}

impl Error {
    /// Create an illegal-state error.
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// True when this error was caused by an unsupported registration mode.
    ///
    /// Used by the registration manager to decide whether to fall back to
    /// per-directory registration.
    #[must_use]
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Registration(RegistrationError::Unsupported(_)))
    }
}

impl RegistrationError {
    /// Create a watch-failed error from a path and a backend reason.
    pub fn watch_failed(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::WatchFailed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
