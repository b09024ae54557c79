//! Configuration management for treewatch.
//!
//! Supports process-wide overrides from environment variables. Everything
//! else is configured per watcher through [`crate::DirectoryWatcherBuilder`].

mod settings;

pub use settings::Settings;
