//! Treewatch
//!
//! Recursive directory-change notification over a set of root paths, with
//! content-hash deduplication of the raw kernel event stream.
//!
//! # Architecture
//!
//! Treewatch is organized into the following modules:
//!
//! - [`config`]: Process-wide settings read from the environment
//! - [`error`]: Error types and Result aliases
//! - [`hashing`]: Content fingerprints and pluggable file hashers
//! - [`visitor`]: Recursive file-tree walking with pluggable visitors
//! - [`state`]: The ordered path-to-hash table and known-directory set
//! - [`platform`]: Kernel watch backends behind the [`WatchService`] trait
//! - [`watcher`]: The recursive [`DirectoryWatcher`] and its event pipeline
//! - [`changeset`]: Normalized per-root change sets with idle-timer flush
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use treewatch::DirectoryWatcher;
//!
//! fn main() -> treewatch::Result<()> {
//!     let watcher = Arc::new(
//!         DirectoryWatcher::builder()
//!             .path("/some/directory")
//!             .listener(|event: &treewatch::DirectoryChangeEvent| {
//!                 println!("{event:?}");
//!             })
//!             .build()?,
//!     );
//!     watcher.watch()
//! }
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod changeset;
pub mod config;
pub mod error;
pub mod hashing;
pub mod platform;
pub mod state;
pub mod visitor;
pub mod watcher;

pub use changeset::{ChangeSet, ChangeSetEntry, ChangeSetListener};
pub use error::{Error, RegistrationError, Result};
pub use hashing::{FileHash, FileHasher};
pub use platform::WatchService;
pub use watcher::{
    DirectoryChangeEvent, DirectoryChangeListener, DirectoryWatcher, DirectoryWatcherBuilder,
    EventKind,
};
