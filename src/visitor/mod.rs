//! Recursive file-tree walking with pluggable visitors.
//!
//! The watcher walks trees in several places: seeding its hash table,
//! registering subdirectories, and re-scanning directories after a create.
//! All of them go through the [`FileTreeVisitor`] trait so clients can
//! substitute their own walk order, filtering, or failure handling.

use std::path::Path;

use crate::Result;

/// Callback invoked with each visited path.
pub type VisitCallback<'a> = &'a mut dyn FnMut(&Path) -> Result<()>;

/// Walks a file tree, invoking callbacks for directories and files.
pub trait FileTreeVisitor: Send + Sync {
    /// Visit `root` and everything below it in pre-order: a directory is
    /// reported before its contents. The root itself is visited first.
    ///
    /// Entries the walker cannot read must not abort the walk; how they are
    /// surfaced (ignored, logged, collected) is up to the implementation.
    /// Errors returned by the callbacks do abort the walk and propagate.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by a callback.
    fn visit(
        &self,
        root: &Path,
        on_directory: VisitCallback<'_>,
        on_file: VisitCallback<'_>,
    ) -> Result<()>;
}

/// The default visitor. Walks with `walkdir`, does not follow symlinks, and
/// logs unreadable entries at debug level before moving on.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFileTreeVisitor;

impl FileTreeVisitor for DefaultFileTreeVisitor {
    fn visit(
        &self,
        root: &Path,
        on_directory: VisitCallback<'_>,
        on_file: VisitCallback<'_>,
    ) -> Result<()> {
        for entry in walkdir::WalkDir::new(root).follow_links(false) {
            match entry {
                Ok(entry) => {
                    if entry.file_type().is_dir() {
                        on_directory(entry.path())?;
                    } else {
                        on_file(entry.path())?;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping unreadable entry during walk");
                }
            }
        }
        Ok(())
    }
}
