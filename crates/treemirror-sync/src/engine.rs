//! Mirror engine
//!
//! [`MirrorEngine`] replays filesystem events from one watched root onto its
//! backup root. It holds no state beyond the immutable [`WatchedTree`] and a
//! logging span; every handler is a direct reaction to a single event.
//!
//! ## Races
//!
//! The live tree is written concurrently by another process, so by the time
//! an event is handled the entry it names may already be gone. Missing
//! sources and missing backup entries (including a path whose parent is no
//! longer a directory) are logged and reported as
//! [`MirrorOutcome::Raced`]; later events bring the backup up to date. Every
//! other I/O failure is returned as a [`MirrorError`].

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, info_span, warn, Span};
use treemirror_core::domain::{relativize, WatchedTree};
use treemirror_core::ports::{IFileEventHandler, MirrorOutcome};

use crate::metadata::{self, Ownership};
use crate::{is_race, MirrorError};

/// Result type for engine handlers
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Applies filesystem events for one [`WatchedTree`] to its backup root
#[derive(Debug, Clone)]
pub struct MirrorEngine {
    tree: WatchedTree,
    /// Logging context entered by every handler
    span: Span,
}

impl MirrorEngine {
    /// Creates an engine whose log lines carry the tree label.
    pub fn new(tree: WatchedTree) -> Self {
        let span = info_span!("mirror", tree = %tree.label());
        Self::with_span(tree, span)
    }

    /// Creates an engine that logs inside the given span.
    pub fn with_span(tree: WatchedTree, span: Span) -> Self {
        Self { tree, span }
    }

    /// The tree this engine mirrors
    pub fn tree(&self) -> &WatchedTree {
        &self.tree
    }

    fn relative(&self, path: &Path) -> PathBuf {
        relativize(path, self.tree.root())
    }

    // ========================================================================
    // Created / Modified
    // ========================================================================

    /// Copies the live entry at `path` into the backup tree.
    fn backup_entry(&self, path: &Path) -> Result<MirrorOutcome> {
        let backup = self.tree.backup_path_for(path);
        debug!(source = %path.display(), backup = %backup.display(), "Backup file path");

        let meta = match fs::symlink_metadata(path) {
            Ok(m) => m,
            Err(e) if is_race(&e) => return Ok(self.source_vanished(path)),
            Err(e) => return Err(MirrorError::io("stat", path, e)),
        };
        let file_type = meta.file_type();

        let copied = if file_type.is_dir() {
            metadata::create_directory(&backup)
                .map_err(|e| ("create directory", e))
        } else if file_type.is_symlink() {
            metadata::ensure_parent(&backup)
                .and_then(|()| metadata::copy_symlink(path, &backup, &meta))
                .map_err(|e| ("copy symlink", e))
        } else if file_type.is_file() {
            metadata::ensure_parent(&backup)
                .and_then(|()| metadata::copy_file(path, &backup, &meta))
                .map_err(|e| ("copy", e))
        } else {
            warn!(path = %path.display(), "Skipping special file");
            return Ok(MirrorOutcome::Skipped);
        };

        match copied {
            Ok(()) => {}
            Err((_, e)) if is_race(&e) => return Ok(self.source_vanished(path)),
            Err((op, e)) => return Err(MirrorError::io(op, &backup, e)),
        }

        // Owner as of now, not as of the lstat taken before the copy.
        let ownership = match Ownership::read(path) {
            Ok(o) => o,
            Err(e) if is_race(&e) => return Ok(self.source_vanished(path)),
            Err(e) => return Err(MirrorError::io("stat", path, e)),
        };

        match metadata::apply_ownership(&backup, ownership) {
            Ok(()) => Ok(MirrorOutcome::Applied),
            Err(e) if is_race(&e) => Ok(self.source_vanished(path)),
            Err(e) => Err(MirrorError::io("set ownership", &backup, e)),
        }
    }

    fn source_vanished(&self, path: &Path) -> MirrorOutcome {
        info!(path = %path.display(), "File was deleted before it could be copied");
        MirrorOutcome::Raced
    }

    // ========================================================================
    // Deleted
    // ========================================================================

    fn remove_backup(&self, path: &Path) -> Result<MirrorOutcome> {
        let backup = self.tree.backup_path_for(path);
        debug!(backup = %backup.display(), "Removing backup entry");

        let removed = match fs::symlink_metadata(&backup) {
            Ok(m) if m.is_dir() => fs::remove_dir_all(&backup),
            Ok(_) => fs::remove_file(&backup),
            Err(e) => Err(e),
        };

        match removed {
            Ok(()) => Ok(MirrorOutcome::Applied),
            Err(e) if is_race(&e) => {
                info!(backup = %backup.display(), "File has already been deleted");
                Ok(MirrorOutcome::Raced)
            }
            Err(e) => Err(MirrorError::io("remove", &backup, e)),
        }
    }

    // ========================================================================
    // Moved
    // ========================================================================

    fn relocate_backup(&self, from: &Path, to: &Path) -> Result<MirrorOutcome> {
        let old_backup = self.tree.backup_path_for(from);
        let new_backup = self.tree.backup_path_for(to);
        debug!(
            old = %old_backup.display(),
            new = %new_backup.display(),
            "Relocating backup entry"
        );

        let old_meta = match fs::symlink_metadata(&old_backup) {
            Ok(m) => m,
            Err(e) if is_race(&e) => return Ok(self.already_moved(&old_backup, &new_backup)),
            Err(e) => return Err(MirrorError::io("stat", &old_backup, e)),
        };

        if old_backup != new_backup {
            // rename(2) only replaces a file with a file or an empty directory
            // with a directory; anything else at the destination goes first.
            match fs::symlink_metadata(&new_backup) {
                Ok(new_meta) if new_meta.is_dir() || old_meta.is_dir() => {
                    metadata::remove_entry(&new_backup)
                        .map_err(|e| MirrorError::io("remove", &new_backup, e))?;
                }
                Ok(_) => {}
                Err(e) if is_race(&e) => {
                    metadata::ensure_parent(&new_backup)
                        .map_err(|e| MirrorError::io("create directory", &new_backup, e))?;
                }
                Err(e) => return Err(MirrorError::io("stat", &new_backup, e)),
            }

            match fs::rename(&old_backup, &new_backup) {
                Ok(()) => {}
                Err(e) if is_race(&e) => return Ok(self.already_moved(&old_backup, &new_backup)),
                Err(e) => return Err(MirrorError::io("rename", &old_backup, e)),
            }
        }

        // The live entry has already moved; its current ownership wins over
        // whatever the old backup entry carried.
        let ownership = match Ownership::read(to) {
            Ok(o) => o,
            Err(e) if is_race(&e) => {
                info!(
                    path = %to.display(),
                    "Moved file disappeared before its ownership could be read"
                );
                return Ok(MirrorOutcome::Raced);
            }
            Err(e) => return Err(MirrorError::io("stat", to, e)),
        };

        match metadata::apply_ownership(&new_backup, ownership) {
            Ok(()) => Ok(MirrorOutcome::Applied),
            Err(e) if is_race(&e) => Ok(self.already_moved(&old_backup, &new_backup)),
            Err(e) => Err(MirrorError::io("set ownership", &new_backup, e)),
        }
    }

    fn already_moved(&self, old_backup: &Path, new_backup: &Path) -> MirrorOutcome {
        info!(
            old = %old_backup.display(),
            new = %new_backup.display(),
            "File was already moved to new destination"
        );
        MirrorOutcome::Raced
    }

    fn skip_root(&self, path: &Path) -> bool {
        let is_root = self.tree.is_root(path);
        if is_root {
            debug!(path = %path.display(), "Ignoring event for the watched root");
        }
        is_root
    }
}

impl IFileEventHandler for MirrorEngine {
    type Error = MirrorError;

    fn on_created(&self, path: &Path) -> Result<MirrorOutcome> {
        let _enter = self.span.enter();
        if self.skip_root(path) {
            return Ok(MirrorOutcome::Skipped);
        }
        info!(path = %self.relative(path).display(), "File created: backing up");
        self.backup_entry(path)
    }

    fn on_modified(&self, path: &Path) -> Result<MirrorOutcome> {
        let _enter = self.span.enter();
        if self.skip_root(path) {
            return Ok(MirrorOutcome::Skipped);
        }
        info!(path = %self.relative(path).display(), "File modified: backing up");
        self.backup_entry(path)
    }

    fn on_moved(&self, from: &Path, to: &Path) -> Result<MirrorOutcome> {
        let _enter = self.span.enter();
        if self.skip_root(from) {
            return Ok(MirrorOutcome::Skipped);
        }
        info!(
            old = %self.relative(from).display(),
            new = %self.relative(to).display(),
            "File moved"
        );
        self.relocate_backup(from, to)
    }

    fn on_deleted(&self, path: &Path) -> Result<MirrorOutcome> {
        let _enter = self.span.enter();
        if self.skip_root(path) {
            return Ok(MirrorOutcome::Skipped);
        }
        info!(path = %self.relative(path).display(), "File deleted: removing");
        self.remove_backup(path)
    }
}

// ============================================================================
// Unit tests
// ============================================================================
