//! Watched tree binding
//!
//! A [`WatchedTree`] pairs a live source directory with the backup directory
//! that mirrors it. It is created once at startup and never changes.

use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};

use super::errors::DomainError;
use super::path_mapper::{join_relative, relativize};

/// A (source root, backup root) pairing mirrored by one engine.
///
/// Both paths must be absolute, and the backup root may not equal or live
/// inside the watched root; otherwise every backup write would be reported
/// back as a new source event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedTree {
    root: PathBuf,
    backup_root: PathBuf,
    label: String,
}

impl WatchedTree {
    /// Create a new `WatchedTree`.
    ///
    /// # Errors
    /// - [`DomainError::InvalidPath`] if either path is relative
    /// - [`DomainError::ValidationFailed`] if the label is empty
    /// - [`DomainError::OverlappingRoots`] if the backup root is the watched
    ///   root or lies beneath it
    pub fn new(
        root: impl Into<PathBuf>,
        backup_root: impl Into<PathBuf>,
        label: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let root = root.into();
        let backup_root = backup_root.into();
        let label = label.into();

        if !root.is_absolute() {
            return Err(DomainError::InvalidPath(format!(
                "Watched root must be absolute: {}",
                root.display()
            )));
        }
        if !backup_root.is_absolute() {
            return Err(DomainError::InvalidPath(format!(
                "Backup root must be absolute: {}",
                backup_root.display()
            )));
        }
        if label.trim().is_empty() {
            return Err(DomainError::ValidationFailed(
                "Tree label must not be empty".to_string(),
            ));
        }
        if backup_root.starts_with(&root) {
            return Err(DomainError::OverlappingRoots(format!(
                "{} is inside {}",
                backup_root.display(),
                root.display()
            )));
        }

        Ok(Self {
            root,
            backup_root,
            label,
        })
    }

    /// The live directory being watched
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The directory receiving the mirrored entries
    #[must_use]
    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    /// Name used in diagnostics only
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns true if `path` is the watched root itself.
    ///
    /// Event sources report the root directory when its own metadata changes;
    /// such events never correspond to a backup entry.
    #[must_use]
    pub fn is_root(&self, path: &Path) -> bool {
        path == self.root
    }

    /// Maps a source path to the location of its backup entry.
    #[must_use]
    pub fn backup_path_for(&self, source: &Path) -> PathBuf {
        join_relative(&self.backup_root, &relativize(source, &self.root))
    }
}

impl Display for WatchedTree {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} -> {})",
            self.label,
            self.root.display(),
            self.backup_root.display()
        )
    }
}
