//! Filesystem change events
//!
//! [`FileEvent`] is the internal representation consumed by the mirror
//! engine, decoupled from the `notify` crate's raw event types.

use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};

/// Kind of change carried by a [`FileEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileEventKind {
    Created,
    Modified,
    Moved,
    Deleted,
}

impl Display for FileEventKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileEventKind::Created => "created",
            FileEventKind::Modified => "modified",
            FileEventKind::Moved => "moved",
            FileEventKind::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

/// A single filesystem change under a watched root
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    /// A new file or directory was created at the given path
    Created(PathBuf),
    /// An existing entry was modified (content or metadata changed)
    Modified(PathBuf),
    /// An entry was renamed/moved within the watched root
    Moved {
        /// The path before the move
        from: PathBuf,
        /// The path after the move
        to: PathBuf,
    },
    /// A file or directory was deleted from the given path
    Deleted(PathBuf),
}

impl FileEvent {
    /// Returns the kind of this event
    pub fn kind(&self) -> FileEventKind {
        match self {
            FileEvent::Created(_) => FileEventKind::Created,
            FileEvent::Modified(_) => FileEventKind::Modified,
            FileEvent::Moved { .. } => FileEventKind::Moved,
            FileEvent::Deleted(_) => FileEventKind::Deleted,
        }
    }

    /// Returns the source path of this event
    ///
    /// For moves this is the path *before* the move.
    pub fn source_path(&self) -> &Path {
        match self {
            FileEvent::Created(p) | FileEvent::Modified(p) | FileEvent::Deleted(p) => p,
            FileEvent::Moved { from, .. } => from,
        }
    }

    /// Returns the destination path, present only for moves
    pub fn dest_path(&self) -> Option<&Path> {
        match self {
            FileEvent::Moved { to, .. } => Some(to),
            _ => None,
        }
    }
}
