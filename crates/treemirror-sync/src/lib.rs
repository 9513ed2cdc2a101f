//! treemirror Sync - Event-driven mirroring engine
//!
//! Provides:
//! - Replay of create/modify/move/delete events onto a backup tree
//! - Ownership and timestamp preservation without following symlinks
//! - Recovery from races against the process writing the live tree
//! - A bounded, ordered per-tree event pipeline fed by `notify`
//!
//! ## Modules
//!
//! - [`engine`] - [`MirrorEngine`](engine::MirrorEngine), the event handlers
//! - [`metadata`] - copy, ownership and timestamp helpers
//! - [`watcher`] - `notify` wrapper and rename stitching
//! - [`queue`] - bounded event queue with an overflow policy
//! - [`intake`] - async loop from raw notify events to the queue
//! - [`worker`] - blocking consumer applying queued events
//! - [`pipeline`] - one running tree: watcher, intake and worker

pub mod engine;
pub mod intake;
pub mod metadata;
pub mod pipeline;
pub mod queue;
pub mod watcher;
pub mod worker;

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors that the mirror engine does not recover from locally
///
/// A missing source or backup entry is never reported through this type;
/// the engine treats it as a race and carries on.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// Insufficient filesystem permissions
    #[error("Permission denied while trying to {op}: {}", path.display())]
    PermissionDenied { op: &'static str, path: PathBuf },

    /// No available disk space to complete the operation
    #[error("Disk full while trying to {op}: {}", path.display())]
    DiskFull { op: &'static str, path: PathBuf },

    /// Any other I/O error
    #[error("Failed to {op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl MirrorError {
    /// Classifies an I/O error raised while performing `op` on `path`.
    pub fn io(op: &'static str, path: &Path, source: io::Error) -> Self {
        let path = path.to_path_buf();
        if source.kind() == io::ErrorKind::PermissionDenied {
            return MirrorError::PermissionDenied { op, path };
        }
        if source.raw_os_error() == Some(libc::ENOSPC) {
            return MirrorError::DiskFull { op, path };
        }
        MirrorError::Io { op, path, source }
    }

}

/// Returns true for errors meaning the entry no longer exists
///
/// ENOTDIR covers a path whose parent was replaced by a file in the
/// meantime.
pub(crate) fn is_race(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotFound || err.raw_os_error() == Some(libc::ENOTDIR)
}
