//! Event handler port
//!
//! The mirror engine is one implementation of [`IFileEventHandler`]; the
//! per-tree worker only depends on this trait, so tests can substitute a
//! recording handler.
//!
//! ## Design Notes
//!
//! - Handlers are synchronous. They perform blocking filesystem work and are
//!   expected to run on a dedicated blocking thread, never on an async task.
//! - The error type is associated so adapters keep their typed errors.

use std::fmt::{self, Display, Formatter};
use std::path::Path;

use crate::domain::FileEvent;

/// Result of handling one event without an unrecovered error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorOutcome {
    /// The backup tree was updated
    Applied,
    /// The event referred to the watched root itself and was discarded
    Skipped,
    /// The referenced entry changed again before the action ran; nothing to do
    Raced,
}

impl Display for MirrorOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            MirrorOutcome::Applied => "applied",
            MirrorOutcome::Skipped => "skipped",
            MirrorOutcome::Raced => "raced",
        };
        f.write_str(name)
    }
}

/// Receives filesystem events for one watched tree
pub trait IFileEventHandler {
    /// Error returned for failures the handler could not recover from
    type Error: std::error::Error + Send + Sync + 'static;

    /// A file or directory appeared at `path`
    fn on_created(&self, path: &Path) -> Result<MirrorOutcome, Self::Error>;

    /// The entry at `path` changed
    fn on_modified(&self, path: &Path) -> Result<MirrorOutcome, Self::Error>;

    /// The entry at `from` now lives at `to`
    fn on_moved(&self, from: &Path, to: &Path) -> Result<MirrorOutcome, Self::Error>;

    /// The entry at `path` was removed
    fn on_deleted(&self, path: &Path) -> Result<MirrorOutcome, Self::Error>;

    /// Dispatches `event` to the matching handler method
    fn handle(&self, event: &FileEvent) -> Result<MirrorOutcome, Self::Error> {
        match event {
            FileEvent::Created(path) => self.on_created(path),
            FileEvent::Modified(path) => self.on_modified(path),
            FileEvent::Moved { from, to } => self.on_moved(from, to),
            FileEvent::Deleted(path) => self.on_deleted(path),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::path::PathBuf;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<String>>,
    }

    impl IFileEventHandler for Recorder {
        type Error = std::io::Error;

        fn on_created(&self, path: &Path) -> Result<MirrorOutcome, Self::Error> {
            self.calls.borrow_mut().push(format!("created {}", path.display()));
            Ok(MirrorOutcome::Applied)
        }

        fn on_modified(&self, path: &Path) -> Result<MirrorOutcome, Self::Error> {
            self.calls.borrow_mut().push(format!("modified {}", path.display()));
            Ok(MirrorOutcome::Applied)
        }

        fn on_moved(&self, from: &Path, to: &Path) -> Result<MirrorOutcome, Self::Error> {
            self.calls
                .borrow_mut()
                .push(format!("moved {} {}", from.display(), to.display()));
            Ok(MirrorOutcome::Applied)
        }

        fn on_deleted(&self, path: &Path) -> Result<MirrorOutcome, Self::Error> {
            self.calls.borrow_mut().push(format!("deleted {}", path.display()));
            Ok(MirrorOutcome::Raced)
        }
    }

    #[test]
    fn test_handle_dispatches_by_kind() {
        let recorder = Recorder::default();

        recorder.handle(&FileEvent::Created(PathBuf::from("/a"))).unwrap();
        recorder.handle(&FileEvent::Modified(PathBuf::from("/a"))).unwrap();
        recorder
            .handle(&FileEvent::Moved {
                from: PathBuf::from("/a"),
                to: PathBuf::from("/b"),
            })
            .unwrap();
        let outcome = recorder.handle(&FileEvent::Deleted(PathBuf::from("/b"))).unwrap();

        assert_eq!(outcome, MirrorOutcome::Raced);
        assert_eq!(
            *recorder.calls.borrow(),
            vec!["created /a", "modified /a", "moved /a /b", "deleted /b"]
        );
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(MirrorOutcome::Applied.to_string(), "applied");
        assert_eq!(MirrorOutcome::Skipped.to_string(), "skipped");
        assert_eq!(MirrorOutcome::Raced.to_string(), "raced");
    }
}
