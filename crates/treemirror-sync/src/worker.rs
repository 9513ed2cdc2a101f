//! Mirror worker - applies queued events one at a time
//!
//! Each watched tree gets exactly one worker, so events for a tree are
//! applied strictly in the order they were queued. The handlers do blocking
//! filesystem I/O, so the worker runs on tokio's blocking pool.

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use treemirror_core::config::IoErrorPolicy;
use treemirror_core::ports::{IFileEventHandler, MirrorOutcome};

use crate::queue::{EventReceiver, Received};

/// Counters collected while a worker runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub applied: u64,
    pub skipped: u64,
    pub raced: u64,
    /// Events whose handler returned an error
    pub failed: u64,
    /// Events discarded by a drop-oldest queue before the worker saw them
    pub dropped: u64,
    /// The worker stopped on an error instead of draining the queue
    pub halted: bool,
}

impl WorkerReport {
    fn record(&mut self, outcome: MirrorOutcome) {
        match outcome {
            MirrorOutcome::Applied => self.applied += 1,
            MirrorOutcome::Skipped => self.skipped += 1,
            MirrorOutcome::Raced => self.raced += 1,
        }
    }
}

/// Drains an event queue into a handler
pub struct MirrorWorker<H> {
    handler: H,
    queue: EventReceiver,
    on_io_error: IoErrorPolicy,
}

impl<H> MirrorWorker<H>
where
    H: IFileEventHandler + Send + 'static,
{
    pub fn new(handler: H, queue: EventReceiver, on_io_error: IoErrorPolicy) -> Self {
        Self {
            handler,
            queue,
            on_io_error,
        }
    }

    /// Runs the worker on the blocking thread pool
    pub fn spawn(self) -> JoinHandle<WorkerReport> {
        tokio::task::spawn_blocking(move || self.run())
    }

    /// Processes events until the queue closes, or until the first error
    /// under [`IoErrorPolicy::FailFast`].
    ///
    /// Blocks the calling thread.
    pub fn run(mut self) -> WorkerReport {
        let mut report = WorkerReport::default();
        info!(policy = ?self.on_io_error, "Mirror worker starting");

        loop {
            let event = match self.queue.blocking_recv() {
                Received::Event(event) => event,
                Received::Dropped(n) => {
                    warn!(dropped = n, "Event queue overflowed, oldest events were discarded");
                    report.dropped += n;
                    continue;
                }
                Received::Closed => break,
            };

            match self.handler.handle(&event) {
                Ok(outcome) => {
                    debug!(kind = %event.kind(), %outcome, "Event handled");
                    report.record(outcome);
                }
                Err(e) => {
                    report.failed += 1;
                    match self.on_io_error {
                        IoErrorPolicy::FailFast => {
                            error!(
                                kind = %event.kind(),
                                path = %event.source_path().display(),
                                error = %e,
                                "Unrecovered error, mirroring stopped for this tree"
                            );
                            report.halted = true;
                            break;
                        }
                        IoErrorPolicy::Continue => {
                            error!(
                                kind = %event.kind(),
                                path = %event.source_path().display(),
                                error = %e,
                                "Failed to mirror event, continuing"
                            );
                        }
                    }
                }
            }
        }

        info!(
            applied = report.applied,
            skipped = report.skipped,
            raced = report.raced,
            failed = report.failed,
            dropped = report.dropped,
            halted = report.halted,
            "Mirror worker stopped"
        );
        report
    }
}

// ============================================================================
// Unit tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::io;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};

    use treemirror_core::config::OverflowPolicy;
    use treemirror_core::domain::FileEvent;

    use super::*;
    use crate::queue::event_queue;

    /// Records every event; paths named "bad" fail, "gone" race.
    #[derive(Clone, Default)]
    struct Recorder {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn log(&self, entry: String, path: &Path) -> io::Result<MirrorOutcome> {
            self.seen.lock().unwrap().push(entry);
            match path.file_name().and_then(|n| n.to_str()) {
                Some("bad") => Err(io::Error::new(io::ErrorKind::Other, "boom")),
                Some("gone") => Ok(MirrorOutcome::Raced),
                _ => Ok(MirrorOutcome::Applied),
            }
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl IFileEventHandler for Recorder {
        type Error = io::Error;

        fn on_created(&self, path: &Path) -> io::Result<MirrorOutcome> {
            self.log(format!("created {}", path.display()), path)
        }

        fn on_modified(&self, path: &Path) -> io::Result<MirrorOutcome> {
            self.log(format!("modified {}", path.display()), path)
        }

        fn on_moved(&self, from: &Path, to: &Path) -> io::Result<MirrorOutcome> {
            self.log(format!("moved {} {}", from.display(), to.display()), from)
        }

        fn on_deleted(&self, path: &Path) -> io::Result<MirrorOutcome> {
            self.log(format!("deleted {}", path.display()), path)
        }
    }

    fn p(s: &str) -> PathBuf {
        PathBuf::from(s)
    }

    #[tokio::test]
    async fn test_worker_applies_in_queue_order() {
        let (tx, rx) = event_queue(16, OverflowPolicy::Block);
        let recorder = Recorder::default();
        let handle = MirrorWorker::new(recorder.clone(), rx, IoErrorPolicy::FailFast).spawn();

        tx.send(FileEvent::Created(p("/d/a"))).await.unwrap();
        tx.send(FileEvent::Modified(p("/d/a"))).await.unwrap();
        tx.send(FileEvent::Moved { from: p("/d/a"), to: p("/d/b") }).await.unwrap();
        tx.send(FileEvent::Deleted(p("/d/gone"))).await.unwrap();
        drop(tx);

        let report = handle.await.unwrap();
        assert_eq!(
            recorder.seen(),
            vec!["created /d/a", "modified /d/a", "moved /d/a /d/b", "deleted /d/gone"]
        );
        assert_eq!(report.applied, 3);
        assert_eq!(report.raced, 1);
        assert!(!report.halted);
    }

    #[tokio::test]
    async fn test_fail_fast_stops_at_first_error() {
        let (tx, rx) = event_queue(16, OverflowPolicy::Block);
        let recorder = Recorder::default();

        tx.send(FileEvent::Created(p("/d/bad"))).await.unwrap();
        tx.send(FileEvent::Created(p("/d/after"))).await.unwrap();

        let report = MirrorWorker::new(recorder.clone(), rx, IoErrorPolicy::FailFast)
            .spawn()
            .await
            .unwrap();

        assert_eq!(recorder.seen(), vec!["created /d/bad"]);
        assert_eq!(report.failed, 1);
        assert!(report.halted);

        // The receiver is gone, so the producer side notices.
        assert!(tx.send(FileEvent::Created(p("/d/late"))).await.is_err());
    }

    #[tokio::test]
    async fn test_continue_policy_skips_failed_event() {
        let (tx, rx) = event_queue(16, OverflowPolicy::Block);
        let recorder = Recorder::default();

        tx.send(FileEvent::Created(p("/d/bad"))).await.unwrap();
        tx.send(FileEvent::Created(p("/d/after"))).await.unwrap();
        drop(tx);

        let report = MirrorWorker::new(recorder.clone(), rx, IoErrorPolicy::Continue)
            .spawn()
            .await
            .unwrap();

        assert_eq!(recorder.seen(), vec!["created /d/bad", "created /d/after"]);
        assert_eq!(report.failed, 1);
        assert_eq!(report.applied, 1);
        assert!(!report.halted);
    }

    #[tokio::test]
    async fn test_dropped_events_are_counted() {
        let (tx, rx) = event_queue(2, OverflowPolicy::DropOldest);
        let recorder = Recorder::default();

        for name in ["/d/1", "/d/2", "/d/3", "/d/4"] {
            tx.send(FileEvent::Modified(p(name))).await.unwrap();
        }
        drop(tx);

        let report = MirrorWorker::new(recorder.clone(), rx, IoErrorPolicy::FailFast)
            .spawn()
            .await
            .unwrap();

        assert_eq!(report.dropped, 2);
        assert_eq!(recorder.seen(), vec!["modified /d/3", "modified /d/4"]);
    }

    #[tokio::test]
    async fn test_root_skips_are_counted() {
        struct SkipAll;
        impl IFileEventHandler for SkipAll {
            type Error = io::Error;
            fn on_created(&self, _: &Path) -> io::Result<MirrorOutcome> {
                Ok(MirrorOutcome::Skipped)
            }
            fn on_modified(&self, _: &Path) -> io::Result<MirrorOutcome> {
                Ok(MirrorOutcome::Skipped)
            }
            fn on_moved(&self, _: &Path, _: &Path) -> io::Result<MirrorOutcome> {
                Ok(MirrorOutcome::Skipped)
            }
            fn on_deleted(&self, _: &Path) -> io::Result<MirrorOutcome> {
                Ok(MirrorOutcome::Skipped)
            }
        }

        let (tx, rx) = event_queue(4, OverflowPolicy::Block);
        tx.send(FileEvent::Modified(p("/d"))).await.unwrap();
        drop(tx);

        let report = MirrorWorker::new(SkipAll, rx, IoErrorPolicy::FailFast)
            .spawn()
            .await
            .unwrap();
        assert_eq!(report.skipped, 1);
    }
}
