//! Event intake - raw notify events into the per-tree queue
//!
//! The [`EventIntake`] sits between the [`EventSource`](super::watcher::EventSource)
//! and the [`MirrorWorker`](super::worker::MirrorWorker). It receives raw
//! events, stitches rename halves through a
//! [`RenameStitcher`](super::watcher::RenameStitcher), and pushes the
//! resulting [`FileEvent`]s onto the [`EventQueue`](super::queue).
//!
//! ## Flow
//!
//! ```text
//! EventSource ──→ mpsc::Receiver ──→ EventIntake ──→ EventSender
//!                                        │
//!                                  RenameStitcher
//! ```

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use treemirror_core::domain::FileEvent;

use crate::queue::EventSender;
use crate::watcher::RenameStitcher;

/// Moves events from the watcher channel onto the event queue
pub struct EventIntake {
    /// Receiver for raw events from the EventSource
    raw_rx: mpsc::Receiver<notify::Event>,
    stitcher: RenameStitcher,
    queue: EventSender,
    /// How often held rename halves are checked for expiry
    tick: Duration,
    forwarded: u64,
}

impl EventIntake {
    /// Creates a new intake
    ///
    /// # Arguments
    /// * `raw_rx` - Channel receiver for raw watcher events
    /// * `queue` - Producer half of the tree's event queue
    /// * `pair_timeout` - How long a rename "from" half waits for its "to"
    pub fn new(
        raw_rx: mpsc::Receiver<notify::Event>,
        queue: EventSender,
        pair_timeout: Duration,
    ) -> Self {
        let tick = (pair_timeout / 2).max(Duration::from_millis(1));
        debug!(
            pair_timeout_ms = pair_timeout.as_millis() as u64,
            tick_ms = tick.as_millis() as u64,
            "Creating event intake"
        );

        Self {
            raw_rx,
            stitcher: RenameStitcher::new(pair_timeout),
            queue,
            tick,
            forwarded: 0,
        }
    }

    /// Main loop
    ///
    /// Runs until the watcher channel closes (the source was stopped) or
    /// the queue's consumer goes away. Held rename halves are resolved on
    /// the way out. Returns the number of events queued.
    pub async fn run(mut self) -> u64 {
        info!("Event intake starting");

        let mut expiry = tokio::time::interval(self.tick);
        expiry.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                raw = self.raw_rx.recv() => {
                    match raw {
                        Some(event) => {
                            let resolved = self.stitcher.push(event, Instant::now());
                            if !self.forward(resolved).await {
                                break;
                            }
                        }
                        None => {
                            info!("Watcher channel closed, intake shutting down");
                            let pending = self.stitcher.flush();
                            if !pending.is_empty() {
                                info!(count = pending.len(), "Flushing unpaired renames");
                            }
                            self.forward(pending).await;
                            break;
                        }
                    }
                }

                _ = expiry.tick(), if self.stitcher.pending_count() > 0 => {
                    let expired = self.stitcher.expire(Instant::now());
                    if !self.forward(expired).await {
                        break;
                    }
                }
            }
        }

        info!(forwarded = self.forwarded, "Event intake stopped");
        self.forwarded
    }

    /// Queues `events` in order. Returns false once the queue is closed.
    async fn forward(&mut self, events: Vec<FileEvent>) -> bool {
        for event in events {
            debug!(kind = %event.kind(), path = %event.source_path().display(), "Queueing event");
            if self.queue.send(event).await.is_err() {
                warn!("Event queue closed, intake stopping");
                return false;
            }
            self.forwarded += 1;
        }
        true
    }
}

// ============================================================================
// Unit tests
// ============================================================================
