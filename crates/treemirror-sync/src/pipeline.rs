//! One running mirror: watcher, intake and worker for a single tree
//!
//! ```text
//! EventSource ──→ EventIntake (async task) ──→ EventQueue ──→ MirrorWorker (blocking task)
//! ```
//!
//! Stopping closes the chain from the front: the watcher is released, the
//! intake flushes held renames and closes the queue, and the worker drains
//! what is left before it exits.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use treemirror_core::config::Config;
use treemirror_core::domain::WatchedTree;

use crate::engine::MirrorEngine;
use crate::intake::EventIntake;
use crate::queue::event_queue;
use crate::watcher::EventSource;
use crate::worker::{MirrorWorker, WorkerReport};

/// A started mirror for one [`WatchedTree`]
pub struct TreePipeline {
    tree: WatchedTree,
    source: EventSource,
    intake: JoinHandle<u64>,
    worker: JoinHandle<WorkerReport>,
}

impl TreePipeline {
    /// Starts watching `tree` and mirroring its events.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// Returns an error if the tree's root cannot be watched
    pub fn start(tree: WatchedTree, config: &Config) -> Result<Self> {
        let (queue_tx, queue_rx) = event_queue(config.queue.capacity, config.queue.overflow);

        let (source, raw_rx) = EventSource::watch(tree.root(), config.queue.capacity)
            .with_context(|| format!("Failed to start mirroring {}", tree.label()))?;

        let engine = MirrorEngine::new(tree.clone());
        let worker = MirrorWorker::new(engine, queue_rx, config.mirror.on_io_error).spawn();

        info!(
            tree = %tree.label(),
            root = %tree.root().display(),
            backup = %tree.backup_root().display(),
            capacity = config.queue.capacity,
            overflow = ?queue_tx.policy(),
            "Mirroring started"
        );

        let pair_timeout = Duration::from_millis(config.queue.rename_pair_timeout_ms);
        let intake = tokio::spawn(EventIntake::new(raw_rx, queue_tx, pair_timeout).run());

        Ok(Self {
            tree,
            source,
            intake,
            worker,
        })
    }

    /// The tree being mirrored
    pub fn tree(&self) -> &WatchedTree {
        &self.tree
    }

    /// Stops watching and waits up to `timeout` for queued events to drain.
    ///
    /// # Errors
    /// Returns an error if the tasks do not finish within `timeout` or panic
    pub async fn stop(self, timeout: Duration) -> Result<WorkerReport> {
        let TreePipeline {
            tree,
            source,
            intake,
            worker,
        } = self;
        let label = tree.label().to_string();

        info!(tree = %label, "Stopping mirror");
        source.stop();

        let drained = tokio::time::timeout(timeout, async {
            let forwarded = intake.await.context("Event intake task failed")?;
            let report = worker.await.context("Mirror worker task failed")?;
            Ok::<_, anyhow::Error>((forwarded, report))
        })
        .await;

        match drained {
            Ok(Ok((forwarded, report))) => {
                info!(
                    tree = %label,
                    forwarded,
                    applied = report.applied,
                    failed = report.failed,
                    "Mirror stopped"
                );
                Ok(report)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(
                    tree = %label,
                    timeout_secs = timeout.as_secs_f64(),
                    "Timed out waiting for the event queue to drain"
                );
                Err(anyhow!(
                    "Mirror for {} did not stop within {:?}",
                    label,
                    timeout
                ))
            }
        }
    }
}
