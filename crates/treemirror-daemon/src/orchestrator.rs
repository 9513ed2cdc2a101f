//! Orchestrator - plans the watched trees and owns their pipelines
//!
//! One pipeline per tree: the database tree always, the metadata tree when
//! enabled. Pipelines share nothing, so a slow or failed tree never holds up
//! the other one. Shutdown runs in reverse start order.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use treemirror_core::config::Config;
use treemirror_core::domain::{DomainError, WatchedTree};
use treemirror_sync::pipeline::TreePipeline;

/// Label of the database tree in logs
pub const DATABASE_LABEL: &str = "SQLite";
/// Label of the metadata tree in logs
pub const METADATA_LABEL: &str = "Metadata";

/// Builds the trees described by `config`, in start order.
pub fn planned_trees(config: &Config) -> Result<Vec<WatchedTree>, DomainError> {
    let mut trees = vec![WatchedTree::new(
        &config.database.root,
        &config.database.backup,
        DATABASE_LABEL,
    )?];

    if config.metadata.enabled {
        trees.push(WatchedTree::new(
            &config.metadata.root,
            &config.metadata.backup,
            METADATA_LABEL,
        )?);
    } else {
        info!("Metadata backup disabled");
    }

    Ok(trees)
}

/// Running pipelines for every planned tree
pub struct Orchestrator {
    pipelines: Vec<TreePipeline>,
    shutdown_timeout: Duration,
}

impl Orchestrator {
    /// Starts a pipeline for each planned tree.
    ///
    /// If a later tree fails to start, the ones already running are stopped
    /// before the error is returned.
    pub async fn start(config: &Config) -> Result<Self> {
        let trees = planned_trees(config).context("Invalid tree configuration")?;
        let mut orchestrator = Self {
            pipelines: Vec::with_capacity(trees.len()),
            shutdown_timeout: Duration::from_secs(config.shutdown_timeout_secs),
        };

        for tree in trees {
            info!(tree = %tree, "Starting file monitoring");
            match TreePipeline::start(tree, config) {
                Ok(pipeline) => orchestrator.pipelines.push(pipeline),
                Err(e) => {
                    // The start error is the one worth reporting.
                    let _ = orchestrator.stop().await;
                    return Err(e);
                }
            }
        }

        Ok(orchestrator)
    }

    /// Labels of the running trees, in start order
    pub fn labels(&self) -> Vec<&str> {
        self.pipelines.iter().map(|p| p.tree().label()).collect()
    }

    /// Mirrors until `shutdown` is cancelled, then stops every tree.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!(trees = ?self.labels(), "Mirroring, waiting for shutdown signal");
        shutdown.cancelled().await;
        info!("Shutdown requested");
        self.stop().await
    }

    /// Stops pipelines in reverse start order.
    ///
    /// Every pipeline is stopped even if an earlier one fails; the first
    /// failure is returned.
    pub async fn stop(mut self) -> Result<()> {
        let mut first_error = None;

        while let Some(pipeline) = self.pipelines.pop() {
            let label = pipeline.tree().label().to_string();
            match pipeline.stop(self.shutdown_timeout).await {
                Ok(report) if report.halted => {
                    warn!(tree = %label, failed = report.failed, "Tree had already stopped mirroring");
                }
                Ok(_) => info!(tree = %label, "Stopped file monitoring"),
                Err(e) => {
                    error!(tree = %label, error = %e, "Failed to stop cleanly");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
