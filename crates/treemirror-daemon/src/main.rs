//! treemirror daemon - keeps backup trees in step with a live media server
//!
//! This binary runs next to the media server (typically in the same
//! container) and handles:
//! - Configuration from defaults, an optional YAML file and the environment
//! - One mirror per watched tree (database, and metadata when enabled)
//! - Graceful shutdown on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! The daemon resolves and validates its configuration, starts the
//! [`Orchestrator`], and waits on a `CancellationToken` that is triggered on
//! receipt of SIGTERM or SIGINT.

mod orchestrator;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use treemirror_core::config::Config;

use crate::orchestrator::Orchestrator;

#[derive(Debug, Parser)]
#[command(name = "treemirrord", version, about = "Mirror media server data into backup directories")]
struct Cli {
    /// YAML configuration file, applied before environment overrides
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print the resolved configuration and exit
    #[arg(long)]
    check: bool,
}

// ============================================================================
// Configuration
// ============================================================================

/// Defaults, then the YAML file if given, then the environment.
fn resolve_config(path: Option<&Path>) -> Result<Config> {
    resolve_config_from(path, |var| std::env::var(var).ok())
}

/// [`resolve_config`] with environment variables taken from `lookup`.
fn resolve_config_from<F>(path: Option<&Path>, lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config file {}", path.display()))?,
        None => Config::default(),
    };
    config
        .apply_env_from(lookup)
        .context("Invalid environment configuration")?;

    let errors = config.validate();
    if !errors.is_empty() {
        let summary: Vec<String> = errors.iter().map(ToString::to_string).collect();
        bail!("Invalid configuration: {}", summary.join("; "));
    }

    Ok(config)
}

/// `RUST_LOG` wins over the configured level.
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

// ============================================================================
// Graceful shutdown signal handler
// ============================================================================

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

// ============================================================================
// Main entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let resolved = resolve_config(cli.config.as_deref());
    let level = match &resolved {
        Ok(config) => config.logging.level.as_str(),
        Err(_) => "info",
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(true)
        .init();

    let config = match resolved {
        Ok(config) => config,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Configuration rejected");
            return Err(e);
        }
    };

    if cli.check {
        let yaml = serde_yaml::to_string(&config).context("Failed to render configuration")?;
        print!("{yaml}");
        return Ok(());
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        level = %config.logging.level,
        "treemirror daemon starting (treemirrord)"
    );
    info!(path = %config.database.root.display(), "Using PLEX_DB_PATH");
    info!(path = %config.database.backup.display(), "Using DB_BACKUP_PATH");
    info!(path = %config.metadata.root.display(), "Using PLEX_METADATA_PATH");
    info!(path = %config.metadata.backup.display(), "Using METADATA_BACKUP_PATH");

    let shutdown_token = CancellationToken::new();

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let result = match Orchestrator::start(&config).await {
        Ok(orchestrator) => orchestrator.run(shutdown_token).await,
        Err(e) => Err(e),
    };

    match &result {
        Ok(()) => info!("treemirror daemon shut down gracefully"),
        Err(e) => error!(error = %e, "treemirror daemon exiting with error"),
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
