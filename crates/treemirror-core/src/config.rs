//! Configuration module for treemirror.
//!
//! Provides typed configuration structs that map to an optional YAML file,
//! environment variable overrides (the container-facing interface),
//! validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Base directory of a Plex Media Server installation inside its container.
pub const PLEX_CONFIG_DIR: &str = "/config/Library/Application Support/Plex Media Server";

/// Largest accepted `queue.capacity`.
///
/// The `drop_oldest` queue rounds its capacity up to a power of two and
/// preallocates every slot, so larger values are refused up front.
pub const MAX_QUEUE_CAPACITY: usize = 1 << 16;

/// Values of `ENABLE_METADATA_BACKUP` that turn metadata mirroring on.
const ENABLE_STRINGS: &[&str] = &["true", "yes", "1", "y"];

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for treemirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Primary tree: the media server's database directory.
    pub database: TreeConfig,
    /// Optional second tree: the media server's metadata directory.
    pub metadata: MetadataConfig,
    pub queue: QueueConfig,
    pub mirror: MirrorConfig,
    pub logging: LoggingConfig,
    /// Seconds to wait for each tree to drain its queue on shutdown.
    pub shutdown_timeout_secs: u64,
}

/// A watched directory and the directory it is mirrored into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    pub root: PathBuf,
    pub backup: PathBuf,
}

/// Metadata tree settings; mirroring it is opt-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub enabled: bool,
    pub root: PathBuf,
    pub backup: PathBuf,
}

/// Per-tree event queue settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of events buffered between intake and worker, at most
    /// [`MAX_QUEUE_CAPACITY`]. Under `drop_oldest` the effective capacity is
    /// rounded up to the next power of two.
    pub capacity: usize,
    /// What to do when the queue is full.
    pub overflow: OverflowPolicy,
    /// Milliseconds to wait for the second half of a rename before treating
    /// the first half as a deletion.
    pub rename_pair_timeout_ms: u64,
}

/// Mirror engine behaviour.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// What a tree does after an I/O failure that is not a race.
    pub on_io_error: IoErrorPolicy,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

/// Backpressure policy for a full per-tree event queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait for the worker to free a slot; the event source is slowed down.
    #[default]
    Block,
    /// Discard the oldest queued events and keep accepting new ones.
    DropOldest,
}

/// Reaction to an unrecovered I/O error while mirroring a tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IoErrorPolicy {
    /// Stop mirroring the tree; the operator restarts the process.
    #[default]
    FailFast,
    /// Log the error and keep processing later events.
    Continue,
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "block" => Ok(Self::Block),
            "drop_oldest" => Ok(Self::DropOldest),
            other => Err(format!("unknown overflow policy '{other}'")),
        }
    }
}

impl FromStr for IoErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fail_fast" => Ok(Self::FailFast),
            "continue" => Ok(Self::Continue),
            other => Err(format!("unknown I/O error policy '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for Config {
    fn default() -> Self {
        Self {
            database: TreeConfig::default(),
            metadata: MetadataConfig::default(),
            queue: QueueConfig::default(),
            mirror: MirrorConfig::default(),
            logging: LoggingConfig::default(),
            shutdown_timeout_secs: 10,
        }
    }
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            root: Path::new(PLEX_CONFIG_DIR)
                .join("Plug-in Support")
                .join("Databases"),
            backup: PathBuf::from("/db-backup"),
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            root: Path::new(PLEX_CONFIG_DIR).join("Metadata"),
            backup: PathBuf::from("/metadata-backup"),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 4096,
            overflow: OverflowPolicy::Block,
            rename_pair_timeout_ms: 500,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Errors raised while resolving configuration from the environment.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable held a value that could not be parsed
    #[error("Invalid value for {var}: '{value}' ({reason})")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl Config {
    /// Load configuration from a YAML file at `path`.
    ///
    /// Sections and fields missing from the file keep their defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Override fields from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|var| std::env::var(var).ok())
    }

    /// Override fields from the variables returned by `lookup`.
    ///
    /// Unset variables leave the current value untouched. Recognised
    /// variables are `PLEX_DB_PATH`, `DB_BACKUP_PATH`,
    /// `ENABLE_METADATA_BACKUP`, `PLEX_METADATA_PATH`, `METADATA_BACKUP_PATH`,
    /// `LOG_LEVEL`, `EVENT_QUEUE_CAPACITY`, `EVENT_QUEUE_OVERFLOW` and
    /// `IO_ERROR_POLICY`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PLEX_DB_PATH") {
            self.database.root = PathBuf::from(v);
        }
        if let Some(v) = lookup("DB_BACKUP_PATH") {
            self.database.backup = PathBuf::from(v);
        }
        if let Some(v) = lookup("ENABLE_METADATA_BACKUP") {
            self.metadata.enabled = ENABLE_STRINGS.contains(&v.trim().to_lowercase().as_str());
        }
        if let Some(v) = lookup("PLEX_METADATA_PATH") {
            self.metadata.root = PathBuf::from(v);
        }
        if let Some(v) = lookup("METADATA_BACKUP_PATH") {
            self.metadata.backup = PathBuf::from(v);
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.logging.level = normalize_log_level(&v);
        }
        if let Some(v) = lookup("EVENT_QUEUE_CAPACITY") {
            self.queue.capacity =
                v.trim()
                    .parse()
                    .map_err(|e: std::num::ParseIntError| ConfigError::InvalidValue {
                        var: "EVENT_QUEUE_CAPACITY",
                        value: v.clone(),
                        reason: e.to_string(),
                    })?;
        }
        if let Some(v) = lookup("EVENT_QUEUE_OVERFLOW") {
            self.queue.overflow = v.parse().map_err(|reason| ConfigError::InvalidValue {
                var: "EVENT_QUEUE_OVERFLOW",
                value: v.clone(),
                reason,
            })?;
        }
        if let Some(v) = lookup("IO_ERROR_POLICY") {
            self.mirror.on_io_error = v.parse().map_err(|reason| ConfigError::InvalidValue {
                var: "IO_ERROR_POLICY",
                value: v.clone(),
                reason,
            })?;
        }
        Ok(())
    }
}

/// Lowercases a level name and maps Python-style aliases onto tracing levels.
fn normalize_log_level(level: &str) -> String {
    match level.trim().to_lowercase().as_str() {
        "warning" => "warn".to_string(),
        "critical" | "fatal" => "error".to_string(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"queue.capacity"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid. Directory existence
    /// is not checked here; a missing watched root fails when the watch is
    /// registered.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- trees ---
        validate_tree(
            &mut errors,
            "database",
            &self.database.root,
            &self.database.backup,
        );
        if self.metadata.enabled {
            validate_tree(
                &mut errors,
                "metadata",
                &self.metadata.root,
                &self.metadata.backup,
            );

            if self.metadata.backup == self.database.backup {
                errors.push(ValidationError {
                    field: "metadata.backup".into(),
                    message: "must differ from database.backup".into(),
                });
            } else if self.metadata.backup.starts_with(&self.database.root)
                || self.database.backup.starts_with(&self.metadata.root)
            {
                errors.push(ValidationError {
                    field: "metadata.backup".into(),
                    message: "a backup directory may not live inside the other watched tree"
                        .into(),
                });
            }
        }

        // --- queue ---
        if self.queue.capacity == 0 {
            errors.push(ValidationError {
                field: "queue.capacity".into(),
                message: "must be greater than 0".into(),
            });
        } else if self.queue.capacity > MAX_QUEUE_CAPACITY {
            errors.push(ValidationError {
                field: "queue.capacity".into(),
                message: format!("must be at most {MAX_QUEUE_CAPACITY}"),
            });
        }
        if self.queue.rename_pair_timeout_ms == 0 {
            errors.push(ValidationError {
                field: "queue.rename_pair_timeout_ms".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}', expected one of: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        if self.shutdown_timeout_secs == 0 {
            errors.push(ValidationError {
                field: "shutdown_timeout_secs".into(),
                message: "must be greater than 0".into(),
            });
        }

        errors
    }
}

fn validate_tree(errors: &mut Vec<ValidationError>, section: &str, root: &Path, backup: &Path) {
    if !root.is_absolute() {
        errors.push(ValidationError {
            field: format!("{section}.root"),
            message: format!("must be an absolute path: {}", root.display()),
        });
    }
    if !backup.is_absolute() {
        errors.push(ValidationError {
            field: format!("{section}.backup"),
            message: format!("must be an absolute path: {}", backup.display()),
        });
    }
    if backup.starts_with(root) {
        errors.push(ValidationError {
            field: format!("{section}.backup"),
            message: format!("must not be inside {}", root.display()),
        });
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use treemirror_core::config::{ConfigBuilder, OverflowPolicy};
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .database_root(PathBuf::from("/data"))
///     .database_backup(PathBuf::from("/backup"))
///     .queue_overflow(OverflowPolicy::DropOldest)
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- database ---

    pub fn database_root(mut self, root: PathBuf) -> Self {
        self.config.database.root = root;
        self
    }

    pub fn database_backup(mut self, backup: PathBuf) -> Self {
        self.config.database.backup = backup;
        self
    }

    // --- metadata ---

    pub fn metadata_enabled(mut self, enabled: bool) -> Self {
        self.config.metadata.enabled = enabled;
        self
    }

    pub fn metadata_root(mut self, root: PathBuf) -> Self {
        self.config.metadata.root = root;
        self
    }

    pub fn metadata_backup(mut self, backup: PathBuf) -> Self {
        self.config.metadata.backup = backup;
        self
    }

    // --- queue ---

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue.capacity = capacity;
        self
    }

    pub fn queue_overflow(mut self, policy: OverflowPolicy) -> Self {
        self.config.queue.overflow = policy;
        self
    }

    pub fn queue_rename_pair_timeout_ms(mut self, ms: u64) -> Self {
        self.config.queue.rename_pair_timeout_ms = ms;
        self
    }

    // --- mirror ---

    pub fn mirror_on_io_error(mut self, policy: IoErrorPolicy) -> Self {
        self.config.mirror.on_io_error = policy;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn shutdown_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.shutdown_timeout_secs = seconds;
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
