//! Domain error types
//!
//! Errors raised while constructing domain values such as [`WatchedTree`].
//!
//! [`WatchedTree`]: super::tree::WatchedTree

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// The backup root would receive its own change notifications
    #[error("Backup root overlaps watched root: {0}")]
    OverlappingRoots(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
