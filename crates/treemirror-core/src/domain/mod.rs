//! Domain types
//!
//! - [`WatchedTree`] - immutable (root, backup root, label) binding
//! - [`FileEvent`] - one filesystem change under a watched root
//! - [`path_mapper`] - source path to backup path translation
//! - [`DomainError`] - validation failures

pub mod errors;
pub mod event;
pub mod path_mapper;
pub mod tree;

pub use errors::DomainError;
pub use event::{FileEvent, FileEventKind};
pub use path_mapper::relativize;
pub use tree::WatchedTree;
