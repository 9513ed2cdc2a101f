//! Port definitions
//!
//! Traits at the boundary between the domain and the adapters that act on
//! the real filesystem.
//!
//! - [`IFileEventHandler`] - consumer of [`FileEvent`](crate::domain::FileEvent)s for one tree

pub mod event_handler;

pub use event_handler::{IFileEventHandler, MirrorOutcome};
