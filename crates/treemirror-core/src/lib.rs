//! treemirror Core - Domain types and configuration
//!
//! This crate contains:
//! - **Domain types** - `WatchedTree`, `FileEvent`, the path mapper
//! - **Port definitions** - `IFileEventHandler`, implemented by the mirror engine
//! - **Configuration** - typed settings with defaults, YAML loading and
//!   environment overrides
//!
//! Nothing in this crate touches the filesystem beyond reading a config file.

pub mod config;
pub mod domain;
pub mod ports;
