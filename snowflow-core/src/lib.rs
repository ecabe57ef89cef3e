//! Snowflow Core
//!
//! Core types and abstractions shared by the snowflow crates.
//!
//! This crate contains:
//! - Domain types: pipeline graph, plugin configuration, task history, execution reports
//! - Loader: `conf/<env>` configuration and credentials loading
//! - Naming: sanitization of node names into scheduler identifiers
//! - Errors: configuration and graph errors

pub mod domain;
pub mod error;
pub mod loader;
pub mod naming;

pub use error::{ConfigError, GraphError};
pub use naming::sanitize;
