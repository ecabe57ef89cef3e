//! Snowflow Lua Infrastructure
//!
//! Pipeline registries are written in Lua and evaluated in a restricted
//! sandbox. This crate provides:
//! - The sandbox with the `pipeline` helper module
//! - The registry parser producing `snowflow_core` pipeline graphs

pub mod parser;
pub mod sandbox;

pub use parser::{PipelineRegistry, load_pipeline_registry, parse_pipeline_registry};
pub use sandbox::create_sandbox;
