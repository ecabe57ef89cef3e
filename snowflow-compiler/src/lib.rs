//! Pipeline-to-task compiler
//!
//! Turns a pipeline graph into scheduler tasks backed by staged Python
//! procedures, fires them and follows their progress.

pub mod artifact;
pub mod assembler;
pub mod datasets;
pub mod emit;
pub mod error;
pub mod generator;
pub mod monitor;
pub mod packaging;
pub mod shim;
pub mod template;
pub mod workflow;

#[cfg(test)]
mod testing;

pub use artifact::{CompiledPipeline, RunOptions, TaskPlan};
pub use error::{CompileError, Result};
pub use generator::PipelineGenerator;
pub use packaging::{ModuleLocator, PythonModuleLocator};
pub use workflow::{RunOutcome, run_and_save};
