//! Fire-and-save flow shared by the CLI `run` command

use std::path::Path;
use tracing::info;

use crate::artifact::{CompiledPipeline, RunOptions};
use crate::error::Result;

/// What happened to a compiled pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Dry run, nothing was executed
    Skipped,
    Succeeded,
    /// Failed or timed out while waiting
    Failed,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Skipped | Self::Succeeded => 0,
            Self::Failed => 1,
        }
    }
}

/// Run the pipeline unless `dry_run`, then save its SQL to `output`
///
/// The artifact is written in both cases. A failing statement aborts before
/// the artifact is saved.
pub async fn run_and_save<E, S>(
    pipeline: &CompiledPipeline,
    output: &Path,
    dry_run: bool,
    options: &RunOptions,
    echo: E,
    on_start: S,
) -> Result<RunOutcome>
where
    E: FnMut(&str),
    S: FnOnce(),
{
    let outcome = if dry_run {
        info!("Dry run, skipping task execution");
        RunOutcome::Skipped
    } else if pipeline.run(options, echo, on_start).await? {
        RunOutcome::Succeeded
    } else {
        RunOutcome::Failed
    };

    pipeline.save(output)?;
    Ok(outcome)
}
