//! Compile command handler
//!
//! Produces the task SQL of a pipeline offline: no stage, procedure or task
//! is touched.

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use snowflow_compiler::PipelineGenerator;
use std::path::PathBuf;

use super::args::parse_extra_params;
use crate::config::Config;

#[derive(Args)]
pub struct CompileArgs {
    /// Name of the pipeline to compile
    #[arg(short, long, default_value = "__default__")]
    pipeline: String,

    /// Parameter overrides as a JSON document
    #[arg(long)]
    params: Option<String>,

    /// Pipeline SQL definition file
    #[arg(short, long, default_value = "pipeline.sql")]
    output: PathBuf,
}

pub fn handle_compile(args: CompileArgs, config: &Config) -> Result<()> {
    let plugin = config.plugin_config()?;
    let warehouse = config.warehouse(&plugin)?;
    let graph = config.pipeline_graph(&args.pipeline)?;
    let extra_params = parse_extra_params(args.params.as_deref())?;

    let plan = PipelineGenerator::new(
        plugin.snowflake.runtime,
        warehouse,
        &config.env,
        &args.pipeline,
        config.project_dir(),
        graph,
    )
    .with_extra_params(extra_params)
    .plan()
    .with_context(|| format!("Failed to compile pipeline {}", args.pipeline))?;

    if let Err(e) = plan.save(&args.output) {
        println!(
            "{}",
            format!("Could not save tasks SQL into {}", args.output.display()).red()
        );
        return Err(e.into());
    }

    println!(
        "{} {} tasks into {}",
        "Compiled".green().bold(),
        plan.pipeline_tasks_sql.len(),
        args.output.display().to_string().cyan()
    );
    Ok(())
}
