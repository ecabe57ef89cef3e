//! Run command handler
//!
//! Stages the project, registers the procedures, creates the tasks and
//! fires the root task, optionally following it to completion.

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use snowflow_client::{SnowflakeClient, SnowsqlStager};
use snowflow_compiler::{PipelineGenerator, PythonModuleLocator, RunOptions, RunOutcome, run_and_save};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::args::{parse_extra_env, parse_extra_params};
use crate::config::Config;

#[derive(Args)]
pub struct RunArgs {
    /// Name of the pipeline to run
    #[arg(short, long, default_value = "__default__")]
    pipeline: String,

    /// Parameter overrides as a JSON document
    #[arg(long)]
    params: Option<String>,

    /// Only save the SQL definition, do not run it
    #[arg(long)]
    dry_run: bool,

    /// Pipeline SQL definition file
    #[arg(short, long, default_value = "pipeline.sql")]
    output: PathBuf,

    /// Environment variables injected in the tasks, KEY=VALUE
    #[arg(long = "env-var")]
    env_var: Vec<String>,

    /// Block until the pipeline is completed
    #[arg(long)]
    wait_for_completion: bool,

    /// Seconds to wait for completion
    #[arg(long, default_value = "600")]
    timeout: u64,

    /// Python interpreter used to locate dependencies
    #[arg(long, env = "SNOWFLOW_PYTHON", default_value = "python3")]
    python: String,

    /// snowsql executable used for stage uploads
    #[arg(long, env = "SNOWFLOW_SNOWSQL", default_value = "snowsql")]
    snowsql: String,
}

pub async fn handle_run(args: RunArgs, config: &Config) -> Result<i32> {
    let extra_params = parse_extra_params(args.params.as_deref())?;
    let extra_env = parse_extra_env(&args.env_var)?;
    if let Some(params) = &extra_params {
        println!("Running with extra parameters:\n{}", params);
    }

    let plugin = config.plugin_config()?;
    let credentials = config.loader().load_credentials()?;
    let connection = plugin
        .snowflake
        .connection
        .resolve(&credentials, |name| std::env::var(name).ok())?;
    let graph = config.pipeline_graph(&args.pipeline)?;

    let stager = SnowsqlStager::new(connection.clone()).with_program(&args.snowsql);
    stager.check_available().await?;

    println!(
        "Converting pipeline {} into Snowflake tasks...\n\
         This may take a while if warehouse is stopped, please be patient...",
        args.pipeline.cyan()
    );

    let warehouse = connection.warehouse.clone();
    let client = SnowflakeClient::connect(connection)
        .await
        .context("Failed to connect to Snowflake")?
        .with_stager(stager);

    let compiled = PipelineGenerator::new(
        plugin.snowflake.runtime,
        warehouse,
        &config.env,
        &args.pipeline,
        config.project_dir(),
        graph,
    )
    .with_extra_params(extra_params)
    .with_extra_env(extra_env)
    .generate(Arc::new(client), &PythonModuleLocator::new(&args.python))
    .await
    .with_context(|| format!("Failed to compile pipeline {}", args.pipeline))?;

    let options = RunOptions {
        wait_for_completion: args.wait_for_completion,
        timeout: Duration::from_secs(args.timeout),
        ..RunOptions::default()
    };
    let echo = |status: &str| {
        // Clear the terminal so the table redraws in place
        print!("\x1B[2J\x1B[1;1H");
        println!("{}", status);
    };
    let on_start = || println!("Snowflake tasks execution started");

    let outcome = match run_and_save(
        &compiled,
        &args.output,
        args.dry_run,
        &options,
        echo,
        on_start,
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(e @ snowflow_compiler::CompileError::Io { .. }) => {
            println!(
                "{}",
                format!("Could not save tasks SQL into {}", args.output.display()).red()
            );
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    if outcome == RunOutcome::Skipped {
        println!("{}", "Snowflake tasks execution skipped (--dry-run)".yellow());
    }
    println!("Snowflake tasks generated into {}", args.output.display());
    Ok(outcome.exit_code())
}
