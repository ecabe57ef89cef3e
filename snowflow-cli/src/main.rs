//! Snowflow CLI
//!
//! Compiles pipelines into Snowflake tasks and runs them.

mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "snowflow")]
#[command(about = "Run pipelines as Snowflake tasks", long_about = None)]
struct Cli {
    /// Environment to use
    #[arg(short, long, global = true, env = "KEDRO_ENV", default_value = "local")]
    env: String,

    /// Project root containing conf/ and pipelines.lua
    #[arg(long, global = true, env = "SNOWFLOW_PROJECT_DIR", default_value = ".")]
    project_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "snowflow=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    debug!("Environment {}, project {}", cli.env, cli.project_dir.display());

    let config = Config {
        env: cli.env,
        project_dir: cli.project_dir,
    };

    let exit_code = handle_command(cli.command, &config).await?;
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
