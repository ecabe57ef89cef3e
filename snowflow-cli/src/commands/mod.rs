//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod args;
mod compile;
mod init;
mod run;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

pub use compile::CompileArgs;
pub use init::InitArgs;
pub use run::RunArgs;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Create a basic snowflake.yml in conf/base
    Init(InitArgs),
    /// Translate a pipeline into task SQL without touching Snowflake
    Compile(CompileArgs),
    /// Deploy a pipeline as Snowflake tasks and start it
    Run(RunArgs),
}

/// Handle a CLI command
///
/// # Returns
/// Process exit code
pub async fn handle_command(command: Commands, config: &Config) -> Result<i32> {
    match command {
        Commands::Init(args) => init::handle_init(args, config).map(|_| 0),
        Commands::Compile(args) => compile::handle_compile(args, config).map(|_| 0),
        Commands::Run(args) => run::handle_run(args, config).await,
    }
}
