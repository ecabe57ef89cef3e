//! Init command handler
//!
//! Writes the commented configuration scaffold.

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use snowflow_core::domain::config::{ConfigTemplateValues, render_config_template};
use std::fs;

use crate::config::Config;

#[derive(Args)]
pub struct InitArgs {
    /// Snowflake account identifier
    account: String,
    /// Snowflake user
    user: String,
    /// Environment variable holding the password
    password_from_env: String,
    database: String,
    schema: String,
    warehouse: String,
}

pub fn handle_init(args: InitArgs, config: &Config) -> Result<()> {
    let target_dir = config.project_dir().join("conf").join("base");
    fs::create_dir_all(&target_dir)
        .with_context(|| format!("Failed to create {}", target_dir.display()))?;

    let target = target_dir.join("snowflake.yml");
    let content = render_config_template(&ConfigTemplateValues {
        account: args.account,
        user: args.user,
        password_from_env: args.password_from_env,
        database: args.database,
        schema: args.schema,
        warehouse: args.warehouse,
    });
    fs::write(&target, content)
        .with_context(|| format!("Failed to write {}", target.display()))?;

    println!(
        "{}",
        format!("Created basic configuration in {}", target.display()).green()
    );
    println!("{}", "Follow the included comments to customize it".green());
    Ok(())
}
