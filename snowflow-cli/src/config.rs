//! Configuration module
//!
//! CLI-wide settings and project lookups shared by the commands.

use anyhow::{Context, Result, anyhow};
use snowflow_core::domain::config::SnowflowConfig;
use snowflow_core::domain::graph::PipelineGraph;
use snowflow_core::loader::ConfigLoader;
use std::path::{Path, PathBuf};

const REGISTRY_FILE: &str = "pipelines.lua";

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Environment overlaid on `conf/base`
    pub env: String,
    /// Project root
    pub project_dir: PathBuf,
}

impl Config {
    pub fn loader(&self) -> ConfigLoader {
        ConfigLoader::new(&self.project_dir, &self.env)
    }

    pub fn plugin_config(&self) -> Result<SnowflowConfig> {
        self.loader()
            .load_plugin_config()
            .context("Failed to load snowflake.yml")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.project_dir.join(REGISTRY_FILE)
    }

    /// Graph of one pipeline from the project's registry
    pub fn pipeline_graph(&self, pipeline: &str) -> Result<PipelineGraph> {
        let registry = snowflow_lua::load_pipeline_registry(self.registry_path())?;
        registry.graph(pipeline)
    }

    /// Warehouse named by the configuration, without resolving the password
    pub fn warehouse(&self, config: &SnowflowConfig) -> Result<String> {
        let connection = &config.snowflake.connection;
        if let Some(name) = connection.credentials.as_deref().filter(|c| !c.is_empty()) {
            let credentials = self.loader().load_credentials()?;
            return credentials
                .get(name)
                .and_then(|entry| entry.warehouse.clone())
                .ok_or_else(|| anyhow!("Credentials {} do not name a warehouse", name));
        }
        connection
            .warehouse
            .clone()
            .ok_or_else(|| anyhow!("No warehouse configured"))
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }
}
