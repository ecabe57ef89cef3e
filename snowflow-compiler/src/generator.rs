//! Pipeline generator
//!
//! Orchestrates one compilation: stage recreation, packaging, upload,
//! procedure registration and task assembly. [`PipelineGenerator::plan`] is
//! the offline half and touches neither the filesystem nor the warehouse.

use snowflow_client::WarehouseSession;
use snowflow_core::domain::config::RuntimeConfig;
use snowflow_core::domain::graph::PipelineGraph;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::artifact::{CompiledPipeline, TaskPlan};
use crate::assembler::{NamingPolicy, PlanSettings, assemble};
use crate::error::{CompileError, Result};
use crate::packaging::{ModuleLocator, PackagingDriver};
use crate::shim::{ProcedureDefinition, ShimParameters};

pub struct PipelineGenerator {
    runtime: RuntimeConfig,
    warehouse: String,
    environment: String,
    pipeline_name: String,
    extra_params: Option<String>,
    extra_env: BTreeMap<String, String>,
    project_dir: PathBuf,
    graph: PipelineGraph,
}

impl PipelineGenerator {
    /// # Arguments
    /// * `project_dir` - Project root, shipped as a whole
    /// * `graph` - Graph of the pipeline named `pipeline_name`
    pub fn new(
        runtime: RuntimeConfig,
        warehouse: impl Into<String>,
        environment: impl Into<String>,
        pipeline_name: impl Into<String>,
        project_dir: impl Into<PathBuf>,
        graph: PipelineGraph,
    ) -> Self {
        Self {
            runtime,
            warehouse: warehouse.into(),
            environment: environment.into(),
            pipeline_name: pipeline_name.into(),
            extra_params: None,
            extra_env: BTreeMap::new(),
            project_dir: project_dir.into(),
            graph,
        }
    }

    /// Serialized parameter overrides passed to every node
    pub fn with_extra_params(mut self, extra_params: Option<String>) -> Self {
        self.extra_params = extra_params.filter(|p| !p.is_empty());
        self
    }

    /// Environment variables applied remotely before the project starts
    pub fn with_extra_env(mut self, extra_env: BTreeMap<String, String>) -> Self {
        self.extra_env = extra_env;
        self
    }

    pub fn naming(&self) -> NamingPolicy {
        NamingPolicy::new(&self.runtime, &self.pipeline_name)
    }

    /// Task statements for the graph, without any remote call
    pub fn plan(&self) -> Result<TaskPlan> {
        let settings = PlanSettings {
            environment: self.environment.clone(),
            warehouse: self.warehouse.clone(),
            schedule: self.runtime.schedule.clone(),
            pipeline_name: self.pipeline_name.clone(),
            extra_params: self.extra_params.clone(),
            naming: self.naming(),
        };
        assemble(&self.graph, &settings)
    }

    /// Stage the project, register the procedures and build the plan
    ///
    /// Not transactional: a failure leaves the stage and any registered
    /// procedure as they were at that point.
    pub async fn generate(
        &self,
        session: Arc<dyn WarehouseSession>,
        locator: &dyn ModuleLocator,
    ) -> Result<CompiledPipeline> {
        // Collisions are rejected before anything remote happens
        let plan = self.plan()?;
        let naming = self.naming();

        let project_dir = std::fs::canonicalize(&self.project_dir).map_err(|e| {
            CompileError::io(format!("Invalid project directory {}", self.project_dir.display()), e)
        })?;
        let project_dir_name = project_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| CompileError::Packaging("Project directory has no name".to_string()))?;

        let driver = PackagingDriver::new(session.as_ref(), &self.runtime, locator);
        driver.drop_and_recreate().await?;

        let workdir = tempfile::tempdir()
            .map_err(|e| CompileError::io("Failed to create build directory", e))?;
        let flat_dir = create_dir(workdir.path(), "dependencies")?;
        let extract_dir = create_dir(workdir.path(), "project")?;

        let flat_imports = driver.package_dependencies(&flat_dir, &extract_dir)?;
        driver.package_project(
            &project_dir,
            &extract_dir,
            self.runtime.mapped_pipeline_name(&self.pipeline_name),
        )?;

        if !flat_imports.is_empty() {
            driver.upload(&flat_dir, &self.runtime.stage).await?;
        }
        driver
            .upload(&extract_dir, &format!("{}/project", self.runtime.stage))
            .await?;

        let params =
            ShimParameters::new(&self.runtime, project_dir_name).with_extra_env(self.extra_env.clone());
        driver
            .register_procedures(&[
                ProcedureDefinition::root_procedure(&naming, &self.runtime)?,
                ProcedureDefinition::node_procedure(&naming, &self.runtime, &flat_imports, &params)?,
            ])
            .await?;

        info!(
            "Pipeline {} compiled into {} tasks",
            self.pipeline_name,
            plan.pipeline_tasks_sql.len()
        );
        Ok(CompiledPipeline::new(session, plan))
    }
}

fn create_dir(parent: &Path, name: &str) -> Result<PathBuf> {
    let dir = parent.join(name);
    std::fs::create_dir_all(&dir)
        .map_err(|e| CompileError::io(format!("Failed to create {}", dir.display()), e))?;
    Ok(dir)
}
