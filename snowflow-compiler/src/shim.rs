//! Stored procedures backing the scheduler tasks
//!
//! Two procedures are registered per pipeline: the run starter, called by
//! the root task, and the node executor, called by every node task. Both are
//! Python handlers rendered from templates under `templates/`. Values are
//! substituted as JSON literals, which Python reads back unchanged.

use serde::Serialize;
use snowflow_core::domain::config::RuntimeConfig;
use std::collections::BTreeMap;

use crate::assembler::NamingPolicy;
use crate::datasets::{
    NON_IDENTIFIER_PATTERN, RUN_ID_COLUMN, STORAGE_DIR, TABLE_PREFIX, load_order, save_strategies,
};
use crate::emit::quote;
use crate::error::{CompileError, Result};
use crate::template::Template;

pub const NODE_EXECUTOR: Template =
    Template::new("node_executor", include_str!("../templates/node_executor.py"));
pub const START_RUN: Template = Template::new("start_run", include_str!("../templates/start_run.py"));

const BODY_DELIMITER: &str = "$$";
const ROOT_PACKAGES: [&str; 1] = ["snowflake-snowpark-python"];
const NODE_ARGUMENTS: &str = "environment string, run_id string, pipeline_name string, \
                              node_names array, extra_params_json string";

/// Values baked into the node executor
#[derive(Debug, Clone, Default)]
pub struct ShimParameters {
    /// Code stage, with the `@` sigil
    pub stage: String,
    /// Data stage, with the `@` sigil
    pub temporary_stage: String,
    /// Top-level folder of the project archive
    pub project_dir_name: String,
    /// Applied to `os.environ` before the project is bootstrapped
    pub extra_env: BTreeMap<String, String>,
}

impl ShimParameters {
    pub fn new(runtime: &RuntimeConfig, project_dir_name: impl Into<String>) -> Self {
        Self {
            stage: runtime.stage.clone(),
            temporary_stage: runtime.temporary_stage.clone(),
            project_dir_name: project_dir_name.into(),
            extra_env: BTreeMap::new(),
        }
    }

    pub fn with_extra_env(mut self, extra_env: BTreeMap<String, String>) -> Self {
        self.extra_env = extra_env;
        self
    }

    fn values(&self) -> Result<BTreeMap<&'static str, String>> {
        Ok(BTreeMap::from([
            ("stage", literal(&self.stage)?),
            ("temporary_stage", literal(&self.temporary_stage)?),
            ("project_dir_name", literal(&self.project_dir_name)?),
            ("extra_env", literal(&self.extra_env)?),
            ("table_prefix", literal(TABLE_PREFIX)?),
            ("run_id_column", literal(RUN_ID_COLUMN)?),
            ("storage_dir", literal(STORAGE_DIR)?),
            ("non_identifier_pattern", literal(NON_IDENTIFIER_PATTERN)?),
            ("save_strategies", literal(&save_strategies())?),
            ("load_order", literal(&load_order())?),
        ]))
    }
}

fn literal<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| CompileError::Packaging(e.to_string()))
}

/// A permanent Python stored procedure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcedureDefinition {
    pub name: String,
    /// Argument list without parentheses
    pub arguments: String,
    pub packages: Vec<String>,
    /// Staged files on the procedure's import path
    pub imports: Vec<String>,
    pub runtime_version: String,
    pub body: String,
}

impl ProcedureDefinition {
    /// Run starter called by the root task
    pub fn root_procedure(naming: &NamingPolicy, runtime: &RuntimeConfig) -> Result<Self> {
        Ok(Self {
            name: naming.root_procedure.clone(),
            arguments: String::new(),
            packages: ROOT_PACKAGES.iter().map(|p| p.to_string()).collect(),
            imports: Vec::new(),
            runtime_version: runtime.python_version.clone(),
            body: START_RUN.render(&BTreeMap::new())?,
        })
    }

    /// Node executor called by every node task
    ///
    /// # Arguments
    /// * `flat_imports` - File names uploaded to the root of the code stage
    pub fn node_procedure(
        naming: &NamingPolicy,
        runtime: &RuntimeConfig,
        flat_imports: &[String],
        params: &ShimParameters,
    ) -> Result<Self> {
        Ok(Self {
            name: naming.node_procedure.clone(),
            arguments: NODE_ARGUMENTS.to_string(),
            packages: runtime.dependencies.packages.clone(),
            imports: flat_imports
                .iter()
                .map(|file| format!("{}/{}", runtime.stage, file))
                .collect(),
            runtime_version: runtime.python_version.clone(),
            body: NODE_EXECUTOR.render(&params.values()?)?,
        })
    }

    /// `create or replace procedure` statement
    ///
    /// # Errors
    /// Returns [`CompileError::InvalidProcedureBody`] when the body would
    /// terminate the `$$` block early.
    pub fn to_sql(&self) -> Result<String> {
        if self.body.contains(BODY_DELIMITER) {
            return Err(CompileError::InvalidProcedureBody(self.name.clone()));
        }

        let mut sql = format!(
            "create or replace procedure {}({})\n\
             returns string\n\
             language python\n\
             runtime_version = {}\n\
             packages = ({})\n",
            self.name,
            self.arguments,
            quote(&self.runtime_version),
            quoted_list(&self.packages)
        );
        if !self.imports.is_empty() {
            sql.push_str(&format!("imports = ({})\n", quoted_list(&self.imports)));
        }
        sql.push_str(&format!(
            "handler = 'main'\n\
             execute as caller\n\
             as\n\
             {delim}\n\
             {}\n\
             {delim};",
            self.body.trim_end(),
            delim = BODY_DELIMITER
        ));
        Ok(sql)
    }
}

fn quoted_list(values: &[String]) -> String {
    values
        .iter()
        .map(|v| quote(v))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::Strategy;

    fn naming(runtime: &RuntimeConfig) -> NamingPolicy {
        NamingPolicy::new(runtime, "__default__")
    }

    #[test]
    fn test_templates_only_use_known_placeholders() {
        assert!(START_RUN.placeholders().is_empty());

        let params = ShimParameters::new(&RuntimeConfig::default(), "spaceflights");
        let known = params.values().unwrap();
        for name in NODE_EXECUTOR.placeholders() {
            assert!(known.contains_key(name.as_str()), "unknown placeholder {name}");
        }
    }

    #[test]
    fn test_node_procedure_is_fully_rendered() {
        let runtime = RuntimeConfig::default();
        let params = ShimParameters::new(&runtime, "spaceflights").with_extra_env(BTreeMap::from([
            ("API_URL".to_string(), "https://example.com/?a='b'".to_string()),
        ]));
        let procedure = ProcedureDefinition::node_procedure(
            &naming(&runtime),
            &runtime,
            &["toposort.zip".to_string()],
            &params,
        )
        .unwrap();

        assert!(!procedure.body.contains("{{"));
        assert!(procedure.body.contains(r#"STAGE = "@SNOWFLOW_STAGE""#));
        assert!(procedure.body.contains(r#"PROJECT_DIR_NAME = "spaceflights""#));
        assert!(procedure.body.contains(r#"EXTRA_ENV = {"API_URL":"https://example.com/?a='b'"}"#));
        assert!(procedure.body.contains(r#"TABLE_PREFIX = "snowflow_tmp_""#));
        assert_eq!(procedure.imports, vec!["@SNOWFLOW_STAGE/toposort.zip"]);
    }

    #[test]
    fn test_node_executor_dataset_strategies() {
        let runtime = RuntimeConfig::default();
        let params = ShimParameters::new(&runtime, "spaceflights");
        let body = NODE_EXECUTOR.render(&params.values().unwrap()).unwrap();

        assert!(body.contains(r#"NON_IDENTIFIER_PATTERN = "[^A-Za-z0-9_]""#));
        assert!(body.contains(
            r#"SAVE_STRATEGIES = {"DataFrame":"TransientTableDataset","Other":"StagePickleDataset"}"#
        ));
        assert!(body.contains(r#"LOAD_ORDER = ["TransientTableDataset","StagePickleDataset"]"#));
        for strategy in Strategy::LOAD_ORDER {
            assert!(body.contains(&format!("class {}(AbstractDataset)", strategy.adapter())));
            assert!(body.contains(&format!(r#""{0}": {0},"#, strategy.adapter())));
        }
    }

    #[test]
    fn test_node_procedure_sql() {
        let runtime = RuntimeConfig::default();
        let params = ShimParameters::new(&runtime, "spaceflights");
        let sql = ProcedureDefinition::node_procedure(
            &naming(&runtime),
            &runtime,
            &["toposort.zip".to_string()],
            &params,
        )
        .unwrap()
        .to_sql()
        .unwrap();

        assert!(sql.starts_with(
            "create or replace procedure SNOWFLOW_RUN(environment string, run_id string, \
             pipeline_name string, node_names array, extra_params_json string)\n"
        ));
        assert!(sql.contains("runtime_version = '3.10'\n"));
        assert!(sql.contains("'snowflake-snowpark-python', 'cachetools'"));
        assert!(sql.contains("imports = ('@SNOWFLOW_STAGE/toposort.zip')\n"));
        assert!(sql.contains("handler = 'main'\nexecute as caller\nas\n$$\n"));
        assert!(sql.ends_with("\n$$;"));
    }

    #[test]
    fn test_root_procedure_sql() {
        let runtime = RuntimeConfig {
            stored_procedure_name_suffix: "_dev".to_string(),
            ..RuntimeConfig::default()
        };
        let sql = ProcedureDefinition::root_procedure(&naming(&runtime), &runtime)
            .unwrap()
            .to_sql()
            .unwrap();

        assert!(sql.starts_with("create or replace procedure SNOWFLOW_START_RUN_DEV()\n"));
        assert!(sql.contains("packages = ('snowflake-snowpark-python')\n"));
        assert!(!sql.contains("imports ="));
        assert!(sql.contains("system$set_return_value"));
    }

    #[test]
    fn test_body_with_delimiter_rejected() {
        let procedure = ProcedureDefinition {
            name: "P".to_string(),
            arguments: String::new(),
            packages: Vec::new(),
            imports: Vec::new(),
            runtime_version: "3.10".to_string(),
            body: "price = '$$'".to_string(),
        };
        assert!(matches!(
            procedure.to_sql(),
            Err(CompileError::InvalidProcedureBody(name)) if name == "P"
        ));
    }
}
