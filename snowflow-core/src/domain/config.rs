//! Plugin configuration domain types
//!
//! Mirrors the `snowflake:` section of `conf/<env>/snowflake.yml`:
//! a connection block (credentials reference XOR explicit fields) and a
//! runtime block (stages, schedule, dependencies, naming).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ConfigError;

/// Top-level plugin configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnowflowConfig {
    pub snowflake: SnowflakeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnowflakeConfig {
    pub connection: ConnectionConfig,
    pub runtime: RuntimeConfig,
}

/// Connection block as written in configuration
///
/// Either `credentials` names an entry of `credentials.yml`, or every
/// explicit field is present and the password is read from the
/// environment variable named by `password_from_env`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub credentials: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password_from_env: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub warehouse: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    /// Overrides `https://<account>.snowflakecomputing.com`
    #[serde(default)]
    pub host: Option<String>,
}

/// Runtime block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub dependencies: DependenciesConfig,
    #[serde(default = "default_stage")]
    pub stage: String,
    #[serde(default = "default_temporary_stage")]
    pub temporary_stage: String,
    #[serde(default = "default_schedule")]
    pub schedule: String,
    #[serde(default)]
    pub stored_procedure_name_suffix: String,
    #[serde(default = "default_pipeline_name_mapping")]
    pub pipeline_name_mapping: BTreeMap<String, String>,
    #[serde(default = "default_python_version")]
    pub python_version: String,
}

/// Remote dependencies of the node executor procedure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependenciesConfig {
    /// Packages resolved by the warehouse's own package channel
    #[serde(default = "default_packages")]
    pub packages: Vec<String>,
    /// Local packages shipped as `.tar.zst` and extracted by the shim
    #[serde(default = "default_imports")]
    pub imports: Vec<String>,
    /// Local packages shipped as flat archives and imported directly
    #[serde(default = "default_flat_imports")]
    pub flat_imports: Vec<String>,
}

fn default_stage() -> String {
    "@SNOWFLOW_STAGE".to_string()
}

fn default_temporary_stage() -> String {
    "@SNOWFLOW_TEMP_DATA_STAGE".to_string()
}

fn default_schedule() -> String {
    "11520 minute".to_string()
}

fn default_python_version() -> String {
    "3.10".to_string()
}

fn default_pipeline_name_mapping() -> BTreeMap<String, String> {
    BTreeMap::from([("__default__".to_string(), "default".to_string())])
}

fn default_packages() -> Vec<String> {
    [
        "snowflake-snowpark-python",
        "cachetools",
        "pluggy",
        "PyYAML==6.0",
        "jmespath",
        "click",
        "importlib_resources",
        "toml",
        "rich",
        "pathlib",
        "fsspec",
        "scikit-learn",
        "pandas",
        "zstandard",
        "more-itertools",
        "openpyxl",
        "backoff",
        "cloudpickle",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_imports() -> Vec<String> {
    [
        "kedro",
        "kedro_datasets",
        "omegaconf",
        "antlr4",
        "dynaconf",
        "anyconfig",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_flat_imports() -> Vec<String> {
    vec!["toposort".to_string()]
}

impl Default for DependenciesConfig {
    fn default() -> Self {
        Self {
            packages: default_packages(),
            imports: default_imports(),
            flat_imports: default_flat_imports(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            dependencies: DependenciesConfig::default(),
            stage: default_stage(),
            temporary_stage: default_temporary_stage(),
            schedule: default_schedule(),
            stored_procedure_name_suffix: String::new(),
            pipeline_name_mapping: default_pipeline_name_mapping(),
            python_version: default_python_version(),
        }
    }
}

impl SnowflowConfig {
    /// Parse and validate a configuration document
    pub fn from_yaml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(source).map_err(|e| ConfigError::Yaml {
            path: "<inline>".to_string(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates both blocks
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.snowflake.connection.validate()?;
        self.snowflake.runtime.validate()
    }
}

impl ConnectionConfig {
    /// Validates that either a credentials reference or every explicit field is set
    pub fn validate(&self) -> Result<(), ConfigError> {
        if is_set(&self.credentials) {
            return Ok(());
        }

        let missing: Vec<String> = [
            ("account", &self.account),
            ("user", &self.user),
            ("password_from_env", &self.password_from_env),
            ("database", &self.database),
            ("warehouse", &self.warehouse),
            ("schema", &self.schema),
        ]
        .into_iter()
        .filter(|(_, value)| !is_set(value))
        .map(|(name, _)| name.to_string())
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::IncompleteConnection { missing })
        }
    }

    /// Resolves the connection into concrete parameters
    ///
    /// # Arguments
    /// * `credentials` - Entries of the merged credentials files
    /// * `lookup_env` - Environment lookup, `std::env::var` in production
    pub fn resolve<F>(
        &self,
        credentials: &BTreeMap<String, CredentialsEntry>,
        lookup_env: F,
    ) -> Result<ConnectionParameters, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.validate()?;

        if let Some(name) = self.credentials.as_deref().filter(|c| !c.is_empty()) {
            let entry = credentials
                .get(name)
                .ok_or_else(|| ConfigError::CredentialsNotFound(name.to_string()))?;
            return entry.to_parameters(name);
        }

        // validate() guarantees every explicit field below
        let password_env = self.password_from_env.clone().unwrap_or_default();
        let password = lookup_env(&password_env)
            .filter(|p| !p.is_empty())
            .ok_or(ConfigError::PasswordNotSet(password_env))?;

        Ok(ConnectionParameters {
            account: self.account.clone().unwrap_or_default(),
            user: self.user.clone().unwrap_or_default(),
            password,
            warehouse: self.warehouse.clone().unwrap_or_default(),
            database: self.database.clone().unwrap_or_default(),
            schema: self.schema.clone().unwrap_or_default(),
            role: self.role.clone().filter(|r| !r.is_empty()),
            host: self.host.clone().filter(|h| !h.is_empty()),
        })
    }
}

impl RuntimeConfig {
    /// Validates stage identifiers
    pub fn validate(&self) -> Result<(), ConfigError> {
        for stage in [&self.stage, &self.temporary_stage] {
            if !stage.starts_with('@') || stage.len() < 2 {
                return Err(ConfigError::InvalidStage(stage.clone()));
            }
        }
        Ok(())
    }

    /// Scheduler-friendly name for a pipeline, falling back to the name itself
    pub fn mapped_pipeline_name<'a>(&'a self, pipeline_name: &'a str) -> &'a str {
        self.pipeline_name_mapping
            .get(pipeline_name)
            .map(String::as_str)
            .unwrap_or(pipeline_name)
    }

    /// Stage name without the `@` sigil, as used in DDL
    pub fn stage_name(&self) -> &str {
        self.stage.trim_start_matches('@')
    }

    pub fn temporary_stage_name(&self) -> &str {
        self.temporary_stage.trim_start_matches('@')
    }
}

/// A named entry of `credentials.yml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialsEntry {
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub warehouse: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
}

impl CredentialsEntry {
    fn to_parameters(&self, name: &str) -> Result<ConnectionParameters, ConfigError> {
        let require = |field: &str, value: &Option<String>| {
            value
                .clone()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::CredentialsFieldMissing {
                    name: name.to_string(),
                    field: field.to_string(),
                })
        };

        Ok(ConnectionParameters {
            account: require("account", &self.account)?,
            user: require("user", &self.user)?,
            password: require("password", &self.password)?,
            warehouse: require("warehouse", &self.warehouse)?,
            database: require("database", &self.database)?,
            schema: require("schema", &self.schema)?,
            role: self.role.clone().filter(|r| !r.is_empty()),
            host: self.host.clone().filter(|h| !h.is_empty()),
        })
    }
}

/// Fully resolved connection parameters
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParameters {
    pub account: String,
    pub user: String,
    pub password: String,
    pub warehouse: String,
    pub database: String,
    pub schema: String,
    pub role: Option<String>,
    pub host: Option<String>,
}

impl ConnectionParameters {
    /// Base URL of the account's endpoint
    pub fn base_url(&self) -> String {
        match &self.host {
            Some(host) if host.starts_with("http://") || host.starts_with("https://") => {
                host.trim_end_matches('/').to_string()
            }
            Some(host) => format!("https://{}", host.trim_end_matches('/')),
            None => format!("https://{}.snowflakecomputing.com", self.account),
        }
    }
}

impl fmt::Debug for ConnectionParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParameters")
            .field("account", &self.account)
            .field("user", &self.user)
            .field("password", &"***")
            .field("warehouse", &self.warehouse)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("role", &self.role)
            .field("host", &self.host)
            .finish()
    }
}

fn is_set(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

/// Values substituted into the configuration scaffold
#[derive(Debug, Clone)]
pub struct ConfigTemplateValues {
    pub account: String,
    pub user: String,
    pub password_from_env: String,
    pub database: String,
    pub schema: String,
    pub warehouse: String,
}

/// Render the commented `snowflake.yml` scaffold written by `snowflow init`
pub fn render_config_template(values: &ConfigTemplateValues) -> String {
    format!(
        r#"snowflake:
  connection:
    # Either credentials name (reference to a key in credentials.yml)
    # or leave
    # credentials: ~
    # and specify rest of the fields
    credentials: ~
    account: "{account}"
    database: "{database}"
    # Name of the environment variable to take the Snowflake password from
    password_from_env: "{password_from_env}"
    role: ~
    schema: "{schema}"
    user: "{user}"
    warehouse: "{warehouse}"
  runtime:
    # Default schedule for the root task
    schedule: "11520 minute"

    # Optional suffix for all stored procedures
    stored_procedure_name_suffix: ""

    # Names of the stages
    # `stage` is for stored procedures and project code
    # `temporary_stage` is for temporary data serialization
    stage: "@SNOWFLOW_STAGE"
    temporary_stage: "@SNOWFLOW_TEMP_DATA_STAGE"

    # Python runtime of the stored procedures
    python_version: "3.10"

    # We recommend that these lists are add-only, removing entries
    # may break the project once deployed to Snowflake.
    dependencies:
      # imports are taken from the local environment, uploaded to Snowflake
      # and extracted by the node executor at run time
      imports:
      - kedro
      - kedro_datasets
      - omegaconf
      - antlr4
      - dynaconf
      - anyconfig
      # flat_imports are uploaded as archives importable as-is
      flat_imports:
      - toposort
      # packages use Snowflake's Conda channel
      # https://repo.anaconda.com/pkgs/snowflake/
      packages:
      - snowflake-snowpark-python
      - cachetools
      - pluggy
      - PyYAML==6.0
      - jmespath
      - click
      - importlib_resources
      - toml
      - rich
      - pathlib
      - fsspec
      - scikit-learn
      - pandas
      - zstandard
      - more-itertools
      - openpyxl
      - backoff
      - cloudpickle
    # Optionally provide mapping for user-friendly pipeline names
    pipeline_name_mapping:
      __default__: default
"#,
        account = values.account,
        database = values.database,
        password_from_env = values.password_from_env,
        schema = values.schema,
        user = values.user,
        warehouse = values.warehouse,
    )
}
