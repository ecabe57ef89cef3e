//! Error types for configuration resolution and graph construction

use thiserror::Error;

/// Errors raised while loading or resolving plugin configuration
///
/// All of these surface before any remote call is attempted.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Neither a credentials reference nor the full explicit field set
    #[error(
        "Either credentials or all of the following fields: account, user, password_from_env, \
         database, warehouse, schema must be provided. Missing: {}",
        missing.join(", ")
    )]
    IncompleteConnection { missing: Vec<String> },

    /// Credentials reference that is not present in the credentials files
    #[error("Credentials {0} not found in credentials.yml")]
    CredentialsNotFound(String),

    /// Credentials entry that lacks a required field
    #[error("Credentials {name} are missing field '{field}'")]
    CredentialsFieldMissing { name: String, field: String },

    /// Password environment variable unset or empty
    #[error("Environment variable for password is not set or empty: {0}")]
    PasswordNotSet(String),

    /// Stage identifier without the `@` sigil
    #[error("Stage '{0}' must start with '@' followed by a name")]
    InvalidStage(String),

    /// No snowflake configuration found for the environment
    #[error(
        "Missing snowflake.yml files in configuration under {0}. Make sure that you configure your project first"
    )]
    MissingSection(String),

    /// `${VAR}` references to unset environment variables
    #[error("Missing environment variable(s): {}", .0.join(", "))]
    MissingEnvVars(Vec<String>),

    /// Malformed YAML
    #[error("Failed to parse {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// Unreadable configuration file
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while building a pipeline graph
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// Two nodes share a name
    #[error("Duplicate node name '{0}'")]
    DuplicateNode(String),

    /// A dataset is produced by more than one node
    #[error("Dataset '{dataset}' is an output of both '{first}' and '{second}'")]
    OutputNotUnique {
        dataset: String,
        first: String,
        second: String,
    },

    /// The dependency relation is not acyclic
    #[error("Circular dependencies exist among these nodes: {}", .0.join(", "))]
    Cycle(Vec<String>),

    /// A node without a name
    #[error("Node names must not be empty")]
    EmptyName,
}
