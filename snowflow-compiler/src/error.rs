//! Error types for pipeline compilation and deployment

use snowflow_client::ClientError;
use thiserror::Error;

/// Result type alias for compiler operations
pub type Result<T> = std::result::Result<T, CompileError>;

#[derive(Debug, Error)]
pub enum CompileError {
    /// Two graph members map to the same scheduler task name
    #[error("Task name {task_name} is produced by both '{first}' and '{second}'")]
    TaskNameCollision {
        task_name: String,
        first: String,
        second: String,
    },

    /// Shim template references values that were not provided
    #[error("Template {template} has unresolved placeholders: {}", missing.join(", "))]
    UnresolvedPlaceholders {
        template: String,
        missing: Vec<String>,
    },

    /// Rendered procedure body cannot be embedded in a `$$` block
    #[error("Procedure {0} body contains the '$$' delimiter")]
    InvalidProcedureBody(String),

    /// A dependency could not be located in the local environment
    #[error("Could not locate module '{module}': {reason}")]
    ModuleNotFound { module: String, reason: String },

    /// Archive creation failed
    #[error("Packaging failed: {0}")]
    Packaging(String),

    /// Remote call failed
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Local filesystem failure
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl CompileError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}
