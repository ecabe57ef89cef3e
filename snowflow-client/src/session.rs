//! Warehouse session abstraction
//!
//! Everything the compiler needs from the warehouse goes through
//! [`WarehouseSession`]: executing one SQL statement and uploading local
//! files to a stage. The compiled artifact holds a shared handle to it.

use async_trait::async_trait;

use crate::error::Result;

/// Rows returned by a statement
///
/// Values are kept in their textual wire form; `None` is SQL NULL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl QueryResult {
    /// Index of a column, case-insensitive
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Value of `column` in row `row`, `None` when absent or NULL
    pub fn get(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)?.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Options of a stage upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOptions {
    pub overwrite: bool,
    pub auto_compress: bool,
    pub parallel: u32,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self {
            overwrite: true,
            auto_compress: false,
            parallel: 8,
        }
    }
}

/// A connected warehouse session
#[async_trait]
pub trait WarehouseSession: Send + Sync {
    /// Execute a single SQL statement and wait for its result
    async fn execute(&self, sql: &str) -> Result<QueryResult>;

    /// Upload files matching `local_pattern` to `stage_location`
    ///
    /// # Arguments
    /// * `local_pattern` - Local path, may contain a `*` wildcard
    /// * `stage_location` - Target such as `@MY_STAGE/project`
    async fn put(&self, local_pattern: &str, stage_location: &str, options: &PutOptions)
    -> Result<()>;
}

/// Render the `PUT` statement for an upload
pub fn put_statement(local_pattern: &str, stage_location: &str, options: &PutOptions) -> String {
    format!(
        "PUT 'file://{}' {} OVERWRITE={} AUTO_COMPRESS={} PARALLEL={}",
        local_pattern.replace('\'', "\\'"),
        stage_location,
        if options.overwrite { "TRUE" } else { "FALSE" },
        if options.auto_compress { "TRUE" } else { "FALSE" },
        options.parallel
    )
}
