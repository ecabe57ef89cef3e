//! Execution report returned by the node executor procedure
//!
//! The procedure echoes its inputs and a timing breakdown as JSON; the
//! scheduler keeps it as the task's return value.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub environment: String,
    pub run_id: String,
    pub pipeline_name: String,
    #[serde(default)]
    pub node_names: Vec<String>,
    #[serde(default)]
    pub extra_params_json: String,
    /// Seconds spent downloading and extracting the project
    #[serde(default)]
    pub extract_time: Option<f64>,
    /// Seconds spent bootstrapping the pipeline framework
    #[serde(default)]
    pub init_time: Option<f64>,
    /// Seconds spent running the node
    #[serde(default)]
    pub run_time: Option<f64>,
}

impl ExecutionReport {
    /// Parse a task return value, `None` when it is not a report
    pub fn from_return_value(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    pub fn total_time(&self) -> f64 {
        [self.extract_time, self.init_time, self.run_time]
            .into_iter()
            .flatten()
            .sum()
    }
}
