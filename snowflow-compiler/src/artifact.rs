//! Compiled pipeline artifact
//!
//! A [`TaskPlan`] is the pure output of compilation. A [`CompiledPipeline`]
//! pairs it with the session it was staged through so it can be fired and
//! monitored.

use snowflow_client::WarehouseSession;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{CompileError, Result};
use crate::monitor::{CompletionMonitor, POLL_INTERVAL};

/// Ordered scheduler statements for one pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPlan {
    /// Root task first, then node tasks in topological order
    pub pipeline_tasks_sql: Vec<String>,
    /// Enable, resume and fire the root task
    pub execute_sql: Vec<String>,
    pub root_task_name: String,
    pub pipeline_task_names: Vec<String>,
}

impl TaskPlan {
    /// Creation statements followed by activation statements
    pub fn statements(&self) -> impl Iterator<Item = &str> {
        self.pipeline_tasks_sql
            .iter()
            .chain(self.execute_sql.iter())
            .map(String::as_str)
    }

    /// Every statement, separated by a blank line
    pub fn to_sql_text(&self) -> String {
        self.statements().collect::<Vec<_>>().join("\n\n")
    }

    /// Write [`Self::to_sql_text`] to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_sql_text()).map_err(|e| {
            CompileError::io(format!("Could not save tasks SQL into {}", path.display()), e)
        })?;
        info!("Task definitions written to {}", path.display());
        Ok(())
    }
}

/// How a compiled pipeline is fired
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub wait_for_completion: bool,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            wait_for_completion: false,
            timeout: Duration::from_secs(600),
            poll_interval: POLL_INTERVAL,
        }
    }
}

/// A staged pipeline ready to be created and fired
pub struct CompiledPipeline {
    session: Arc<dyn WarehouseSession>,
    plan: TaskPlan,
}

impl CompiledPipeline {
    pub fn new(session: Arc<dyn WarehouseSession>, plan: TaskPlan) -> Self {
        Self { session, plan }
    }

    pub fn plan(&self) -> &TaskPlan {
        &self.plan
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.plan.save(path)
    }

    /// Create every task, then fire the root task
    ///
    /// Stops at the first failing statement; tasks created before it are
    /// left in place.
    ///
    /// # Arguments
    /// * `echo` - Receives the status table while waiting
    /// * `on_start` - Called once the root task was fired
    ///
    /// # Returns
    /// `true` without waiting, otherwise whether every task succeeded in time
    pub async fn run<E, S>(&self, options: &RunOptions, echo: E, on_start: S) -> Result<bool>
    where
        E: FnMut(&str),
        S: FnOnce(),
    {
        info!("Executing pipeline SQL");
        let fired_at = chrono::Utc::now();
        for sql in self.plan.statements() {
            debug!("{}", sql);
            self.session.execute(sql).await?;
        }
        on_start();

        if !options.wait_for_completion {
            return Ok(true);
        }

        let success = CompletionMonitor::new(
            self.session.as_ref(),
            &self.plan.root_task_name,
            &self.plan.pipeline_task_names,
        )
        .with_poll_interval(options.poll_interval)
        .fired_at(fired_at)
        .wait(options.timeout, echo)
        .await?;
        Ok(success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSession;
    use snowflow_client::QueryResult;

    fn plan() -> TaskPlan {
        TaskPlan {
            pipeline_tasks_sql: vec![
                "create or replace task ROOT".to_string(),
                "create or replace task a".to_string(),
            ],
            execute_sql: vec![
                "call SYSTEM$TASK_DEPENDENTS_ENABLE('ROOT');".to_string(),
                "alter task ROOT resume;".to_string(),
                "execute task ROOT;".to_string(),
            ],
            root_task_name: "ROOT".to_string(),
            pipeline_task_names: vec!["a".to_string()],
        }
    }

    #[test]
    fn test_sql_text_joins_with_blank_lines() {
        let text = plan().to_sql_text();
        assert!(text.starts_with("create or replace task ROOT\n\ncreate or replace task a\n\n"));
        assert!(text.ends_with("alter task ROOT resume;\n\nexecute task ROOT;"));
    }

    #[test]
    fn test_save_is_byte_identical_on_resave() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.sql");
        plan().save(&path).unwrap();
        let first = std::fs::read(&path).unwrap();
        plan().save(&path).unwrap();
        assert_eq!(first, std::fs::read(&path).unwrap());
        assert_eq!(first, plan().to_sql_text().into_bytes());
    }

    #[test]
    fn test_save_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = plan().save(&dir.path().join("missing/pipeline.sql")).unwrap_err();
        assert!(matches!(err, CompileError::Io { .. }));
    }

    #[tokio::test]
    async fn test_run_executes_creation_then_activation() {
        let session = Arc::new(RecordingSession::new());
        let pipeline = CompiledPipeline::new(session.clone(), plan());

        let mut started = false;
        let success = pipeline
            .run(&RunOptions::default(), |_| {}, || started = true)
            .await
            .unwrap();

        assert!(success);
        assert!(started);
        let executed = session.statements();
        assert_eq!(executed, plan().statements().collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_run_stops_at_first_failure() {
        let session = Arc::new(RecordingSession::failing_on("resume"));
        let pipeline = CompiledPipeline::new(session.clone(), plan());

        let mut started = false;
        let result = pipeline
            .run(&RunOptions::default(), |_| {}, || started = true)
            .await;

        assert!(matches!(result, Err(CompileError::Client(_))));
        assert!(!started);
        assert_eq!(session.statements().len(), 4);
        assert!(!session.statements().iter().any(|s| s.starts_with("execute task")));
    }

    #[tokio::test]
    async fn test_run_waits_for_completion() {
        let session = Arc::new(RecordingSession::with_responder(|sql| {
            if sql.contains("scheduled_from = 'EXECUTE TASK'") {
                return Ok(QueryResult {
                    columns: vec!["NAME".into(), "RUN_ID".into(), "SCHEDULED_TIME".into()],
                    rows: vec![vec![
                        Some("ROOT".into()),
                        Some("42".into()),
                        Some(chrono::Utc::now().to_rfc3339()),
                    ]],
                });
            }
            if sql.contains("where run_id = 42") {
                let row = |name: &str| {
                    vec![
                        Some(name.to_string()),
                        Some("42".to_string()),
                        Some("2024-01-01T00:00:00Z".to_string()),
                        Some("2024-01-01T00:01:00Z".to_string()),
                        Some("SUCCEEDED".to_string()),
                        None,
                    ]
                };
                return Ok(QueryResult {
                    columns: [
                        "NAME",
                        "RUN_ID",
                        "SCHEDULED_TIME",
                        "COMPLETED_TIME",
                        "STATE",
                        "RETURN_VALUE",
                    ]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                    rows: vec![row("ROOT"), row("a")],
                });
            }
            Ok(QueryResult::default())
        }));
        let pipeline = CompiledPipeline::new(session, plan());
        let options = RunOptions {
            wait_for_completion: true,
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(1),
        };

        let mut echoed = Vec::new();
        let success = pipeline
            .run(&options, |s| echoed.push(s.to_string()), || {})
            .await
            .unwrap();

        assert!(success);
        assert!(echoed.iter().any(|s| s.contains("Status: SUCCEEDED")));
    }
}
