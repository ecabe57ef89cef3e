//! Completion monitor
//!
//! After the root task is fired, the monitor finds the run identifier of
//! that execution, ignoring executions scheduled before the fire time, and
//! polls the task history until every expected task has
//! completed, any task failed, or the timeout elapsed.

use chrono::{DateTime, TimeDelta, Utc};
use snowflow_client::{QueryResult, Result, WarehouseSession};
use snowflow_core::domain::execution::ExecutionReport;
use snowflow_core::domain::task::{TaskHistoryEntry, TaskState, parse_timestamp};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::emit::quote;

/// Default pause between two task history polls
pub const POLL_INTERVAL: Duration = Duration::from_secs(11);

/// Tolerated clock difference between this host and the warehouse
const CLOCK_SKEW_SECS: i64 = 10;

/// Where a run stands according to its task history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Running,
    Finished { success: bool },
}

/// Evaluate a task history snapshot
///
/// A run is finished when every expected task is present with a completion
/// time, or as soon as any task failed. It succeeded when every task did.
pub fn evaluate(entries: &[TaskHistoryEntry], expected: &[String]) -> Progress {
    let failed = entries.iter().any(|e| e.state == TaskState::Failed);
    let present: HashSet<String> = entries.iter().map(|e| e.name.to_uppercase()).collect();
    let complete = !entries.is_empty()
        && entries.iter().all(TaskHistoryEntry::is_completed)
        && expected.iter().all(|t| present.contains(&t.to_uppercase()));

    if complete || failed {
        Progress::Finished {
            success: !failed && entries.iter().all(|e| e.state == TaskState::Succeeded),
        }
    } else {
        Progress::Running
    }
}

/// Polls task history for one execution of a root task
pub struct CompletionMonitor<'a> {
    session: &'a dyn WarehouseSession,
    root_task_name: &'a str,
    expected: Vec<String>,
    poll_interval: Duration,
    fired_at: Option<DateTime<Utc>>,
}

impl<'a> CompletionMonitor<'a> {
    /// # Arguments
    /// * `root_task_name` - Root task that was fired
    /// * `pipeline_task_names` - Node tasks that must complete; the root is added
    pub fn new(
        session: &'a dyn WarehouseSession,
        root_task_name: &'a str,
        pipeline_task_names: &[String],
    ) -> Self {
        let mut expected = pipeline_task_names.to_vec();
        expected.push(root_task_name.to_string());
        Self {
            session,
            root_task_name,
            expected,
            poll_interval: POLL_INTERVAL,
            fired_at: None,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Only follow an execution scheduled at or after `fired_at`
    pub fn fired_at(mut self, fired_at: DateTime<Utc>) -> Self {
        self.fired_at = Some(fired_at);
        self
    }

    /// Block until the run finishes or `timeout` elapses
    ///
    /// Every snapshot is rendered as a table and passed to `echo`.
    ///
    /// # Returns
    /// `true` when every task succeeded, `false` on failure or timeout
    pub async fn wait<F>(&self, timeout: Duration, mut echo: F) -> Result<bool>
    where
        F: FnMut(&str),
    {
        let started = Instant::now();

        let mut run_id = None;
        while started.elapsed() < timeout {
            if run_id.is_none() {
                run_id = self.latest_run_id().await?;
            }

            if let Some(run_id) = &run_id {
                let entries = self.history(run_id).await?;
                echo(&format!(
                    "{}\nLast update: {}",
                    render_table(&entries),
                    chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
                ));

                if let Progress::Finished { success } = evaluate(&entries, &self.expected) {
                    let status = if success { "SUCCEEDED" } else { "FAILED" };
                    info!("Run {} finished: {}", run_id, status);
                    echo(&format!(
                        "Pipeline finished in approx. {}s. Status: {}",
                        started.elapsed().as_secs(),
                        status
                    ));
                    return Ok(success);
                }
            } else {
                debug!("No execution of {} recorded yet", self.root_task_name);
            }

            tokio::time::sleep(self.poll_interval).await;
        }

        warn!("Timed out waiting for {}", self.root_task_name);
        echo(&format!("Pipeline timed out after {}s", timeout.as_secs()));
        Ok(false)
    }

    async fn latest_run_id(&self) -> Result<Option<String>> {
        let result = self
            .session
            .execute(&format!(
                "select name, run_id, scheduled_time, completed_time\n\
                 from table(information_schema.task_history())\n\
                 where scheduled_from = 'EXECUTE TASK' and name = {}\n\
                 order by scheduled_time desc\n\
                 limit 1;",
                quote(self.root_task_name)
            ))
            .await?;
        let Some(run_id) = result.get(0, "run_id") else {
            return Ok(None);
        };

        if let Some(fired_at) = self.fired_at {
            let threshold = fired_at - TimeDelta::seconds(CLOCK_SKEW_SECS);
            let scheduled = result.get(0, "scheduled_time").and_then(parse_timestamp);
            if !scheduled.is_some_and(|ts| ts >= threshold) {
                debug!("Execution {} of {} predates the fire time", run_id, self.root_task_name);
                return Ok(None);
            }
        }
        Ok(Some(run_id.to_string()))
    }

    async fn history(&self, run_id: &str) -> Result<Vec<TaskHistoryEntry>> {
        // Run ids are numeric; anything else is passed as a literal
        let run_id_literal = if !run_id.is_empty() && run_id.chars().all(|c| c.is_ascii_digit()) {
            run_id.to_string()
        } else {
            quote(run_id)
        };
        let result = self
            .session
            .execute(&format!(
                "select name, run_id, scheduled_time, completed_time, state, return_value\n\
                 from table(information_schema.task_history())\n\
                 where run_id = {}\n\
                 order by scheduled_time;",
                run_id_literal
            ))
            .await?;
        Ok(history_entries(&result))
    }
}

/// Read task history rows from a query result
pub fn history_entries(result: &QueryResult) -> Vec<TaskHistoryEntry> {
    (0..result.rows.len())
        .map(|row| {
            let text = |column: &str| result.get(row, column).map(str::to_string);
            TaskHistoryEntry {
                name: text("name").unwrap_or_default(),
                run_id: text("run_id").unwrap_or_default(),
                scheduled_time: text("scheduled_time"),
                completed_time: text("completed_time"),
                state: text("state")
                    .map(|s| s.parse().unwrap_or(TaskState::Other(s)))
                    .unwrap_or(TaskState::Other(String::new())),
                return_value: text("return_value"),
            }
        })
        .collect()
}

fn format_time(raw: Option<&str>) -> String {
    match raw {
        Some(raw) => parse_timestamp(raw)
            .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| raw.to_string()),
        None => String::new(),
    }
}

/// Render entries as a fixed-width table
pub fn render_table(entries: &[TaskHistoryEntry]) -> String {
    const HEADERS: [&str; 5] = ["NAME", "STATE", "SCHEDULED_TIME", "COMPLETED_TIME", "DURATION"];

    let rows: Vec<[String; 5]> = entries
        .iter()
        .map(|e| {
            let duration = e
                .return_value
                .as_deref()
                .and_then(ExecutionReport::from_return_value)
                .map(|r| format!("{:.1}s", r.total_time()))
                .unwrap_or_default();
            [
                e.name.clone(),
                e.state.to_string(),
                format_time(e.scheduled_time.as_deref()),
                format_time(e.completed_time.as_deref()),
                duration,
            ]
        })
        .collect();

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let separator = format!(
        "+{}+",
        widths
            .iter()
            .map(|w| "-".repeat(w + 2))
            .collect::<Vec<_>>()
            .join("+")
    );
    let line = |cells: &[String]| {
        let padded: Vec<String> = cells
            .iter()
            .zip(widths)
            .map(|(cell, w)| format!(" {:<w$} ", cell, w = w))
            .collect();
        format!("|{}|", padded.join("|"))
    };

    let mut out = vec![
        separator.clone(),
        line(&HEADERS.map(str::to_string)),
        separator.clone(),
    ];
    out.extend(rows.iter().map(|row| line(row)));
    out.push(separator);
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSession;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn entry(name: &str, state: TaskState, completed: bool) -> TaskHistoryEntry {
        TaskHistoryEntry {
            name: name.into(),
            run_id: "42".into(),
            scheduled_time: Some("1700000000.000".into()),
            completed_time: completed.then(|| "1700000060.000".to_string()),
            state,
            return_value: None,
        }
    }

    fn expected() -> Vec<String> {
        vec!["node1".into(), "ROOT".into()]
    }

    #[test]
    fn test_evaluate_running() {
        let entries = vec![
            entry("ROOT", TaskState::Succeeded, true),
            entry("NODE1", TaskState::Executing, false),
        ];
        assert_eq!(evaluate(&entries, &expected()), Progress::Running);
    }

    #[test]
    fn test_evaluate_waits_for_missing_tasks() {
        let entries = vec![entry("ROOT", TaskState::Succeeded, true)];
        assert_eq!(evaluate(&entries, &expected()), Progress::Running);
    }

    #[test]
    fn test_evaluate_success() {
        let entries = vec![
            entry("ROOT", TaskState::Succeeded, true),
            entry("NODE1", TaskState::Succeeded, true),
        ];
        assert_eq!(
            evaluate(&entries, &expected()),
            Progress::Finished { success: true }
        );
    }

    #[test]
    fn test_evaluate_failure_short_circuits() {
        let entries = vec![entry("ROOT", TaskState::Failed, true)];
        assert_eq!(
            evaluate(&entries, &expected()),
            Progress::Finished { success: false }
        );
    }

    #[test]
    fn test_evaluate_skipped_is_not_success() {
        let entries = vec![
            entry("ROOT", TaskState::Succeeded, true),
            entry("NODE1", TaskState::Skipped, true),
        ];
        assert_eq!(
            evaluate(&entries, &expected()),
            Progress::Finished { success: false }
        );
    }

    #[test]
    fn test_render_table() {
        let mut with_report = entry("NODE1", TaskState::Succeeded, true);
        with_report.return_value = Some(
            r#"{"environment":"local","run_id":"r","pipeline_name":"p","extract_time":1.0,"init_time":1.0,"run_time":0.5}"#
                .into(),
        );
        let table = render_table(&[entry("ROOT", TaskState::Succeeded, true), with_report]);

        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 6);
        assert!(lines[1].contains("NAME"));
        assert!(lines[3].contains("ROOT"));
        assert!(lines[4].contains("2.5s"));
        assert!(lines.iter().all(|l| l.len() == lines[0].len()));
    }

    fn history_result(rows: Vec<[Option<&str>; 6]>) -> QueryResult {
        QueryResult {
            columns: ["NAME", "RUN_ID", "SCHEDULED_TIME", "COMPLETED_TIME", "STATE", "RETURN_VALUE"]
                .map(String::from)
                .to_vec(),
            rows: rows
                .into_iter()
                .map(|r| r.map(|c| c.map(String::from)).to_vec())
                .collect(),
        }
    }

    fn run_id_result() -> QueryResult {
        QueryResult {
            columns: vec!["NAME".into(), "RUN_ID".into()],
            rows: vec![vec![Some("ROOT".into()), Some("1700".into())]],
        }
    }

    #[tokio::test]
    async fn test_wait_until_success() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let session = RecordingSession::with_responder(move |sql| {
            if sql.contains("EXECUTE TASK") {
                return Ok(run_id_result());
            }
            let done = counter.fetch_add(1, Ordering::SeqCst) >= 1;
            Ok(history_result(vec![
                [Some("ROOT"), Some("1700"), Some("1"), Some("2"), Some("SUCCEEDED"), Some("abc")],
                [
                    Some("node1"),
                    Some("1700"),
                    Some("2"),
                    done.then_some("3"),
                    Some(if done { "SUCCEEDED" } else { "EXECUTING" }),
                    None,
                ],
            ]))
        });

        let names = vec!["node1".to_string()];
        let mut echoed = Vec::new();
        let success = CompletionMonitor::new(&session, "ROOT", &names)
            .with_poll_interval(Duration::from_millis(5))
            .wait(Duration::from_secs(5), |s| echoed.push(s.to_string()))
            .await
            .unwrap();

        assert!(success);
        assert_eq!(polls.load(Ordering::SeqCst), 2);
        assert!(echoed.last().unwrap().contains("SUCCEEDED"));
        assert!(
            session
                .statements()
                .iter()
                .any(|s| s.contains("where run_id = 1700"))
        );
    }

    #[tokio::test]
    async fn test_wait_ignores_previous_execution() {
        let lookups = Arc::new(AtomicUsize::new(0));
        let counter = lookups.clone();
        let now = Utc::now().to_rfc3339();
        let session = RecordingSession::with_responder(move |sql| {
            if sql.contains("EXECUTE TASK") {
                // The new execution shows up on the third lookup
                let (run_id, scheduled) = if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    ("1600", "1600000000.000 1440")
                } else {
                    ("1700", now.as_str())
                };
                return Ok(QueryResult {
                    columns: vec!["NAME".into(), "RUN_ID".into(), "SCHEDULED_TIME".into()],
                    rows: vec![vec![
                        Some("ROOT".into()),
                        Some(run_id.into()),
                        Some(scheduled.into()),
                    ]],
                });
            }
            Ok(history_result(vec![
                [Some("ROOT"), Some("1700"), Some("1"), Some("2"), Some("SUCCEEDED"), None],
                [Some("node1"), Some("1700"), Some("2"), Some("3"), Some("SUCCEEDED"), None],
            ]))
        });

        let names = vec!["node1".to_string()];
        let success = CompletionMonitor::new(&session, "ROOT", &names)
            .with_poll_interval(Duration::from_millis(5))
            .fired_at(Utc::now())
            .wait(Duration::from_secs(5), |_| {})
            .await
            .unwrap();

        assert!(success);
        assert_eq!(lookups.load(Ordering::SeqCst), 3);
        let statements = session.statements();
        assert!(!statements.iter().any(|s| s.contains("where run_id = 1600")));
        assert!(statements.iter().any(|s| s.contains("where run_id = 1700")));
    }

    #[tokio::test]
    async fn test_wait_reports_failure() {
        let session = RecordingSession::with_responder(|sql| {
            if sql.contains("EXECUTE TASK") {
                return Ok(run_id_result());
            }
            Ok(history_result(vec![
                [Some("ROOT"), Some("1700"), Some("1"), Some("2"), Some("SUCCEEDED"), None],
                [Some("node1"), Some("1700"), Some("2"), Some("3"), Some("FAILED"), None],
            ]))
        });

        let names = vec!["node1".to_string(), "node2".to_string()];
        let success = CompletionMonitor::new(&session, "ROOT", &names)
            .with_poll_interval(Duration::from_millis(5))
            .wait(Duration::from_secs(5), |_| {})
            .await
            .unwrap();
        assert!(!success);
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let session = RecordingSession::with_responder(|sql| {
            if sql.contains("EXECUTE TASK") {
                return Ok(run_id_result());
            }
            Ok(history_result(vec![[
                Some("ROOT"),
                Some("1700"),
                Some("1"),
                None,
                Some("EXECUTING"),
                None,
            ]]))
        });

        let names = vec!["node1".to_string()];
        let mut echoed = Vec::new();
        let success = CompletionMonitor::new(&session, "ROOT", &names)
            .with_poll_interval(Duration::from_millis(5))
            .wait(Duration::from_millis(40), |s| echoed.push(s.to_string()))
            .await
            .unwrap();

        assert!(!success);
        assert!(echoed.last().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_wait_for_first_execution_record() {
        let session = RecordingSession::with_responder(|_| Ok(QueryResult::default()));
        let names = vec!["node1".to_string()];
        let success = CompletionMonitor::new(&session, "ROOT", &names)
            .with_poll_interval(Duration::from_millis(5))
            .wait(Duration::from_millis(20), |_| {})
            .await
            .unwrap();

        assert!(!success);
        assert!(
            session
                .statements()
                .iter()
                .all(|s| s.contains("EXECUTE TASK"))
        );
    }
}
