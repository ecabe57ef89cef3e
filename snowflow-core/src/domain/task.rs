//! Task history domain types
//!
//! Rows of `information_schema.task_history()` as read back by the
//! completion monitor.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// State of a single task run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Scheduled,
    Executing,
    Succeeded,
    Failed,
    Cancelled,
    Skipped,
    Other(String),
}

impl TaskState {
    /// Whether the task will not change state anymore
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled | TaskState::Skipped
        )
    }
}

impl FromStr for TaskState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_uppercase().as_str() {
            "SCHEDULED" => TaskState::Scheduled,
            "EXECUTING" => TaskState::Executing,
            "SUCCEEDED" => TaskState::Succeeded,
            "FAILED" | "FAILED_AND_AUTO_SUSPENDED" => TaskState::Failed,
            "CANCELLED" => TaskState::Cancelled,
            "SKIPPED" => TaskState::Skipped,
            other => TaskState::Other(other.to_string()),
        })
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Scheduled => write!(f, "SCHEDULED"),
            TaskState::Executing => write!(f, "EXECUTING"),
            TaskState::Succeeded => write!(f, "SUCCEEDED"),
            TaskState::Failed => write!(f, "FAILED"),
            TaskState::Cancelled => write!(f, "CANCELLED"),
            TaskState::Skipped => write!(f, "SKIPPED"),
            TaskState::Other(s) => write!(f, "{}", s),
        }
    }
}

/// One row of task history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHistoryEntry {
    pub name: String,
    pub run_id: String,
    /// Raw timestamp as returned by the warehouse
    pub scheduled_time: Option<String>,
    /// Raw timestamp, `None` while the task has not completed
    pub completed_time: Option<String>,
    pub state: TaskState,
    pub return_value: Option<String>,
}

impl TaskHistoryEntry {
    pub fn is_completed(&self) -> bool {
        self.completed_time.is_some()
    }
}

/// Parse a warehouse timestamp
///
/// Accepts epoch seconds with an optional fraction (`1700000000.123000000`,
/// optionally followed by a timezone offset in minutes) and RFC 3339.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    let epoch = raw.split_whitespace().next()?;
    let (secs, frac) = epoch.split_once('.').unwrap_or((epoch, "0"));
    let secs: i64 = secs.parse().ok()?;
    let nanos: u32 = format!("{:0<9}", frac).get(..9)?.parse().ok()?;
    Utc.timestamp_opt(secs, nanos).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_parsing() {
        assert_eq!("succeeded".parse::<TaskState>().unwrap(), TaskState::Succeeded);
        assert_eq!("FAILED".parse::<TaskState>().unwrap(), TaskState::Failed);
        assert_eq!(
            "WEIRD".parse::<TaskState>().unwrap(),
            TaskState::Other("WEIRD".into())
        );
        assert!(TaskState::Skipped.is_terminal());
        assert!(!TaskState::Executing.is_terminal());
    }

    #[test]
    fn test_parse_epoch_timestamp() {
        let ts = parse_timestamp("1700000000.500000000 1440").unwrap();
        assert_eq!(ts.timestamp(), 1_700_000_000);
        assert_eq!(ts.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn test_parse_rfc3339_timestamp() {
        let ts = parse_timestamp("2024-01-02T03:04:05Z").unwrap();
        assert_eq!(ts.timestamp(), 1_704_164_645);
    }

    #[test]
    fn test_parse_garbage_timestamp() {
        assert!(parse_timestamp("yesterday").is_none());
    }
}
