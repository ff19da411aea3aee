use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a crawl task in the queue.
///
/// Transitions only `pending -> running -> {done, failed}`. Re-queueing a
/// failed task is left to whoever owns the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "done" => Ok(TaskStatus::Done),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(format!("Unknown task status: {}", s)),
        }
    }
}

/// What a task points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TaskTarget {
    Url(String),
    Login(String),
    ProfileId(String),
}

impl TaskTarget {
    /// Column name used when the target is persisted.
    pub fn kind(&self) -> &'static str {
        match self {
            TaskTarget::Url(_) => "url",
            TaskTarget::Login(_) => "login",
            TaskTarget::ProfileId(_) => "profile_id",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            TaskTarget::Url(v) | TaskTarget::Login(v) | TaskTarget::ProfileId(v) => v,
        }
    }

    /// Rebuilds a target from its persisted `(kind, value)` pair.
    pub fn from_parts(kind: &str, value: impl Into<String>) -> Result<Self, String> {
        let value = value.into();
        match kind {
            "url" => Ok(TaskTarget::Url(value)),
            "login" => Ok(TaskTarget::Login(value)),
            "profile_id" => Ok(TaskTarget::ProfileId(value)),
            _ => Err(format!("Unknown target kind: {}", kind)),
        }
    }
}

impl fmt::Display for TaskTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// A unit of crawl work owned by a single source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlTask {
    pub id: i64,
    pub source: String,
    pub task_type: String,
    pub target: TaskTarget,
    pub status: TaskStatus,
    pub priority: i32,
    pub retries: u32,
    pub batch_id: Option<String>,
    pub depth: u32,
    /// Entity the task belongs to; crawl logs get linked to it.
    pub candidate_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Request to enqueue a new crawl task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub source: String,
    pub task_type: String,
    pub target: TaskTarget,
    pub priority: i32,
    pub depth: u32,
    pub batch_id: Option<String>,
    pub candidate_id: Option<i64>,
}

impl NewTask {
    pub fn new(source: impl Into<String>, task_type: impl Into<String>, target: TaskTarget) -> Self {
        Self {
            source: source.into(),
            task_type: task_type.into(),
            target,
            priority: 0,
            depth: 0,
            batch_id: None,
            candidate_id: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_batch_id(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    pub fn with_candidate_id(mut self, candidate_id: i64) -> Self {
        self.candidate_id = Some(candidate_id);
        self
    }
}

/// Result of handling one task. Exactly three shapes; `Skip` is a
/// successful no-op (already crawled, duplicate, nothing at the target).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TaskOutcome {
    Success {
        message: String,
    },
    Skip {
        message: String,
    },
    Fail {
        message: String,
        error: Option<String>,
    },
}

impl TaskOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        TaskOutcome::Success {
            message: message.into(),
        }
    }

    pub fn skip(message: impl Into<String>) -> Self {
        TaskOutcome::Skip {
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>, error: Option<String>) -> Self {
        TaskOutcome::Fail {
            message: message.into(),
            error,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            TaskOutcome::Success { message }
            | TaskOutcome::Skip { message }
            | TaskOutcome::Fail { message, .. } => message,
        }
    }

    pub fn log_status(&self) -> LogStatus {
        match self {
            TaskOutcome::Success { .. } => LogStatus::Success,
            TaskOutcome::Skip { .. } => LogStatus::Skip,
            TaskOutcome::Fail { .. } => LogStatus::Fail,
        }
    }

    /// Task status the runner persists for this outcome.
    pub fn task_status(&self) -> TaskStatus {
        match self {
            TaskOutcome::Success { .. } | TaskOutcome::Skip { .. } => TaskStatus::Done,
            TaskOutcome::Fail { .. } => TaskStatus::Failed,
        }
    }
}

/// Status recorded on a crawl-log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Success,
    Skip,
    Fail,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Success => "success",
            LogStatus::Skip => "skip",
            LogStatus::Fail => "fail",
        }
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LogStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "success" => Ok(LogStatus::Success),
            "skip" => Ok(LogStatus::Skip),
            "fail" => Ok(LogStatus::Fail),
            _ => Err(format!("Unknown log status: {}", s)),
        }
    }
}

/// One audit row per processed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCrawlLog {
    pub task_id: i64,
    pub source: String,
    pub task_type: String,
    pub target: String,
    pub status: LogStatus,
    pub message: String,
    pub trace_id: String,
}

/// Selection of pending tasks for one runner page.
#[derive(Debug, Clone, Default)]
pub struct PendingQuery {
    pub source: String,
    pub task_types: Option<Vec<String>>,
    /// Ids rejected earlier in the round by a caller predicate.
    pub exclude_ids: Vec<i64>,
    pub limit: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Done,
            TaskStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("completed".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Done.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    #[test]
    fn test_target_from_parts() {
        let target = TaskTarget::from_parts("login", "octocat").unwrap();
        assert_eq!(target, TaskTarget::Login("octocat".into()));
        assert_eq!(target.kind(), "login");
        assert_eq!(target.value(), "octocat");
        assert!(TaskTarget::from_parts("email", "x").is_err());
    }

    #[test]
    fn test_skip_is_done_not_failed() {
        assert_eq!(TaskOutcome::skip("dup").task_status(), TaskStatus::Done);
        assert_eq!(TaskOutcome::skip("dup").log_status(), LogStatus::Skip);
        assert_eq!(
            TaskOutcome::fail("boom", None).task_status(),
            TaskStatus::Failed
        );
    }

    #[test]
    fn test_new_task_builder() {
        let task = NewTask::new("github", "profile", TaskTarget::Login("octocat".into()))
            .with_priority(5)
            .with_depth(1)
            .with_batch_id("b-1")
            .with_candidate_id(42);
        assert_eq!(task.priority, 5);
        assert_eq!(task.depth, 1);
        assert_eq!(task.batch_id.as_deref(), Some("b-1"));
        assert_eq!(task.candidate_id, Some(42));
    }
}
