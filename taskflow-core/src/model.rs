//! Task and task-event entities.
//!
//! `TaskStatus` and `TaskPriority` are carried on the wire as stable small
//! integers; unknown integers decode to `Unspecified` rather than failing,
//! so old clients never break deserialization.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a task. Wire encoding: 0..=6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum TaskStatus {
    Unspecified,
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Timeout,
}

impl TaskStatus {
    /// Upper-case mnemonic used in log lines and error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Succeeded => "SUCCEEDED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
            TaskStatus::Timeout => "TIMEOUT",
            TaskStatus::Unspecified => "UNSPECIFIED",
        }
    }
}

impl From<i32> for TaskStatus {
    fn from(v: i32) -> Self {
        match v {
            1 => TaskStatus::Pending,
            2 => TaskStatus::Running,
            3 => TaskStatus::Succeeded,
            4 => TaskStatus::Failed,
            5 => TaskStatus::Cancelled,
            6 => TaskStatus::Timeout,
            _ => TaskStatus::Unspecified,
        }
    }
}

impl From<TaskStatus> for i32 {
    fn from(s: TaskStatus) -> i32 {
        match s {
            TaskStatus::Unspecified => 0,
            TaskStatus::Pending => 1,
            TaskStatus::Running => 2,
            TaskStatus::Succeeded => 3,
            TaskStatus::Failed => 4,
            TaskStatus::Cancelled => 5,
            TaskStatus::Timeout => 6,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling priority. Wire encoding: 0..=4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum TaskPriority {
    Unspecified,
    Low,
    Normal,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskPriority::Low => "LOW",
            TaskPriority::Normal => "NORMAL",
            TaskPriority::High => "HIGH",
            TaskPriority::Urgent => "URGENT",
            TaskPriority::Unspecified => "UNSPECIFIED",
        }
    }
}

impl From<i32> for TaskPriority {
    fn from(v: i32) -> Self {
        match v {
            1 => TaskPriority::Low,
            2 => TaskPriority::Normal,
            3 => TaskPriority::High,
            4 => TaskPriority::Urgent,
            _ => TaskPriority::Unspecified,
        }
    }
}

impl From<TaskPriority> for i32 {
    fn from(p: TaskPriority) -> i32 {
        match p {
            TaskPriority::Unspecified => 0,
            TaskPriority::Low => 1,
            TaskPriority::Normal => 2,
            TaskPriority::High => 3,
            TaskPriority::Urgent => 4,
        }
    }
}

/// A tracked unit of work with a declared status lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub task_type: String,
    pub input_params: HashMap<String, String>,
    pub output_result: HashMap<String, String>,
    pub dependencies: Vec<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub error_message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_by: String,
    /// Status-transition log, loaded on demand by the store.
    pub events: Vec<TaskEvent>,
}

/// An immutable record of one status transition.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskEvent {
    pub id: String,
    pub task_id: String,
    pub from_status: TaskStatus,
    pub to_status: TaskStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub operator: String,
}

impl Task {
    /// Build a fresh task in `Pending` state. The caller assigns the id.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        priority: TaskPriority,
        task_type: impl Into<String>,
        input_params: HashMap<String, String>,
        dependencies: Vec<String>,
        max_retries: i32,
        created_by: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            name: name.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            priority,
            task_type: task_type.into(),
            input_params,
            output_result: HashMap::new(),
            dependencies,
            retry_count: 0,
            max_retries,
            error_message: String::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            created_by: created_by.into(),
            events: Vec::new(),
        }
    }

    /// A failed task may be retried while its retry budget lasts.
    pub fn can_retry(&self) -> bool {
        self.status == TaskStatus::Failed && self.retry_count < self.max_retries
    }

    /// Stamp the task as running; records `started_at`.
    pub fn mark_running(&mut self) {
        let now = Utc::now();
        self.status = TaskStatus::Running;
        self.started_at = Some(now);
        self.updated_at = now;
    }

    /// Stamp the task as succeeded; records `completed_at`.
    pub fn mark_completed(&mut self) {
        let now = Utc::now();
        self.status = TaskStatus::Succeeded;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// Stamp the task as failed and consume one retry.
    pub fn mark_failed(&mut self, error_message: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.error_message = error_message.into();
        self.retry_count += 1;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn new_task_starts_pending() {
        let t = Task::new("t", "", TaskPriority::Normal, "", HashMap::new(), vec![], 3, "me");
        assert_eq!(t.status, TaskStatus::Pending);
        assert_eq!(t.retry_count, 0);
        assert!(t.started_at.is_none());
        assert_eq!(t.created_at, t.updated_at);
    }

    #[test]
    fn mark_running_sets_started_at() {
        let mut t = Task::new("t", "", TaskPriority::Normal, "", HashMap::new(), vec![], 0, "");
        t.mark_running();
        assert_eq!(t.status, TaskStatus::Running);
        assert!(t.started_at.is_some());
        assert!(t.updated_at >= t.created_at);
    }

    #[test]
    fn mark_failed_consumes_retry() {
        let mut t = Task::new("t", "", TaskPriority::Normal, "", HashMap::new(), vec![], 2, "");
        t.mark_running();
        t.mark_failed("boom");
        assert_eq!(t.status, TaskStatus::Failed);
        assert_eq!(t.retry_count, 1);
        assert_eq!(t.error_message, "boom");
        assert!(t.can_retry());
        t.mark_failed("boom again");
        assert!(!t.can_retry(), "retry budget exhausted");
    }

    #[test]
    fn status_round_trips_through_i32() {
        for v in 0..=6 {
            let s = TaskStatus::from(v);
            assert_eq!(i32::from(s), v);
        }
        assert_eq!(TaskStatus::from(42), TaskStatus::Unspecified);
    }

    #[test]
    fn priority_round_trips_through_i32() {
        for v in 0..=4 {
            let p = TaskPriority::from(v);
            assert_eq!(i32::from(p), v);
        }
        assert_eq!(TaskPriority::from(-1), TaskPriority::Unspecified);
    }
}
