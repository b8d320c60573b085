//! Change events delivered to watchers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Task, TaskStatus};

/// What kind of mutation produced a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// Task was inserted.
    Created,
    /// Task fields or status changed.
    Updated,
    /// Task row was removed.
    Deleted,
    /// Synthetic snapshot emitted at watch-stream start.
    Initial,
}

impl ChangeType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeType::Created => "created",
            ChangeType::Updated => "updated",
            ChangeType::Deleted => "deleted",
            ChangeType::Initial => "initial",
        }
    }
}

/// One observed task mutation, carrying a full post-mutation snapshot so
/// subscribers never need a read-back.
#[derive(Debug, Clone)]
pub struct TaskChangeEvent {
    pub task_id: String,
    pub task: Task,
    pub from_status: TaskStatus,
    pub to_status: TaskStatus,
    pub changed_at: DateTime<Utc>,
    pub change_type: ChangeType,
}

impl TaskChangeEvent {
    pub fn new(
        task: Task,
        from_status: TaskStatus,
        to_status: TaskStatus,
        change_type: ChangeType,
    ) -> Self {
        Self {
            task_id: task.id.clone(),
            task,
            from_status,
            to_status,
            changed_at: Utc::now(),
            change_type,
        }
    }
}
