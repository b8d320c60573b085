//! Task API wire types.
//!
//! Statuses and priorities travel as stable small integers; timestamps as
//! Unix seconds. Enum-ish integers are kept as raw `i32` here and converted
//! at the service edge so unknown values fail validation, not parsing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use taskflow_core::{Task, TaskChangeEvent, TaskEvent};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateTaskRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Priority code 0..=4; 0 means unspecified.
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub task_type: String,
    #[serde(default)]
    pub input_params: HashMap<String, String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub max_retries: i32,
    #[serde(default)]
    pub created_by: String,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct GetTaskQuery {
    /// Attach the status-transition log to the response.
    #[serde(default)]
    pub include_events: bool,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct ListTasksQuery {
    /// Zero-based page index.
    #[serde(default)]
    pub page: i64,
    /// Page size, clamped to [1, 100]; 0 selects the default of 20.
    #[serde(default)]
    pub page_size: i64,
    /// Substring match over name and description.
    pub keyword: Option<String>,
    pub task_type: Option<String>,
    /// Comma-separated status codes; only the first entry filters.
    pub status_filter: Option<String>,
    /// Priority code; 0 means no priority filter.
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UpdateTaskRequest {
    /// Task id; on the unary route the path id wins when this is empty.
    #[serde(default)]
    pub id: String,
    /// Target status code; 0 leaves the status untouched.
    #[serde(default)]
    pub status: i32,
    pub output_result: Option<HashMap<String, String>>,
    #[serde(default)]
    pub error_message: String,
    /// New retry count; 0 leaves the stored value untouched.
    #[serde(default)]
    pub retry_count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TaskView {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: i32,
    pub priority: i32,
    pub task_type: String,
    pub input_params: HashMap<String, String>,
    pub output_result: HashMap<String, String>,
    pub dependencies: Vec<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub error_message: String,
    /// Unix seconds.
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    pub created_by: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<TaskEventView>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TaskEventView {
    pub id: String,
    pub task_id: String,
    pub from_status: i32,
    pub to_status: i32,
    pub message: String,
    /// Unix seconds.
    pub timestamp: i64,
    pub operator: String,
}

impl TaskView {
    pub fn from_task(task: &Task, include_events: bool) -> Self {
        Self {
            id: task.id.clone(),
            name: task.name.clone(),
            description: task.description.clone(),
            status: task.status.into(),
            priority: task.priority.into(),
            task_type: task.task_type.clone(),
            input_params: task.input_params.clone(),
            output_result: task.output_result.clone(),
            dependencies: task.dependencies.clone(),
            retry_count: task.retry_count,
            max_retries: task.max_retries,
            error_message: task.error_message.clone(),
            created_at: task.created_at.timestamp(),
            updated_at: task.updated_at.timestamp(),
            started_at: task.started_at.map(|t| t.timestamp()),
            completed_at: task.completed_at.map(|t| t.timestamp()),
            created_by: task.created_by.clone(),
            events: if include_events {
                task.events.iter().map(TaskEventView::from_event).collect()
            } else {
                Vec::new()
            },
        }
    }
}

impl TaskEventView {
    pub fn from_event(event: &TaskEvent) -> Self {
        Self {
            id: event.id.clone(),
            task_id: event.task_id.clone(),
            from_status: event.from_status.into(),
            to_status: event.to_status.into(),
            message: event.message.clone(),
            timestamp: event.timestamp.timestamp(),
            operator: event.operator.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ListTasksResponse {
    pub tasks: Vec<TaskView>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DeleteTaskResponse {
    pub success: bool,
    pub id: String,
}

/// Aggregate reply to a batch-create stream. `tasks` is index-aligned with
/// the submitted requests (null for failures); `errors` lists the failure
/// messages in submission order.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BatchCreateTasksResponse {
    pub tasks: Vec<Option<TaskView>>,
    pub success_count: i32,
    pub failed_count: i32,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct WatchQuery {
    /// Comma-separated task ids; empty watches every task.
    pub task_ids: Option<String>,
    /// Emit one synthetic `"initial"` event per matching task on connect.
    #[serde(default)]
    pub include_initial: bool,
    /// Comma-separated status codes; when set, only events whose target
    /// status is listed are delivered.
    pub status_filter: Option<String>,
}

impl WatchQuery {
    pub fn task_ids(&self) -> Vec<String> {
        split_csv(self.task_ids.as_deref())
    }

    pub fn status_filter(&self) -> Vec<i32> {
        split_csv(self.status_filter.as_deref())
            .into_iter()
            .filter_map(|s| s.parse().ok())
            .collect()
    }
}

impl ListTasksQuery {
    /// First status code in `status_filter`, if any.
    pub fn first_status(&self) -> Option<i32> {
        split_csv(self.status_filter.as_deref())
            .first()
            .and_then(|s| s.parse().ok())
    }

    /// Page size after clamping: [1, 100], defaulting to 20.
    pub fn normalized_page_size(&self) -> i64 {
        if self.page_size <= 0 {
            20
        } else {
            self.page_size.min(100)
        }
    }
}

fn split_csv(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_owned)
            .collect()
    })
    .unwrap_or_default()
}

/// One observed mutation, as delivered to watch and update streams.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TaskChangeEventView {
    pub task_id: String,
    pub task: TaskView,
    pub from_status: i32,
    pub to_status: i32,
    /// Unix seconds.
    pub changed_at: i64,
    pub change_type: String,
}

impl TaskChangeEventView {
    pub fn from_event(event: &TaskChangeEvent) -> Self {
        Self {
            task_id: event.task_id.clone(),
            task: TaskView::from_task(&event.task, false),
            from_status: event.from_status.into(),
            to_status: event.to_status.into(),
            changed_at: event.changed_at.timestamp(),
            change_type: event.change_type.as_str().to_owned(),
        }
    }
}

/// Client command on the bidirectional update stream.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct TaskUpdateRequest {
    #[serde(default)]
    pub request_id: String,
    /// `"create"` or `"update"`; anything else earns an error reply.
    #[serde(default)]
    pub update_type: String,
    pub create: Option<CreateTaskRequest>,
    pub update: Option<UpdateTaskRequest>,
}

/// Server message on the bidirectional update stream: either the reply to a
/// command (`request_id` echoes the command) or a pushed `change_event`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TaskUpdateResponse {
    #[serde(default)]
    pub request_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_event: Option<TaskChangeEventView>,
}

impl TaskUpdateResponse {
    pub fn reply_ok(request_id: impl Into<String>, task: TaskView) -> Self {
        Self {
            request_id: request_id.into(),
            success: true,
            task: Some(task),
            error: None,
            change_event: None,
        }
    }

    pub fn reply_err(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            success: false,
            task: None,
            error: Some(error.into()),
            change_event: None,
        }
    }

    pub fn pushed(event: TaskChangeEventView) -> Self {
        Self {
            request_id: String::new(),
            success: true,
            task: None,
            error: None,
            change_event: Some(event),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn csv_parsing() {
        let q = WatchQuery {
            task_ids: Some("a, b,,c".to_owned()),
            include_initial: false,
            status_filter: Some("2,3,nope".to_owned()),
        };
        assert_eq!(q.task_ids(), vec!["a", "b", "c"]);
        assert_eq!(q.status_filter(), vec![2, 3]);

        assert!(WatchQuery::default().task_ids().is_empty());
    }

    #[test]
    fn update_request_defaults() {
        let req: UpdateTaskRequest = serde_json::from_str(r#"{"id":"x"}"#).unwrap();
        assert_eq!(req.status, 0);
        assert!(req.output_result.is_none());
        assert_eq!(req.retry_count, 0);
    }

    #[test]
    fn optional_timestamps_are_omitted() {
        let task = Task::new(
            "t",
            "",
            taskflow_core::TaskPriority::Normal,
            "",
            HashMap::new(),
            vec![],
            0,
            "",
        );
        let json = serde_json::to_value(TaskView::from_task(&task, false)).unwrap();
        assert!(json.get("started_at").is_none());
        assert!(json.get("completed_at").is_none());
        assert!(json.get("events").is_none());
    }
}
