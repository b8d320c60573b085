//! Task service: request validation, the status state machine, persistence
//! and change-event publication, in that order.
//!
//! Every mutation publishes a change event *after* the database commit, so
//! watchers only ever observe durable state. The compare-and-set transition
//! lives in the store; the service's transition check is advisory and the
//! store re-verifies atomically, which closes the check-then-act race
//! between concurrent updaters.

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use taskflow_core::{
    is_valid_transition, ChangeType, EventBus, Task, TaskChangeEvent, TaskError, TaskPriority,
    TaskStatus,
};

use crate::db::{TaskFilter, TaskStore};
use crate::metrics::{self, Metrics};
use crate::schemas::{CreateTaskRequest, ListTasksQuery, UpdateTaskRequest};

/// Operator recorded on service-driven transition events.
const SYSTEM_OPERATOR: &str = "system";

#[derive(Clone)]
pub struct TaskService<S> {
    store: S,
    bus: EventBus,
}

impl<S: TaskStore> TaskService<S> {
    pub fn new(store: S, bus: EventBus) -> Self {
        Self { store, bus }
    }

    /// The bus carrying this service's change events; streaming endpoints
    /// subscribe here.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Validate and persist a new task; publishes a `"created"` event.
    pub async fn create_task(&self, req: CreateTaskRequest) -> Result<Task, TaskError> {
        if req.name.is_empty() {
            return Err(TaskError::invalid_param("name is required"));
        }

        let mut task = Task::new(
            req.name,
            req.description,
            TaskPriority::from(req.priority),
            req.task_type,
            req.input_params,
            req.dependencies,
            req.max_retries,
            req.created_by,
        );
        task.id = Uuid::new_v4().to_string();

        self.store.create(&task).await.map_err(TaskError::from)?;
        Metrics::inc(&metrics::global().tasks_created);
        info!(task_id = %task.id, name = %task.name, "task created");

        self.publish(task.clone(), TaskStatus::Unspecified, TaskStatus::Pending, ChangeType::Created);
        Ok(task)
    }

    /// Fetch a task with its event log attached.
    pub async fn get_task(&self, id: &str) -> Result<Task, TaskError> {
        if id.is_empty() {
            return Err(TaskError::invalid_param("id is required"));
        }
        self.store
            .get_by_id(id)
            .await
            .map_err(TaskError::from)?
            .ok_or_else(TaskError::task_not_found)
    }

    /// One page of tasks plus the total under the same filter.
    pub async fn list_tasks(&self, q: &ListTasksQuery) -> Result<(Vec<Task>, i64), TaskError> {
        let filter = TaskFilter {
            status: q
                .first_status()
                .map(TaskStatus::from)
                .filter(|s| *s != TaskStatus::Unspecified),
            priority: (q.priority != 0).then(|| TaskPriority::from(q.priority)),
            task_type: q.task_type.clone().filter(|t| !t.is_empty()),
            created_by: None,
            keyword: q.keyword.clone().filter(|k| !k.is_empty()),
            page_size: q.page_size,
            page_index: q.page.max(0),
        };
        self.store
            .list_by_filter(&filter)
            .await
            .map_err(TaskError::from)
    }

    /// Apply a status transition and/or field updates; publishes an
    /// `"updated"` event on success.
    ///
    /// A non-zero `status` is checked against the state machine, then applied
    /// through the store's compare-and-set (which also appends the transition
    /// event). Output/error/retry fields are applied afterwards and never
    /// change status.
    pub async fn update_task(&self, req: UpdateTaskRequest) -> Result<Task, TaskError> {
        if req.id.is_empty() {
            return Err(TaskError::invalid_param("id is required"));
        }

        let mut task = self.get_task(&req.id).await?;
        let old_status = task.status;

        if req.status != 0 {
            let new_status = TaskStatus::from(req.status);
            if !is_valid_transition(old_status, new_status) {
                return Err(TaskError::invalid_state(format!(
                    "invalid status transition from {old_status} to {new_status}"
                )));
            }

            self.store
                .update_status_with_event(
                    &task.id,
                    old_status,
                    new_status,
                    SYSTEM_OPERATOR,
                    "status updated",
                )
                .await
                .map_err(TaskError::from)?;

            match new_status {
                TaskStatus::Running => task.mark_running(),
                TaskStatus::Succeeded => {
                    task.mark_completed();
                    Metrics::inc(&metrics::global().tasks_succeeded);
                }
                TaskStatus::Failed => {
                    task.mark_failed(req.error_message.clone());
                    Metrics::inc(&metrics::global().tasks_failed);
                }
                other => {
                    task.status = other;
                    task.updated_at = Utc::now();
                }
            }
            Metrics::inc(&metrics::global().tasks_updated);
            debug!(task_id = %task.id, from = %old_status, to = %new_status, "status transition applied");
        }

        if let Some(output) = req.output_result {
            task.output_result = output;
        }
        if !req.error_message.is_empty() {
            task.error_message = req.error_message;
        }
        if req.retry_count != 0 {
            task.retry_count = req.retry_count;
        }
        task.updated_at = Utc::now();

        self.store.update(&task).await.map_err(TaskError::from)?;
        // Re-read the log so the returned task carries the new transition.
        task.events = self
            .store
            .events_by_task_id(&task.id)
            .await
            .map_err(TaskError::from)?;

        self.publish(task.clone(), old_status, task.status, ChangeType::Updated);
        Ok(task)
    }

    /// Delete a task (events cascade); publishes a `"deleted"` event carrying
    /// the final snapshot.
    pub async fn delete_task(&self, id: &str) -> Result<Task, TaskError> {
        let task = self.get_task(id).await?;
        self.store.delete(id).await.map_err(TaskError::from)?;
        Metrics::inc(&metrics::global().tasks_deleted);
        info!(task_id = %id, "task deleted");

        self.publish(task.clone(), task.status, task.status, ChangeType::Deleted);
        Ok(task)
    }

    fn publish(&self, task: Task, from: TaskStatus, to: TaskStatus, change_type: ChangeType) {
        Metrics::inc(&metrics::global().events_published);
        self.bus
            .publish(TaskChangeEvent::new(task, from, to, change_type));
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::*;
    use crate::db::SqliteStore;
    use taskflow_core::{ErrorCode, GLOBAL_KEY};

    async fn service() -> TaskService<SqliteStore> {
        let store = SqliteStore::connect_in_memory().await.expect("db");
        TaskService::new(store, EventBus::start())
    }

    fn create_req(name: &str) -> CreateTaskRequest {
        CreateTaskRequest {
            name: name.to_owned(),
            description: String::new(),
            priority: 2,
            task_type: "test".to_owned(),
            input_params: HashMap::new(),
            dependencies: Vec::new(),
            max_retries: 3,
            created_by: "tester".to_owned(),
        }
    }

    fn status_update(id: &str, status: i32) -> UpdateTaskRequest {
        UpdateTaskRequest {
            id: id.to_owned(),
            status,
            ..UpdateTaskRequest::default()
        }
    }

    #[tokio::test]
    async fn happy_path_pending_running_succeeded() {
        let svc = service().await;

        let task = svc.create_task(create_req("t1")).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 0);

        let task = svc.update_task(status_update(&task.id, 2)).await.unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert!(task.started_at.is_some(), "mark_running stamps started_at");

        let task = svc
            .update_task(UpdateTaskRequest {
                id: task.id.clone(),
                status: 3,
                output_result: Some(HashMap::from([("result".to_owned(), "ok".to_owned())])),
                ..UpdateTaskRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Succeeded);
        assert!(task.completed_at.is_some());
        assert_eq!(task.output_result.get("result").map(String::as_str), Some("ok"));

        let transitions: Vec<(TaskStatus, TaskStatus)> = task
            .events
            .iter()
            .map(|e| (e.from_status, e.to_status))
            .collect();
        assert_eq!(
            transitions,
            vec![
                (TaskStatus::Pending, TaskStatus::Running),
                (TaskStatus::Running, TaskStatus::Succeeded),
            ]
        );
    }

    #[tokio::test]
    async fn illegal_transition_names_both_statuses() {
        let svc = service().await;
        let task = svc.create_task(create_req("t1")).await.unwrap();
        svc.update_task(status_update(&task.id, 2)).await.unwrap();
        svc.update_task(status_update(&task.id, 3)).await.unwrap();

        let err = svc.update_task(status_update(&task.id, 2)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidState);
        assert_eq!(err.code.code(), 1006);
        assert!(err.message.contains("SUCCEEDED"), "message: {}", err.message);
        assert!(err.message.contains("RUNNING"), "message: {}", err.message);
    }

    #[tokio::test]
    async fn every_terminal_status_is_frozen() {
        let svc = service().await;
        for terminal in [3, 4, 5, 6] {
            let task = svc.create_task(create_req("t")).await.unwrap();
            svc.update_task(status_update(&task.id, 2)).await.unwrap();
            svc.update_task(status_update(&task.id, terminal)).await.unwrap();

            for target in [2, 3, 4, 5, 6] {
                let err = svc
                    .update_task(status_update(&task.id, target))
                    .await
                    .unwrap_err();
                assert_eq!(err.code, ErrorCode::InvalidState);
            }
        }
    }

    #[tokio::test]
    async fn empty_name_is_invalid_param() {
        let svc = service().await;
        let err = svc.create_task(create_req("")).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParam);
        assert_eq!(err.code.code(), 1001);
        assert_eq!(err.message, "name is required");
    }

    #[tokio::test]
    async fn get_unknown_task_is_not_found() {
        let svc = service().await;
        let err = svc.get_task("missing").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::TaskNotFound);
        let err = svc.get_task("").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParam);
    }

    #[tokio::test]
    async fn repeated_status_update_is_an_error_not_a_noop() {
        let svc = service().await;
        let task = svc.create_task(create_req("t")).await.unwrap();
        svc.update_task(status_update(&task.id, 2)).await.unwrap();

        let err = svc.update_task(status_update(&task.id, 2)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidState);
    }

    #[tokio::test]
    async fn racing_updates_from_same_source_yield_one_winner() {
        let svc = service().await;
        let task = svc.create_task(create_req("contended")).await.unwrap();

        // Both drive PENDING -> RUNNING. Whichever loses the compare-and-set
        // (or re-reads RUNNING and trips the state machine) gets InvalidState.
        let (a, b) = tokio::join!(
            svc.update_task(status_update(&task.id, 2)),
            svc.update_task(status_update(&task.id, 2)),
        );
        let successes = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(successes, 1, "exactly one concurrent transition wins");

        let loser = if a.is_err() { a.unwrap_err() } else { b.unwrap_err() };
        assert_eq!(loser.code, ErrorCode::InvalidState);
    }

    #[tokio::test]
    async fn failed_transition_consumes_retry_and_records_message() {
        let svc = service().await;
        let task = svc.create_task(create_req("t")).await.unwrap();
        svc.update_task(status_update(&task.id, 2)).await.unwrap();

        let task = svc
            .update_task(UpdateTaskRequest {
                id: task.id.clone(),
                status: 4,
                error_message: "worker exploded".to_owned(),
                ..UpdateTaskRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.retry_count, 1);
        assert_eq!(task.error_message, "worker exploded");
        assert!(task.can_retry());
    }

    #[tokio::test]
    async fn mutations_publish_to_subscribers() {
        let svc = service().await;
        let mut sub = svc.bus().subscribe(GLOBAL_KEY);

        let task = svc.create_task(create_req("observed")).await.unwrap();
        let ev = tokio::time::timeout(std::time::Duration::from_secs(1), sub.recv())
            .await
            .expect("timely")
            .expect("event");
        assert_eq!(ev.change_type, ChangeType::Created);
        assert_eq!(ev.task_id, task.id);
        assert_eq!(ev.from_status, TaskStatus::Unspecified);
        assert_eq!(ev.to_status, TaskStatus::Pending);

        svc.update_task(status_update(&task.id, 2)).await.unwrap();
        let ev = tokio::time::timeout(std::time::Duration::from_secs(1), sub.recv())
            .await
            .expect("timely")
            .expect("event");
        assert_eq!(ev.change_type, ChangeType::Updated);
        assert_eq!(ev.to_status, TaskStatus::Running);

        svc.delete_task(&task.id).await.unwrap();
        let ev = tokio::time::timeout(std::time::Duration::from_secs(1), sub.recv())
            .await
            .expect("timely")
            .expect("event");
        assert_eq!(ev.change_type, ChangeType::Deleted);
        assert!(svc.get_task(&task.id).await.is_err());
    }

    #[tokio::test]
    async fn pagination_totals_are_consistent() {
        let svc = service().await;
        for i in 0..7 {
            svc.create_task(create_req(&format!("task-{i}"))).await.unwrap();
        }

        let mut seen = 0;
        for page in 0..3 {
            let (tasks, total) = svc
                .list_tasks(&ListTasksQuery {
                    page,
                    page_size: 3,
                    ..ListTasksQuery::default()
                })
                .await
                .unwrap();
            assert_eq!(total, 7);
            seen += tasks.len();
        }
        assert_eq!(seen, 7);
    }
}
