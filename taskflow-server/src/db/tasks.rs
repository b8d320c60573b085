//! Task persistence: the `tasks` and `task_events` tables.
//!
//! Map and list columns are stored as JSON text (`{}` / `[]` when empty,
//! never null). Timestamps are RFC-3339 strings at second precision for
//! cross-platform portability.
//!
//! `update_status_with_event` is the only sanctioned way to change a task's
//! status: a single transaction performs the `UPDATE ... WHERE id = ? AND
//! status = ?` compare-and-set and appends the transition event, so two
//! clients can never drive the same task out of the same source state twice.

use std::collections::HashMap;
use std::future::Future;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{QueryBuilder, Sqlite};
use uuid::Uuid;

use taskflow_core::{Task, TaskEvent, TaskPriority, TaskStatus};

use super::{SqliteStore, StoreError};

/// Filter for [`TaskStore::list_by_filter`]. `page_index` is zero-based;
/// the store clamps `page_size` to `[1, 100]` (default 20).
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub task_type: Option<String>,
    pub created_by: Option<String>,
    /// Substring match over name and description.
    pub keyword: Option<String>,
    pub page_size: i64,
    pub page_index: i64,
}

/// Persistence interface for tasks and their event log.
pub trait TaskStore: Send + Sync + 'static {
    fn create(&self, task: &Task) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Returns the task with its event log attached, or `None` if absent.
    fn get_by_id(&self, id: &str)
        -> impl Future<Output = Result<Option<Task>, StoreError>> + Send;

    /// Full-row replace by id. Does not touch status semantics; use
    /// [`TaskStore::update_status_with_event`] for status changes.
    fn update(&self, task: &Task) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Deletes the task; events cascade. Returns the number of rows removed.
    fn delete(&self, id: &str) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Returns one page plus the total count under the same filter.
    fn list_by_filter(
        &self,
        filter: &TaskFilter,
    ) -> impl Future<Output = Result<(Vec<Task>, i64), StoreError>> + Send;

    /// Pending tasks in scheduler order: priority DESC, created_at ASC.
    fn list_pending(&self, limit: i64)
        -> impl Future<Output = Result<Vec<Task>, StoreError>> + Send;

    fn count(
        &self,
        status: Option<TaskStatus>,
    ) -> impl Future<Output = Result<i64, StoreError>> + Send;

    /// Atomic compare-and-set status transition plus event append, in one
    /// transaction. Fails with [`StoreError::StatusConflict`] when no row
    /// matches `id` + `from`.
    fn update_status_with_event(
        &self,
        task_id: &str,
        from: TaskStatus,
        to: TaskStatus,
        operator: &str,
        message: &str,
    ) -> impl Future<Output = Result<TaskEvent, StoreError>> + Send;

    fn add_event(&self, event: &TaskEvent)
        -> impl Future<Output = Result<(), StoreError>> + Send;

    fn events_by_task_id(
        &self,
        task_id: &str,
    ) -> impl Future<Output = Result<Vec<TaskEvent>, StoreError>> + Send;
}

const TASK_COLUMNS: &str = "id, name, description, status, priority, task_type, \
     input_params, output_result, dependencies, retry_count, max_retries, \
     error_message, created_at, updated_at, started_at, completed_at, created_by";

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    name: String,
    description: String,
    status: i64,
    priority: i64,
    task_type: String,
    input_params: String,
    output_result: String,
    dependencies: String,
    retry_count: i64,
    max_retries: i64,
    error_message: String,
    created_at: String,
    updated_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    created_by: String,
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: String,
    task_id: String,
    from_status: i64,
    to_status: i64,
    message: String,
    timestamp: String,
    operator: String,
}

impl From<TaskRow> for Task {
    fn from(r: TaskRow) -> Self {
        Task {
            id: r.id,
            name: r.name,
            description: r.description,
            status: TaskStatus::from(r.status as i32),
            priority: TaskPriority::from(r.priority as i32),
            task_type: r.task_type,
            input_params: parse_map(&r.input_params),
            output_result: parse_map(&r.output_result),
            dependencies: parse_list(&r.dependencies),
            retry_count: r.retry_count as i32,
            max_retries: r.max_retries as i32,
            error_message: r.error_message,
            created_at: parse_ts(&r.created_at),
            updated_at: parse_ts(&r.updated_at),
            started_at: r.started_at.as_deref().map(parse_ts),
            completed_at: r.completed_at.as_deref().map(parse_ts),
            created_by: r.created_by,
            events: Vec::new(),
        }
    }
}

impl From<EventRow> for TaskEvent {
    fn from(r: EventRow) -> Self {
        TaskEvent {
            id: r.id,
            task_id: r.task_id,
            from_status: TaskStatus::from(r.from_status as i32),
            to_status: TaskStatus::from(r.to_status as i32),
            message: r.message,
            timestamp: parse_ts(&r.timestamp),
            operator: r.operator,
        }
    }
}

impl TaskStore for SqliteStore {
    async fn create(&self, task: &Task) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO tasks (id, name, description, status, priority, task_type, \
             input_params, output_result, dependencies, retry_count, max_retries, \
             error_message, created_at, updated_at, started_at, completed_at, created_by) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        )
        .bind(&task.id)
        .bind(&task.name)
        .bind(&task.description)
        .bind(i32::from(task.status))
        .bind(i32::from(task.priority))
        .bind(&task.task_type)
        .bind(encode_map(&task.input_params))
        .bind(encode_map(&task.output_result))
        .bind(encode_list(&task.dependencies))
        .bind(task.retry_count)
        .bind(task.max_retries)
        .bind(&task.error_message)
        .bind(fmt_ts(task.created_at))
        .bind(fmt_ts(task.updated_at))
        .bind(task.started_at.map(fmt_ts))
        .bind(task.completed_at.map(fmt_ts))
        .bind(&task.created_by)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Task>, StoreError> {
        let row: Option<TaskRow> =
            sqlx::query_as(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut task = Task::from(row);
        task.events = self.events_by_task_id(id).await?;
        Ok(Some(task))
    }

    async fn update(&self, task: &Task) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE tasks SET name = ?1, description = ?2, status = ?3, priority = ?4, \
             task_type = ?5, input_params = ?6, output_result = ?7, dependencies = ?8, \
             retry_count = ?9, max_retries = ?10, error_message = ?11, updated_at = ?12, \
             started_at = ?13, completed_at = ?14, created_by = ?15 \
             WHERE id = ?16",
        )
        .bind(&task.name)
        .bind(&task.description)
        .bind(i32::from(task.status))
        .bind(i32::from(task.priority))
        .bind(&task.task_type)
        .bind(encode_map(&task.input_params))
        .bind(encode_map(&task.output_result))
        .bind(encode_list(&task.dependencies))
        .bind(task.retry_count)
        .bind(task.max_retries)
        .bind(&task.error_message)
        .bind(fmt_ts(task.updated_at))
        .bind(task.started_at.map(fmt_ts))
        .bind(task.completed_at.map(fmt_ts))
        .bind(&task.created_by)
        .bind(&task.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn list_by_filter(&self, filter: &TaskFilter) -> Result<(Vec<Task>, i64), StoreError> {
        let page_size = if filter.page_size <= 0 {
            20
        } else {
            filter.page_size.min(100)
        };
        let page_index = filter.page_index.max(0);

        let mut count_qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM tasks");
        push_filter(&mut count_qb, filter);
        let total: i64 = count_qb.build_query_scalar().fetch_one(&self.pool).await?;

        let mut list_qb =
            QueryBuilder::<Sqlite>::new(format!("SELECT {TASK_COLUMNS} FROM tasks"));
        push_filter(&mut list_qb, filter);
        list_qb
            .push(" ORDER BY priority DESC, created_at DESC LIMIT ")
            .push_bind(page_size)
            .push(" OFFSET ")
            .push_bind(page_index * page_size);

        let rows: Vec<TaskRow> = list_qb.build_query_as().fetch_all(&self.pool).await?;
        Ok((rows.into_iter().map(Task::from).collect(), total))
    }

    async fn list_pending(&self, limit: i64) -> Result<Vec<Task>, StoreError> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE status = ?1 \
             ORDER BY priority DESC, created_at ASC LIMIT ?2"
        ))
        .bind(i32::from(TaskStatus::Pending))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Task::from).collect())
    }

    async fn count(&self, status: Option<TaskStatus>) -> Result<i64, StoreError> {
        let count: i64 = match status {
            Some(s) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE status = ?1")
                    .bind(i32::from(s))
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM tasks")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count)
    }

    async fn update_status_with_event(
        &self,
        task_id: &str,
        from: TaskStatus,
        to: TaskStatus,
        operator: &str,
        message: &str,
    ) -> Result<TaskEvent, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
        )
        .bind(i32::from(to))
        .bind(fmt_ts(now))
        .bind(task_id)
        .bind(i32::from(from))
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            // Dropping the transaction rolls it back.
            return Err(StoreError::StatusConflict);
        }

        let event = TaskEvent {
            id: Uuid::new_v4().to_string(),
            task_id: task_id.to_owned(),
            from_status: from,
            to_status: to,
            message: message.to_owned(),
            timestamp: now,
            operator: operator.to_owned(),
        };
        sqlx::query(
            "INSERT INTO task_events (id, task_id, from_status, to_status, message, timestamp, operator) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&event.id)
        .bind(&event.task_id)
        .bind(i32::from(event.from_status))
        .bind(i32::from(event.to_status))
        .bind(&event.message)
        .bind(fmt_ts(event.timestamp))
        .bind(&event.operator)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(event)
    }

    async fn add_event(&self, event: &TaskEvent) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO task_events (id, task_id, from_status, to_status, message, timestamp, operator) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&event.id)
        .bind(&event.task_id)
        .bind(i32::from(event.from_status))
        .bind(i32::from(event.to_status))
        .bind(&event.message)
        .bind(fmt_ts(event.timestamp))
        .bind(&event.operator)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn events_by_task_id(&self, task_id: &str) -> Result<Vec<TaskEvent>, StoreError> {
        // Timestamps carry second precision; rowid breaks same-second ties
        // in insertion order.
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT id, task_id, from_status, to_status, message, timestamp, operator \
             FROM task_events WHERE task_id = ?1 ORDER BY timestamp ASC, rowid ASC",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(TaskEvent::from).collect())
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &TaskFilter) {
    qb.push(" WHERE 1 = 1");
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(i32::from(status));
    }
    if let Some(priority) = filter.priority {
        qb.push(" AND priority = ").push_bind(i32::from(priority));
    }
    if let Some(task_type) = &filter.task_type {
        qb.push(" AND task_type = ").push_bind(task_type.clone());
    }
    if let Some(created_by) = &filter.created_by {
        qb.push(" AND created_by = ").push_bind(created_by.clone());
    }
    if let Some(keyword) = &filter.keyword {
        let pattern = format!("%{keyword}%");
        qb.push(" AND (name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR description LIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

// ── column codecs ────────────────────────────────────────────────────────────

fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            tracing::warn!(raw, error = %e, "failed to parse stored timestamp; using now");
            Utc::now()
        })
}

fn encode_map(map: &HashMap<String, String>) -> String {
    serde_json::to_string(map).unwrap_or_else(|_| "{}".to_owned())
}

fn encode_list(list: &[String]) -> String {
    serde_json::to_string(list).unwrap_or_else(|_| "[]".to_owned())
}

fn parse_map(raw: &str) -> HashMap<String, String> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn parse_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod test {
    use super::*;
    use taskflow_core::ErrorCode;
    use taskflow_core::TaskError;

    fn sample_task(id: &str, name: &str) -> Task {
        let mut params = HashMap::new();
        params.insert("k".to_owned(), "v".to_owned());
        let mut task = Task::new(
            name,
            "a sample",
            TaskPriority::Normal,
            "unit",
            params,
            vec!["dep-1".to_owned()],
            3,
            "tester",
        );
        task.id = id.to_owned();
        task
    }

    async fn store() -> SqliteStore {
        SqliteStore::connect_in_memory().await.expect("in-memory db")
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = store().await;
        let task = sample_task("t1", "first");
        store.create(&task).await.unwrap();

        let loaded = store.get_by_id("t1").await.unwrap().expect("present");
        assert_eq!(loaded.id, "t1");
        assert_eq!(loaded.name, "first");
        assert_eq!(loaded.status, TaskStatus::Pending);
        assert_eq!(loaded.input_params.get("k").map(String::as_str), Some("v"));
        assert_eq!(loaded.dependencies, vec!["dep-1".to_owned()]);
        assert!(loaded.events.is_empty());
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let store = store().await;
        assert!(store.get_by_id("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_id_is_already_exists() {
        let store = store().await;
        let task = sample_task("dup", "first");
        store.create(&task).await.unwrap();

        let err = store.create(&task).await.unwrap_err();
        let task_err = TaskError::from(err);
        assert_eq!(task_err.code, ErrorCode::AlreadyExists);
    }

    #[tokio::test]
    async fn cas_appends_event_and_detects_mismatch() {
        let store = store().await;
        store.create(&sample_task("t1", "cas")).await.unwrap();

        let event = store
            .update_status_with_event("t1", TaskStatus::Pending, TaskStatus::Running, "system", "go")
            .await
            .unwrap();
        assert_eq!(event.from_status, TaskStatus::Pending);
        assert_eq!(event.to_status, TaskStatus::Running);

        // Same source status a second time: the row no longer matches.
        let err = store
            .update_status_with_event("t1", TaskStatus::Pending, TaskStatus::Running, "system", "go")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StatusConflict));

        let loaded = store.get_by_id("t1").await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Running);
        assert_eq!(loaded.events.len(), 1, "failed CAS must not log an event");
    }

    #[tokio::test]
    async fn event_log_keeps_insertion_order() {
        let store = store().await;
        store.create(&sample_task("t1", "ordered")).await.unwrap();

        store
            .update_status_with_event("t1", TaskStatus::Pending, TaskStatus::Running, "system", "")
            .await
            .unwrap();
        store
            .update_status_with_event("t1", TaskStatus::Running, TaskStatus::Succeeded, "system", "")
            .await
            .unwrap();

        let events = store.events_by_task_id("t1").await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].to_status, TaskStatus::Running);
        assert_eq!(events[1].to_status, TaskStatus::Succeeded);
    }

    #[tokio::test]
    async fn delete_cascades_to_events() {
        let store = store().await;
        store.create(&sample_task("t1", "doomed")).await.unwrap();
        store
            .update_status_with_event("t1", TaskStatus::Pending, TaskStatus::Running, "system", "")
            .await
            .unwrap();

        assert_eq!(store.delete("t1").await.unwrap(), 1);
        assert!(store.get_by_id("t1").await.unwrap().is_none());
        assert!(store.events_by_task_id("t1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn filter_and_pagination_cover_every_task_once() {
        let store = store().await;
        for i in 0..5 {
            let mut t = sample_task(&format!("t{i}"), &format!("task {i}"));
            t.priority = if i % 2 == 0 { TaskPriority::High } else { TaskPriority::Low };
            store.create(&t).await.unwrap();
        }

        let filter = TaskFilter { page_size: 2, ..TaskFilter::default() };
        let mut seen = std::collections::HashSet::new();
        let mut total_from_pages = 0;
        for page in 0..3 {
            let (tasks, total) = store
                .list_by_filter(&TaskFilter { page_index: page, ..filter.clone() })
                .await
                .unwrap();
            assert_eq!(total, 5);
            total_from_pages += tasks.len();
            for t in tasks {
                assert!(seen.insert(t.id.clone()), "task {} appeared twice", t.id);
            }
        }
        assert_eq!(total_from_pages, 5);
    }

    #[tokio::test]
    async fn filter_by_status_and_keyword() {
        let store = store().await;
        let mut a = sample_task("a", "alpha build");
        a.status = TaskStatus::Running;
        store.create(&a).await.unwrap();
        store.create(&sample_task("b", "beta build")).await.unwrap();

        let (tasks, total) = store
            .list_by_filter(&TaskFilter {
                status: Some(TaskStatus::Running),
                ..TaskFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(tasks[0].id, "a");

        let (tasks, total) = store
            .list_by_filter(&TaskFilter {
                keyword: Some("beta".to_owned()),
                ..TaskFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(tasks[0].id, "b");
    }

    #[tokio::test]
    async fn list_orders_by_priority_then_recency() {
        let store = store().await;
        let mut low = sample_task("low", "low");
        low.priority = TaskPriority::Low;
        let mut urgent = sample_task("urgent", "urgent");
        urgent.priority = TaskPriority::Urgent;
        store.create(&low).await.unwrap();
        store.create(&urgent).await.unwrap();

        let (tasks, _) = store.list_by_filter(&TaskFilter::default()).await.unwrap();
        assert_eq!(tasks[0].id, "urgent");
        assert_eq!(tasks[1].id, "low");
    }

    #[tokio::test]
    async fn add_event_appends_to_the_log() {
        let store = store().await;
        store.create(&sample_task("t1", "tooling")).await.unwrap();

        let event = TaskEvent {
            id: "ev-1".to_owned(),
            task_id: "t1".to_owned(),
            from_status: TaskStatus::Pending,
            to_status: TaskStatus::Cancelled,
            message: "manual correction".to_owned(),
            timestamp: chrono::Utc::now(),
            operator: "admin".to_owned(),
        };
        store.add_event(&event).await.unwrap();

        let events = store.events_by_task_id("t1").await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "ev-1");
        assert_eq!(events[0].operator, "admin");
    }

    #[tokio::test]
    async fn list_pending_orders_by_priority_then_age() {
        let store = store().await;
        let mut urgent = sample_task("u", "urgent");
        urgent.priority = TaskPriority::Urgent;
        let mut low = sample_task("l", "low");
        low.priority = TaskPriority::Low;
        let mut done = sample_task("d", "done");
        done.status = TaskStatus::Succeeded;
        store.create(&low).await.unwrap();
        store.create(&urgent).await.unwrap();
        store.create(&done).await.unwrap();

        let pending = store.list_pending(10).await.unwrap();
        let ids: Vec<&str> = pending.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["u", "l"], "succeeded task excluded, urgent first");

        assert_eq!(store.count(None).await.unwrap(), 3);
        assert_eq!(store.count(Some(TaskStatus::Pending)).await.unwrap(), 2);
    }

    #[test]
    fn empty_collections_encode_as_json_literals() {
        assert_eq!(encode_map(&HashMap::new()), "{}");
        assert_eq!(encode_list(&[]), "[]");
    }
}
