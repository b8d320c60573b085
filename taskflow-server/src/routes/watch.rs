//! Server-push watch stream (SSE).
//!
//! The subscriber is registered *before* the initial snapshot is read, so
//! every publication after registration is observed (modulo buffer drops);
//! the snapshot reconciles anything earlier. Dropping the stream (client
//! disconnect or transport close) drops the subscription, which deregisters
//! the buffer, so no exit path can leak a registry entry.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use futures::stream::Stream;
use futures::StreamExt;
use utoipa::OpenApi;

use taskflow_core::{ChangeType, Task, TaskChangeEvent, GLOBAL_KEY};

use crate::error::ApiError;
use crate::metrics::{self, StreamGauge};
use crate::schemas::{ListTasksQuery, TaskChangeEventView, TaskView, WatchQuery};
use crate::state::AppState;

/// Upper bound on the initial snapshot when `task_ids` is empty.
pub const WATCH_INITIAL_LIMIT: i64 = 50;

#[derive(OpenApi)]
#[openapi(paths(watch_tasks))]
pub struct WatchApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/tasks/watch", get(watch_tasks))
}

/// Watch task changes as a server-sent-event stream.
///
/// With a single task id the subscription is per-task; with several ids a
/// global subscription is filtered down to the requested set. When
/// `task_ids` is empty and `include_initial` is set, the snapshot covers at
/// most [`WATCH_INITIAL_LIMIT`] tasks.
#[utoipa::path(
    get,
    path = "/api/v1/tasks/watch",
    tag = "streams",
    params(WatchQuery),
    responses(
        (status = 200, description = "SSE stream of TaskChangeEvent JSON payloads")
    )
)]
pub async fn watch_tasks(
    State(state): State<Arc<AppState>>,
    Query(q): Query<WatchQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let task_ids = q.task_ids();
    let status_filter: HashSet<i32> = q.status_filter().into_iter().collect();

    // Register first; events published while the snapshot is read are queued.
    let subscription = state.service.bus().subscribe(watch_key(&task_ids));
    let scope: Option<HashSet<String>> =
        (task_ids.len() > 1).then(|| task_ids.iter().cloned().collect());

    let mut initial: Vec<TaskChangeEventView> = Vec::new();
    if q.include_initial {
        if task_ids.is_empty() {
            let (tasks, _) = state
                .service
                .list_tasks(&ListTasksQuery {
                    page_size: WATCH_INITIAL_LIMIT,
                    ..ListTasksQuery::default()
                })
                .await?;
            initial.extend(tasks.iter().map(initial_event));
        } else {
            for id in &task_ids {
                // Missing ids are skipped; the stream still serves the rest.
                if let Ok(task) = state.service.get_task(id).await {
                    initial.push(initial_event(&task));
                }
            }
        }
    }

    let gauge = StreamGauge::enter(&metrics::global().watch_streams);
    let live = futures::stream::unfold(
        (subscription, scope, status_filter, gauge),
        |(mut subscription, scope, status_filter, gauge)| async move {
            loop {
                let event = subscription.recv().await?;
                if passes_filters(&event, scope.as_ref(), &status_filter) {
                    let view = TaskChangeEventView::from_event(&event);
                    return Some((view, (subscription, scope, status_filter, gauge)));
                }
            }
        },
    );

    let stream = futures::stream::iter(initial)
        .chain(live)
        .map(|view| Event::default().event(view.change_type.clone()).json_data(&view));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn watch_key(task_ids: &[String]) -> &str {
    match task_ids {
        [single] => single.as_str(),
        _ => GLOBAL_KEY,
    }
}

fn initial_event(task: &Task) -> TaskChangeEventView {
    TaskChangeEventView {
        task_id: task.id.clone(),
        task: TaskView::from_task(task, false),
        from_status: task.status.into(),
        to_status: task.status.into(),
        changed_at: task.updated_at.timestamp(),
        change_type: ChangeType::Initial.as_str().to_owned(),
    }
}

/// The status filter matches on the event's target status; the scope filter
/// keeps a multi-id watch from leaking unrelated tasks off the global key.
fn passes_filters(
    event: &TaskChangeEvent,
    scope: Option<&HashSet<String>>,
    status_filter: &HashSet<i32>,
) -> bool {
    if let Some(scope) = scope {
        if !scope.contains(&event.task_id) {
            return false;
        }
    }
    status_filter.is_empty() || status_filter.contains(&i32::from(event.to_status))
}
