//! Unary task endpoints: create, get, list, update, delete.
//!
//! These routes are mounted on the API listener under `/api/v1` and mirrored
//! verbatim on the ops listener.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::error::{ApiError, ErrorBody};
use crate::schemas::{
    CreateTaskRequest, DeleteTaskResponse, GetTaskQuery, ListTasksQuery, ListTasksResponse,
    TaskEventView, TaskView, UpdateTaskRequest,
};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(create_task, get_task, list_tasks, update_task, delete_task),
    components(schemas(
        CreateTaskRequest,
        UpdateTaskRequest,
        TaskView,
        TaskEventView,
        ListTasksResponse,
        DeleteTaskResponse,
        ErrorBody,
    ))
)]
pub struct TasksApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tasks", get(list_tasks).post(create_task))
        .route(
            "/tasks/{id}",
            get(get_task).put(update_task).delete(delete_task),
        )
}

/// Create a task; it starts in PENDING.
#[utoipa::path(
    post,
    path = "/api/v1/tasks",
    tag = "tasks",
    request_body = CreateTaskRequest,
    responses(
        (status = 200, description = "Task created", body = TaskView),
        (status = 400, description = "Missing name", body = ErrorBody),
    )
)]
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<Json<TaskView>, ApiError> {
    let task = state.service.create_task(req).await?;
    Ok(Json(TaskView::from_task(&task, false)))
}

/// Fetch one task; `include_events=true` attaches the transition log.
#[utoipa::path(
    get,
    path = "/api/v1/tasks/{id}",
    tag = "tasks",
    params(("id" = String, Path, description = "Task id"), GetTaskQuery),
    responses(
        (status = 200, description = "The task", body = TaskView),
        (status = 404, description = "No such task", body = ErrorBody),
    )
)]
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<GetTaskQuery>,
) -> Result<Json<TaskView>, ApiError> {
    let task = state.service.get_task(&id).await?;
    Ok(Json(TaskView::from_task(&task, q.include_events)))
}

/// List tasks with filtering and zero-based pagination.
#[utoipa::path(
    get,
    path = "/api/v1/tasks",
    tag = "tasks",
    params(ListTasksQuery),
    responses(
        (status = 200, description = "One page plus the total under the filter", body = ListTasksResponse)
    )
)]
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListTasksQuery>,
) -> Result<Json<ListTasksResponse>, ApiError> {
    let (tasks, total) = state.service.list_tasks(&q).await?;
    Ok(Json(ListTasksResponse {
        tasks: tasks.iter().map(|t| TaskView::from_task(t, false)).collect(),
        total,
        page: q.page.max(0),
        page_size: q.normalized_page_size(),
    }))
}

/// Apply a status transition and/or field updates.
///
/// Status changes go through the state machine and the store's atomic
/// compare-and-set; an illegal transition earns InvalidState (1006) naming
/// both statuses.
#[utoipa::path(
    put,
    path = "/api/v1/tasks/{id}",
    tag = "tasks",
    request_body = UpdateTaskRequest,
    params(("id" = String, Path, description = "Task id")),
    responses(
        (status = 200, description = "Updated task", body = TaskView),
        (status = 400, description = "Illegal status transition", body = ErrorBody),
        (status = 404, description = "No such task", body = ErrorBody),
    )
)]
pub async fn update_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(mut req): Json<UpdateTaskRequest>,
) -> Result<Json<TaskView>, ApiError> {
    // The path id is authoritative on this route.
    req.id = id;
    let task = state.service.update_task(req).await?;
    Ok(Json(TaskView::from_task(&task, false)))
}

/// Delete a task; its event log cascades.
#[utoipa::path(
    delete,
    path = "/api/v1/tasks/{id}",
    tag = "tasks",
    params(("id" = String, Path, description = "Task id")),
    responses(
        (status = 200, description = "Acknowledgement", body = DeleteTaskResponse),
        (status = 404, description = "No such task", body = ErrorBody),
    )
)]
pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeleteTaskResponse>, ApiError> {
    let task = state.service.delete_task(&id).await?;
    Ok(Json(DeleteTaskResponse {
        success: true,
        id: task.id,
    }))
}
