//! Client-push batch create.
//!
//! The request body is newline-delimited JSON: one `CreateTaskRequest` per
//! line, consumed until the client half-closes the body. Individual failures
//! are recorded and processing continues; only a transport-level read error
//! aborts the batch. The aggregate reply keeps `tasks` index-aligned with
//! the submitted lines (null placeholders for failures).

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use futures::StreamExt;
use tracing::info;
use utoipa::OpenApi;

use taskflow_core::{ErrorCode, TaskError};

use crate::error::ApiError;
use crate::schemas::{BatchCreateTasksResponse, CreateTaskRequest, TaskView};
use crate::state::AppState;

/// Maximum accepted length of a single NDJSON line (1 MiB).
const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(OpenApi)]
#[openapi(
    paths(batch_create_tasks),
    components(schemas(BatchCreateTasksResponse))
)]
pub struct BatchApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/tasks/batch", post(batch_create_tasks))
}

/// Create tasks from an NDJSON request stream.
#[utoipa::path(
    post,
    path = "/api/v1/tasks/batch",
    tag = "streams",
    request_body(content = String, description = "One CreateTaskRequest JSON object per line"),
    responses(
        (status = 200, description = "Aggregate outcome", body = BatchCreateTasksResponse)
    )
)]
pub async fn batch_create_tasks(
    State(state): State<Arc<AppState>>,
    body: Body,
) -> Result<Json<BatchCreateTasksResponse>, ApiError> {
    let mut data = body.into_data_stream();
    let mut buf: Vec<u8> = Vec::new();
    let mut response = BatchCreateTasksResponse {
        tasks: Vec::new(),
        success_count: 0,
        failed_count: 0,
        errors: Vec::new(),
    };

    while let Some(chunk) = data.next().await {
        let chunk = chunk.map_err(|e| {
            TaskError::with_detail(ErrorCode::TransportConnection, e.to_string())
        })?;
        buf.extend_from_slice(&chunk);

        while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buf.drain(..=pos).collect();
            handle_line(&state, &line[..line.len() - 1], &mut response).await;
        }

        if buf.len() > MAX_LINE_BYTES {
            return Err(TaskError::invalid_param(format!(
                "line exceeds {MAX_LINE_BYTES} bytes"
            ))
            .into());
        }
    }

    // Trailing line without a newline terminator.
    if !buf.is_empty() {
        let line = std::mem::take(&mut buf);
        handle_line(&state, &line, &mut response).await;
    }

    info!(
        success = response.success_count,
        failed = response.failed_count,
        "batch create finished"
    );
    Ok(Json(response))
}

async fn handle_line(
    state: &Arc<AppState>,
    line: &[u8],
    response: &mut BatchCreateTasksResponse,
) {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return;
    }

    match serde_json::from_str::<CreateTaskRequest>(text) {
        Err(e) => {
            response.failed_count += 1;
            response.errors.push(format!("invalid JSON: {e}"));
            response.tasks.push(None);
        }
        Ok(req) => match state.service.create_task(req).await {
            Ok(task) => {
                response.success_count += 1;
                response.tasks.push(Some(TaskView::from_task(&task, false)));
            }
            Err(e) => {
                response.failed_count += 1;
                response.errors.push(e.message);
                response.tasks.push(None);
            }
        },
    }
}
