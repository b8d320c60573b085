//! Per-request deadline for unary endpoints.
//!
//! Streaming routes are mounted outside this layer; they run until one side
//! closes. Work already committed before the deadline stays committed.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use taskflow_core::{ErrorCode, TaskError};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn timeout_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let deadline = state.config.request_timeout();
    let path = req.uri().path().to_owned();

    match tokio::time::timeout(deadline, next.run(req)).await {
        Ok(response) => response,
        Err(_) => {
            warn!(%path, timeout_s = deadline.as_secs(), "request deadline exceeded");
            ApiError(TaskError::new(ErrorCode::Timeout)).into_response()
        }
    }
}
