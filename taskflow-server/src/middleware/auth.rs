//! Optional Bearer-token authentication.
//!
//! Active only when `AUTH_TOKEN` is configured; the ops/mirror listener is
//! never behind this middleware.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};

use taskflow_core::{ErrorCode, TaskError};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.auth_token.as_deref() else {
        return next.run(req).await;
    };

    let provided = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if provided == Some(expected) {
        next.run(req).await
    } else {
        ApiError(TaskError::new(ErrorCode::Unauthorized)).into_response()
    }
}
