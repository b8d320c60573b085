//! HTTP boundary for the error catalog.
//!
//! Every handler returns `Result<T, ApiError>`; the response body is always
//! `{code, message, detail?}` with the HTTP status mapped from the numeric
//! code. Validation and state-machine errors reach the caller verbatim;
//! database errors are wrapped as DbError (3000) with the cause in `detail`
//! and logged at full fidelity server-side.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use taskflow_core::{ErrorCode, TaskError};

use crate::db::StoreError;

/// Wire shape of an error response.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    /// Stable numeric error code (see the 1xxx/2xxx/3xxx/4xxx families).
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Newtype over [`TaskError`] so it can travel through axum as a response.
#[derive(Debug, Clone)]
pub struct ApiError(pub TaskError);

impl From<TaskError> for ApiError {
    fn from(e: TaskError) -> Self {
        Self(e)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self(TaskError::from(e))
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        Self(TaskError::from(StoreError::from(e)))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let TaskError { code, message, detail } = self.0;

        // Internal families get logged here, at the boundary, so nothing is
        // lost even though only code + message + detail reach the caller.
        if code.http_status() >= 500 {
            error!(code = code.code(), %message, detail = detail.as_deref(), "request failed");
        }

        let status = StatusCode::from_u16(code.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            code: code.code(),
            message,
            detail,
        };
        (status, Json(body)).into_response()
    }
}

/// Boundary conversion for recovered panics: anything unexpected becomes
/// Unknown (1000) / HTTP 500.
pub fn internal_error_response(detail: String) -> Response {
    ApiError(TaskError::with_detail(ErrorCode::Unknown, detail)).into_response()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn store_conflict_maps_to_invalid_state() {
        let api: ApiError = StoreError::StatusConflict.into();
        assert_eq!(api.0.code, ErrorCode::InvalidState);
        assert_eq!(api.0.message, "task not found or status mismatch");
    }

    #[test]
    fn sqlx_error_maps_to_db_error() {
        let api: ApiError = sqlx::Error::RowNotFound.into();
        assert_eq!(api.0.code, ErrorCode::DbError);
        assert!(api.0.detail.is_some());
    }
}
