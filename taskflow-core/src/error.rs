//! Error catalog with stable numeric codes.
//!
//! Codes travel on the wire; the families are 1xxx general, 2xxx task,
//! 3xxx storage, 4xxx transport. `TaskError` pairs a code with a human
//! message and an optional detail string. Validation and state-machine
//! errors go back to the caller verbatim; storage errors are wrapped as
//! `DbError` with the underlying cause in `detail`.

use thiserror::Error;

/// Stable numeric error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Success,
    Unknown,
    InvalidParam,
    Unauthorized,
    Forbidden,
    NotFound,
    AlreadyExists,
    InvalidState,
    Timeout,
    RateLimit,

    TaskNotFound,
    TaskAlreadyRunning,
    TaskTerminated,
    TaskCancelled,
    TaskTimeout,
    TaskDependency,
    TaskRetryExhausted,

    DbError,
    DbNotConnected,
    DbTransaction,

    TransportNotReady,
    TransportConnection,
    TransportDeadline,
}

impl ErrorCode {
    /// The wire value.
    pub fn code(self) -> i32 {
        match self {
            ErrorCode::Success => 0,
            ErrorCode::Unknown => 1000,
            ErrorCode::InvalidParam => 1001,
            ErrorCode::Unauthorized => 1002,
            ErrorCode::Forbidden => 1003,
            ErrorCode::NotFound => 1004,
            ErrorCode::AlreadyExists => 1005,
            ErrorCode::InvalidState => 1006,
            ErrorCode::Timeout => 1007,
            ErrorCode::RateLimit => 1008,

            ErrorCode::TaskNotFound => 2000,
            ErrorCode::TaskAlreadyRunning => 2001,
            ErrorCode::TaskTerminated => 2002,
            ErrorCode::TaskCancelled => 2003,
            ErrorCode::TaskTimeout => 2004,
            ErrorCode::TaskDependency => 2005,
            ErrorCode::TaskRetryExhausted => 2006,

            ErrorCode::DbError => 3000,
            ErrorCode::DbNotConnected => 3001,
            ErrorCode::DbTransaction => 3002,

            ErrorCode::TransportNotReady => 4000,
            ErrorCode::TransportConnection => 4001,
            ErrorCode::TransportDeadline => 4002,
        }
    }

    /// Catalog message for the code.
    pub fn message(self) -> &'static str {
        match self {
            ErrorCode::Success => "success",
            ErrorCode::Unknown => "unknown error",
            ErrorCode::InvalidParam => "invalid parameter",
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::NotFound => "resource not found",
            ErrorCode::AlreadyExists => "resource already exists",
            ErrorCode::InvalidState => "invalid state",
            ErrorCode::Timeout => "timeout",
            ErrorCode::RateLimit => "rate limit exceeded",

            ErrorCode::TaskNotFound => "task not found",
            ErrorCode::TaskAlreadyRunning => "task already running",
            ErrorCode::TaskTerminated => "task already terminated",
            ErrorCode::TaskCancelled => "task cancelled",
            ErrorCode::TaskTimeout => "task timeout",
            ErrorCode::TaskDependency => "task dependency not satisfied",
            ErrorCode::TaskRetryExhausted => "task retry exhausted",

            ErrorCode::DbError => "database error",
            ErrorCode::DbNotConnected => "database not connected",
            ErrorCode::DbTransaction => "database transaction error",

            ErrorCode::TransportNotReady => "service not ready",
            ErrorCode::TransportConnection => "connection error",
            ErrorCode::TransportDeadline => "deadline exceeded",
        }
    }

    /// HTTP status the code maps to at the boundary.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorCode::Success => 200,
            ErrorCode::InvalidParam => 400,
            ErrorCode::Unauthorized => 401,
            ErrorCode::Forbidden => 403,
            ErrorCode::NotFound | ErrorCode::TaskNotFound => 404,
            ErrorCode::AlreadyExists => 409,
            ErrorCode::InvalidState
            | ErrorCode::TaskAlreadyRunning
            | ErrorCode::TaskTerminated
            | ErrorCode::TaskCancelled => 400,
            ErrorCode::Timeout | ErrorCode::TaskTimeout | ErrorCode::TransportDeadline => 504,
            ErrorCode::RateLimit => 429,
            ErrorCode::TransportNotReady | ErrorCode::TransportConnection => 503,
            _ => 500,
        }
    }
}

/// An error with a stable code, a message, and optional detail.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("[{}] {}{}", .code.code(), .message, .detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default())]
pub struct TaskError {
    pub code: ErrorCode,
    pub message: String,
    pub detail: Option<String>,
}

impl TaskError {
    /// Error with the catalog message for `code`.
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.message().to_owned(),
            detail: None,
        }
    }

    /// Error with a custom message replacing the catalog one.
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
        }
    }

    /// Catalog message plus a detail string.
    pub fn with_detail(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            message: code.message().to_owned(),
            detail: Some(detail.into()),
        }
    }

    pub fn invalid_param(message: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::InvalidParam, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::InvalidState, message)
    }

    pub fn task_not_found() -> Self {
        Self::new(ErrorCode::TaskNotFound)
    }

    pub fn db(detail: impl Into<String>) -> Self {
        Self::with_detail(ErrorCode::DbError, detail)
    }
}
