use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("path not allowed: {0}")]
    PathNotAllowed(PathBuf),

    #[error("failed to open database: {path}: {reason}")]
    DbOpenFailed { path: PathBuf, reason: String },

    #[error("statement rejected: disallowed keyword {keyword}")]
    Validation { keyword: String },

    #[error("query is not read-only")]
    NotReadonly,

    #[error("invalid cursor: {0}")]
    CursorDecode(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("result sink failed: {0}")]
    Sink(String),

    #[error("result not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Query(e.to_string())
    }
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidRequest(_) => "INVALID_REQUEST",
            AppError::PathNotAllowed(_) => "PATH_NOT_ALLOWED",
            AppError::DbOpenFailed { .. } => "DB_OPEN_FAILED",
            AppError::Validation { .. } => "VALIDATION_ERROR",
            AppError::NotReadonly => "NOT_READONLY",
            AppError::CursorDecode(_) => "CURSOR_DECODE_ERROR",
            AppError::Query(_) => "QUERY_ERROR",
            AppError::Sink(_) => "SINK_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Io(_) => "IO_ERROR",
            AppError::Json(_) => "JSON_ERROR",
            AppError::Internal(_) => "INTERNAL",
        }
    }
}

// Cloning is needed to fan one open failure out to every queued worker task.
impl Clone for AppError {
    fn clone(&self) -> Self {
        match self {
            AppError::InvalidRequest(s) => AppError::InvalidRequest(s.clone()),
            AppError::PathNotAllowed(p) => AppError::PathNotAllowed(p.clone()),
            AppError::DbOpenFailed { path, reason } => AppError::DbOpenFailed {
                path: path.clone(),
                reason: reason.clone(),
            },
            AppError::Validation { keyword } => AppError::Validation {
                keyword: keyword.clone(),
            },
            AppError::NotReadonly => AppError::NotReadonly,
            AppError::CursorDecode(s) => AppError::CursorDecode(s.clone()),
            AppError::Query(s) => AppError::Query(s.clone()),
            AppError::Sink(s) => AppError::Sink(s.clone()),
            AppError::NotFound(s) => AppError::NotFound(s.clone()),
            AppError::Io(e) => AppError::Internal(e.to_string()),
            AppError::Json(e) => AppError::Internal(e.to_string()),
            AppError::Internal(s) => AppError::Internal(s.clone()),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
