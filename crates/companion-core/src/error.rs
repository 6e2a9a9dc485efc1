//! Error types shared by the data-model crate.

use thiserror::Error;

/// Errors raised by the persistent stores and progression/personality logic.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid schedule expression: {0}")]
    InvalidScheduleExpr(String),

    #[error("unknown task id: {0}")]
    UnknownTask(uuid::Uuid),
}

pub type CoreResult<T> = Result<T, CoreError>;
