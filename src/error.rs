use thiserror::Error;

/// Failures that abort a whole operation. Row-level problems during import
/// never surface here; they are collected as invalid-row messages instead.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Unsupported file format")]
    UnsupportedFormat,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported unit: {0}")]
    UnsupportedUnit(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<native_db::db_type::Error> for CollectorError {
    fn from(err: native_db::db_type::Error) -> Self {
        CollectorError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for CollectorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            CollectorError::Decode(err.to_string())
        } else {
            CollectorError::Network(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, CollectorError>;
