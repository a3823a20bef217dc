// Error types shared by the stores, the host adapters and configuration loading

use std::fmt;

use crate::core::PageId;

#[derive(Debug)]
pub enum AppError {
    DatabaseError(String),
    Internal(String),
    Validation(String),
    SerializationError(String),
    DeserializationError(String),
    ConfigurationError(String),
    /// A talk page changed underneath a multi-record rewrite
    StorageConflict(String),
    /// The comment page was written but its metadata row was not.
    PartialWrite { page_id: PageId, reason: String },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::Validation(msg) => write!(f, "Validation error: {}", msg),
            AppError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            AppError::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            AppError::ConfigurationError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::StorageConflict(msg) => write!(f, "Storage conflict: {}", msg),
            AppError::PartialWrite { page_id, reason } => write!(
                f,
                "Partial write: page {} exists without metadata: {}",
                page_id, reason
            ),
        }
    }
}

impl std::error::Error for AppError {}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::SerializationError(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
