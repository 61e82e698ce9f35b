//! Storage error types

use thiserror::Error;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Storage error
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("not modified")]
    NotModified,

    #[error("precondition failed")]
    PreconditionFailed,

    #[error("storage backend error: {0}")]
    Backend(String),
}
