//! Error types for storage operations.

use thiserror::Error;

/// Errors from storage operations.
///
/// Errors are `Clone` so a single failed write can be reported to every
/// caller whose request was coalesced into it.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The record at the given path does not have the expected shape.
    #[error("corrupt record at {path}: {reason}")]
    CorruptRecord { path: String, reason: String },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The backend rejected or failed the operation.
    #[error("backend error: {0}")]
    Backend(String),

    /// The backend does not implement this operation.
    #[error("operation not supported by this backend: {0}")]
    Unsupported(&'static str),
}

/// Result alias for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
