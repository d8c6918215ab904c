//! Error types for berth-state

use thiserror::Error;

/// Errors that can occur in the trace persistence layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// No scope or entry exists for the given handle
    #[error("trace handle not found: {handle}")]
    HandleNotFound { handle: String },

    /// A duration was written to an entry that is not a group
    #[error("entry is not a group: {handle}")]
    NotAGroup { handle: String },

    /// A duration was written twice to the same group entry
    #[error("duration already set for entry: {handle}")]
    DurationAlreadySet { handle: String },

    /// Backend failure (connection, query, encoding)
    #[error("trace backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}
