//! Error types for the store module.

use thiserror::Error;

/// The two failure reasons a client can act on.
///
/// `Unavailable` is worth retrying; `InvalidInput` is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Unavailable,
    InvalidInput,
}

/// Errors that can occur during content store or ledger operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached or did not answer.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected the request.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The exact registry write was already applied.
    ///
    /// Classified as `InvalidInput`; a client that replayed the write after a
    /// lost response may treat it as success.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Classify this error for the caller.
    pub fn kind(&self) -> FailureKind {
        match self {
            StoreError::InvalidInput(_) | StoreError::AlreadyExists(_) => FailureKind::InvalidInput,
            _ => FailureKind::Unavailable,
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() == FailureKind::Unavailable
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
