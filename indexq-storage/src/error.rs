//! Error types for the storage layer.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// An optimistic-concurrency failure detected at commit time.
///
/// Raised when a root written by the committing transaction was changed by
/// another commit since it was first read, and no registered resolver could
/// merge the two states.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("write conflict on root `{root}`: {reason}")]
pub struct ConflictError {
    /// Name of the root that diverged.
    pub root: String,
    /// Why the divergence could not be resolved.
    pub reason: String,
}

impl ConflictError {
    /// Creates a conflict error for a root.
    pub fn new(root: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            reason: reason.into(),
        }
    }
}

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from DuckDB.
    #[error("database error: {0}")]
    Database(#[from] duckdb::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error (file system).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Concurrent commit could not be merged.
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// A transaction participant or before-commit hook failed.
    #[error("participant failed: {0}")]
    Participant(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The transaction was already committed or aborted.
    #[error("transaction {0} is no longer active")]
    Inactive(u64),

    /// A savepoint was used with a transaction that did not create it.
    #[error("savepoint belongs to transaction {savepoint}, not {transaction}")]
    ForeignSavepoint { savepoint: u64, transaction: u64 },

    /// A lock guarding shared storage state was poisoned.
    #[error("storage lock poisoned: {0}")]
    LockPoisoned(String),

    /// Invalid data.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl StorageError {
    /// Wraps an error raised by a participant or hook.
    pub fn participant<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Participant(Box::new(err))
    }

    /// Returns the conflict if this error is an optimistic-concurrency failure.
    #[must_use]
    pub fn as_conflict(&self) -> Option<&ConflictError> {
        match self {
            Self::Conflict(conflict) => Some(conflict),
            _ => None,
        }
    }

    /// Returns true if this error is an optimistic-concurrency failure.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        self.as_conflict().is_some()
    }
}

impl<T> From<std::sync::PoisonError<T>> for StorageError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockPoisoned(err.to_string())
    }
}
