//! Error types for the action queue.

use indexq_storage::StorageError;
use indexq_types::IndexId;
use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors that can occur while buffering, queueing or applying actions.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Storage error, including commit conflicts.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// An index rejected or failed to apply an action.
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// A blocking step of the processing loop panicked or was cancelled.
    #[error("processor task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// An operation that needs the persistent queue ran before `engage()`.
    #[error("queue processor not engaged")]
    NotEngaged,

    /// No index is registered under an action's index identity.
    #[error("unknown index: {0}")]
    UnknownIndex(IndexId),

    /// A buffer was used with a transaction other than the one it belongs to.
    #[error("action buffer belongs to transaction {expected}, used with {actual}")]
    WrongTransaction { expected: u64, actual: u64 },
}

impl QueueError {
    /// Returns true if this error is an optimistic-concurrency conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_conflict())
    }
}

/// Failure reported by a search index while applying an action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    /// The index refused the document.
    #[error("document {docid} rejected: {reason}")]
    Rejected { docid: u64, reason: String },

    /// The index could not be reached or is closed.
    #[error("index unavailable: {0}")]
    Unavailable(String),
}
