//! Core type definitions for indexq.
//!
//! This crate defines the small, storage-agnostic types shared by the
//! storage layer and the action queue:
//! - Index identities (UUID v7) and document identifiers
//! - The processing mode an index mutation is requested with
//!
//! Payload shapes are owned by whatever produces the documents; the queue
//! only ever sees them as opaque JSON values.

mod ids;
mod mode;

pub use ids::{DocId, IndexId};
pub use mode::ActionMode;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid document id: {0}")]
    InvalidDocId(String),

    #[error("unknown action mode: {0}")]
    UnknownMode(String),
}
