//! Transactional index action queue.
//!
//! Keeps a search index consistent with transactional writes while letting
//! index updates be deferred to a background worker.
//!
//! # Architecture
//!
//! - An [`Action`] is one intent to add, change or remove a document in an
//!   index, run either immediately or deferred ([`ActionMode`])
//! - [`optimize`] collapses a batch to at most one action per document and
//!   orders it by index, kind and document
//! - A [`QueuedIndex`] hands out one [`ActionBuffer`] per transaction; the
//!   buffer joins the transaction and flushes just before it commits
//! - An [`ActionQueue`] persists deferred actions in the transaction's
//!   database; concurrent appends are merged by [`QueueConflictResolver`]
//! - An [`ActionProcessor`] engages the queue, drains and applies it on a
//!   poll interval, and disengages when it stops
//!
//! Without an engaged processor every action runs inline at flush time.

mod action;
mod buffer;
mod config;
mod error;
mod index;
mod optimize;
mod processor;
mod queue;
mod queued;
mod registry;

pub use action::{Action, ActionKey, ActionKind};
pub use buffer::{ActionBuffer, BufferSavepoint};
pub use config::ProcessorConfig;
pub use error::{IndexError, QueueError, QueueResult};
pub use index::{IndexOp, MemoryIndex, SearchIndex};
pub use optimize::{Transition, optimize, transition};
pub use processor::{ActionProcessor, BatchOutcome};
pub use queue::{ActionQueue, DEFAULT_QUEUE_ROOT, QueueConflictResolver};
pub use queued::QueuedIndex;
pub use registry::{IndexSet, Registry};

pub use indexq_types::{ActionMode, DocId, IndexId};
