//! The index capability actions are applied to.

use crate::error::IndexError;
use indexq_types::{DocId, IndexId};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// A search index as seen by the action queue.
///
/// The queue never looks inside an index; it only calls these three
/// operations, possibly more than once for the same document when a drained
/// batch has to be replayed. Implementations must therefore tolerate
/// repeated application.
pub trait SearchIndex: Send + Sync {
    /// Stable identity, used as the first half of every action key.
    fn id(&self) -> IndexId;

    /// Adds a document that is new to the index.
    fn index_doc(&self, docid: DocId, object: Value) -> Result<(), IndexError>;

    /// Replaces the indexed content of an existing document.
    fn reindex_doc(&self, docid: DocId, object: Value) -> Result<(), IndexError>;

    /// Removes a document.
    fn unindex_doc(&self, docid: DocId) -> Result<(), IndexError>;
}

/// An operation applied to a [`MemoryIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOp {
    Indexed(DocId),
    Reindexed(DocId),
    Unindexed(DocId),
}

/// Index keeping documents in memory and logging every operation.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    id: IndexId,
    docs: Mutex<BTreeMap<DocId, Value>>,
    ops: Mutex<Vec<IndexOp>>,
}

impl MemoryIndex {
    /// Creates an empty index with a fresh identity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_id(IndexId::new())
    }

    /// Creates an empty index with the given identity.
    #[must_use]
    pub fn with_id(id: IndexId) -> Self {
        Self {
            id,
            docs: Mutex::new(BTreeMap::new()),
            ops: Mutex::new(Vec::new()),
        }
    }

    /// Returns the indexed content of a document.
    #[must_use]
    pub fn get(&self, docid: DocId) -> Option<Value> {
        lock(&self.docs).ok()?.get(&docid).cloned()
    }

    /// Returns true if the document is indexed.
    #[must_use]
    pub fn contains(&self, docid: DocId) -> bool {
        self.get(docid).is_some()
    }

    /// Number of indexed documents.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.docs).map(|docs| docs.len()).unwrap_or(0)
    }

    /// Returns true if no documents are indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every operation applied so far, in order.
    #[must_use]
    pub fn ops(&self) -> Vec<IndexOp> {
        lock(&self.ops).map(|ops| ops.clone()).unwrap_or_default()
    }

    fn apply(&self, op: IndexOp, object: Option<Value>) -> Result<(), IndexError> {
        let mut docs = lock(&self.docs)?;
        match (op, object) {
            (IndexOp::Unindexed(docid), _) => {
                docs.remove(&docid);
            }
            (IndexOp::Indexed(docid) | IndexOp::Reindexed(docid), Some(object)) => {
                docs.insert(docid, object);
            }
            (IndexOp::Indexed(docid) | IndexOp::Reindexed(docid), None) => {
                return Err(IndexError::Rejected {
                    docid: docid.get(),
                    reason: "missing object".into(),
                });
            }
        }
        lock(&self.ops)?.push(op);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, IndexError> {
    mutex
        .lock()
        .map_err(|_| IndexError::Unavailable("memory index lock poisoned".into()))
}

impl SearchIndex for MemoryIndex {
    fn id(&self) -> IndexId {
        self.id
    }

    fn index_doc(&self, docid: DocId, object: Value) -> Result<(), IndexError> {
        self.apply(IndexOp::Indexed(docid), Some(object))
    }

    fn reindex_doc(&self, docid: DocId, object: Value) -> Result<(), IndexError> {
        self.apply(IndexOp::Reindexed(docid), Some(object))
    }

    fn unindex_doc(&self, docid: DocId) -> Result<(), IndexError> {
        self.apply(IndexOp::Unindexed(docid), None)
    }
}
