//! Application-facing handle that turns document mutations into actions.

use crate::action::Action;
use crate::buffer::ActionBuffer;
use crate::error::QueueResult;
use crate::index::SearchIndex;
use crate::registry::Registry;
use indexq_storage::{Transaction, TxnId};
use indexq_types::{ActionMode, DocId, IndexId};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A search index whose mutations are buffered per transaction.
///
/// Each transaction gets its own [`ActionBuffer`], created on first use and
/// dropped from the table when that transaction commits or aborts.
pub struct QueuedIndex {
    id: IndexId,
    registry: Arc<Registry>,
    default_mode: ActionMode,
    buffers: Mutex<HashMap<TxnId, Arc<ActionBuffer>>>,
}

impl QueuedIndex {
    /// Registers `index` and wraps it, queueing actions in immediate mode.
    pub fn new(index: Arc<dyn SearchIndex>, registry: Arc<Registry>) -> Arc<Self> {
        Self::with_mode(index, registry, ActionMode::Immediate)
    }

    /// Registers `index` and wraps it with the given default mode.
    pub fn with_mode(
        index: Arc<dyn SearchIndex>,
        registry: Arc<Registry>,
        default_mode: ActionMode,
    ) -> Arc<Self> {
        let id = registry.register_index(index);
        Arc::new(Self {
            id,
            registry,
            default_mode,
            buffers: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn id(&self) -> IndexId {
        self.id
    }

    #[must_use]
    pub fn default_mode(&self) -> ActionMode {
        self.default_mode
    }

    #[must_use]
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// The buffer for `txn`, created and registered on first use.
    pub fn buffer(self: &Arc<Self>, txn: &mut Transaction) -> QueueResult<Arc<ActionBuffer>> {
        let buffer = Arc::clone(
            self.buffers()
                .entry(txn.id())
                .or_insert_with(|| Arc::new(ActionBuffer::new(txn.id(), Arc::clone(self)))),
        );
        buffer.register(txn)?;
        Ok(buffer)
    }

    /// Number of transactions that currently hold a buffer.
    #[must_use]
    pub fn active_buffers(&self) -> usize {
        self.buffers().len()
    }

    /// Queues an explicit action in `txn`.
    pub fn add(self: &Arc<Self>, txn: &mut Transaction, action: Action) -> QueueResult<()> {
        self.buffer(txn)?.add(txn, action)
    }

    pub fn index_doc(
        self: &Arc<Self>,
        txn: &mut Transaction,
        docid: impl Into<DocId>,
        object: Value,
    ) -> QueueResult<()> {
        self.add(txn, Action::add(self.id, self.default_mode, docid, object))
    }

    pub fn reindex_doc(
        self: &Arc<Self>,
        txn: &mut Transaction,
        docid: impl Into<DocId>,
        object: Value,
    ) -> QueueResult<()> {
        self.add(txn, Action::change(self.id, self.default_mode, docid, object))
    }

    pub fn unindex_doc(self: &Arc<Self>, txn: &mut Transaction, docid: impl Into<DocId>) -> QueueResult<()> {
        self.add(txn, Action::remove(self.id, self.default_mode, docid))
    }

    pub(crate) fn release_buffer(&self, txn: TxnId) {
        self.buffers().remove(&txn);
    }

    fn buffers(&self) -> MutexGuard<'_, HashMap<TxnId, Arc<ActionBuffer>>> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
