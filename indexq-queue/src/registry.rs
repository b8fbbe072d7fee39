//! Lookup of indexes and of the processor responsible for each index.

use crate::action::Action;
use crate::error::{QueueError, QueueResult};
use crate::index::SearchIndex;
use crate::processor::ActionProcessor;
use indexq_types::IndexId;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Indexes reachable by identity, used to execute actions that only carry
/// the identity of their target.
#[derive(Default)]
pub struct IndexSet {
    indexes: RwLock<HashMap<IndexId, Arc<dyn SearchIndex>>>,
}

impl IndexSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an index, replacing any index with the same identity.
    pub fn insert(&self, index: Arc<dyn SearchIndex>) -> IndexId {
        let id = index.id();
        self.indexes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, index);
        id
    }

    pub fn remove(&self, id: IndexId) -> Option<Arc<dyn SearchIndex>> {
        self.indexes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    pub fn get(&self, id: IndexId) -> QueueResult<Arc<dyn SearchIndex>> {
        self.indexes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(QueueError::UnknownIndex(id))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.indexes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Executes an action against the index it targets.
    pub fn execute(&self, action: Action) -> QueueResult<()> {
        let index = self.get(action.index())?;
        action.execute(index.as_ref())?;
        Ok(())
    }
}

/// Registry consulted by transaction buffers.
///
/// Resolves an index identity to the index itself and to the zero-or-one
/// [`ActionProcessor`] that may take deferred actions for it.
#[derive(Default)]
pub struct Registry {
    indexes: Arc<IndexSet>,
    processors: RwLock<HashMap<IndexId, Arc<ActionProcessor>>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The index set shared with processors.
    #[must_use]
    pub fn indexes(&self) -> Arc<IndexSet> {
        Arc::clone(&self.indexes)
    }

    pub fn register_index(&self, index: Arc<dyn SearchIndex>) -> IndexId {
        self.indexes.insert(index)
    }

    pub fn index(&self, id: IndexId) -> QueueResult<Arc<dyn SearchIndex>> {
        self.indexes.get(id)
    }

    /// Makes `processor` the one consulted for actions on `index`.
    pub fn register_processor(&self, index: IndexId, processor: Arc<ActionProcessor>) {
        self.processors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(index, processor);
    }

    pub fn unregister_processor(&self, index: IndexId) -> Option<Arc<ActionProcessor>> {
        self.processors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&index)
    }

    #[must_use]
    pub fn processor_for(&self, index: IndexId) -> Option<Arc<ActionProcessor>> {
        self.processors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&index)
            .cloned()
    }

    /// Executes an action against the index it targets.
    pub fn execute(&self, action: Action) -> QueueResult<()> {
        self.indexes.execute(action)
    }
}
