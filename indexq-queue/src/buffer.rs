//! Per-transaction action buffers.

use crate::action::Action;
use crate::error::{QueueError, QueueResult};
use crate::optimize::optimize;
use crate::queued::QueuedIndex;
use crate::registry::Registry;
use indexq_storage::{DataManager, RollbackPoint, StorageError, Transaction, TxnId};
use indexq_types::IndexId;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[derive(Debug, Default)]
struct BufferState {
    registered: bool,
    actions: Vec<Action>,
}

/// Actions collected for one index within one transaction.
///
/// The first [`ActionBuffer::add`] joins the transaction and installs a
/// before-commit hook that [flushes](ActionBuffer::flush) the buffer. When
/// the transaction finishes either way, the buffer is cleared and the owning
/// [`QueuedIndex`] forgets it.
pub struct ActionBuffer {
    txn: TxnId,
    index_id: IndexId,
    registry: Arc<Registry>,
    owner: Mutex<Option<Arc<QueuedIndex>>>,
    state: Mutex<BufferState>,
}

/// Pending actions captured by [`ActionBuffer::savepoint`].
#[derive(Debug, Clone)]
pub struct BufferSavepoint {
    actions: Vec<Action>,
}

impl BufferSavepoint {
    #[must_use]
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }
}

impl ActionBuffer {
    pub(crate) fn new(txn: TxnId, owner: Arc<QueuedIndex>) -> Self {
        Self {
            txn,
            index_id: owner.id(),
            registry: owner.registry(),
            owner: Mutex::new(Some(owner)),
            state: Mutex::new(BufferState::default()),
        }
    }

    #[must_use]
    pub fn txn(&self) -> TxnId {
        self.txn
    }

    #[must_use]
    pub fn index_id(&self) -> IndexId {
        self.index_id
    }

    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.state().registered
    }

    /// Pending actions in insertion order.
    #[must_use]
    pub fn actions(&self) -> Vec<Action> {
        self.state().actions.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state().actions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends an action, registering with the transaction first if needed.
    pub fn add(self: &Arc<Self>, txn: &mut Transaction, action: Action) -> QueueResult<()> {
        self.register(txn)?;
        debug!("buffering {}", action);
        self.state().actions.push(action);
        Ok(())
    }

    /// Joins `txn` and installs the flush hook. Idempotent.
    pub fn register(self: &Arc<Self>, txn: &mut Transaction) -> QueueResult<()> {
        self.check_txn(txn)?;
        let mut state = self.state();
        if state.registered {
            return Ok(());
        }

        let participant: Arc<dyn DataManager> = Arc::clone(self) as Arc<dyn DataManager>;
        txn.join(participant)?;
        let buffer = Arc::clone(self);
        txn.add_before_commit_hook(move |txn| buffer.flush(txn).map_err(StorageError::participant))?;
        state.registered = true;
        debug!("action buffer for index {} joined txn {}", self.index_id, self.txn);
        Ok(())
    }

    /// Snapshot of the pending list.
    #[must_use]
    pub fn savepoint(&self) -> BufferSavepoint {
        BufferSavepoint {
            actions: self.state().actions.clone(),
        }
    }

    /// Restores the pending list captured by `savepoint`.
    pub fn rollback(&self, savepoint: &BufferSavepoint) {
        self.state().actions.clone_from(&savepoint.actions);
    }

    /// Optimizes the pending actions and dispatches them.
    ///
    /// With an engaged processor for this index, deferred actions are added
    /// to the persistent queue inside `txn` and immediate actions execute
    /// now. Without one, every action executes now.
    pub fn flush(&self, txn: &mut Transaction) -> QueueResult<()> {
        self.check_txn(txn)?;
        let pending = std::mem::take(&mut self.state().actions);
        if pending.is_empty() {
            return Ok(());
        }
        let batch = optimize(pending);

        let processor = match self.registry.processor_for(self.index_id) {
            Some(processor) if processor.active(txn)? => Some(processor),
            _ => None,
        };

        let Some(processor) = processor else {
            debug!("no active processor, executing {} action(s) inline", batch.len());
            for action in batch {
                self.registry.execute(action)?;
            }
            return Ok(());
        };

        let (deferred, immediate): (Vec<_>, Vec<_>) =
            batch.into_iter().partition(|a| a.mode().is_deferred());
        debug!(
            "processor active: deferring {} action(s), executing {} inline",
            deferred.len(),
            immediate.len()
        );
        for action in immediate {
            self.registry.execute(action)?;
        }
        if !deferred.is_empty() {
            processor.add(txn, deferred)?;
        }
        Ok(())
    }

    fn finish(&self) {
        {
            let mut state = self.state();
            state.registered = false;
            state.actions.clear();
        }
        let owner = self
            .owner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(owner) = owner {
            owner.release_buffer(self.txn);
        }
    }

    fn check_txn(&self, txn: &Transaction) -> QueueResult<()> {
        if txn.id() != self.txn {
            return Err(QueueError::WrongTransaction {
                expected: self.txn.get(),
                actual: txn.id().get(),
            });
        }
        Ok(())
    }

    fn state(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DataManager for ActionBuffer {
    fn sort_key(&self) -> String {
        format!("indexq.buffer.{}.{}", self.index_id, self.txn)
    }

    fn savepoint(self: Arc<Self>) -> Box<dyn RollbackPoint> {
        let savepoint = ActionBuffer::savepoint(&self);
        Box::new(BufferRollback {
            buffer: self,
            savepoint,
        })
    }

    fn tpc_finish(&self, _txn: TxnId) {
        self.finish();
    }

    fn abort(&self, _txn: TxnId) {
        self.finish();
    }
}

struct BufferRollback {
    buffer: Arc<ActionBuffer>,
    savepoint: BufferSavepoint,
}

impl RollbackPoint for BufferRollback {
    fn rollback(&self) {
        self.buffer.rollback(&self.savepoint);
    }
}
