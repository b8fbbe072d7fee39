//! Two-phase-commit participants.
//!
//! Anything that has to act when a transaction commits or aborts joins the
//! transaction as a [`DataManager`]. The transaction drives participants in
//! `sort_key` order through `tpc_begin` → `commit` → `tpc_vote` →
//! `tpc_finish`, or calls `tpc_abort` on all of them if any step (including
//! the write of the transaction's own roots) fails. A transaction that is
//! aborted before committing calls `abort`.

use crate::error::StorageResult;
use crate::transaction::TxnId;
use std::sync::Arc;

/// A participant in a transaction's commit protocol.
///
/// All methods except [`DataManager::sort_key`] and
/// [`DataManager::savepoint`] have no-op defaults, so participants that only
/// care about finishing or aborting implement just those.
pub trait DataManager: Send + Sync {
    /// Key deciding the order participants are driven in.
    fn sort_key(&self) -> String;

    /// Captures the participant's current state.
    fn savepoint(self: Arc<Self>) -> Box<dyn RollbackPoint>;

    /// First phase begins.
    fn tpc_begin(&self, _txn: TxnId) -> StorageResult<()> {
        Ok(())
    }

    /// Stage changes for commit.
    fn commit(&self, _txn: TxnId) -> StorageResult<()> {
        Ok(())
    }

    /// Last chance to refuse the commit.
    fn tpc_vote(&self, _txn: TxnId) -> StorageResult<()> {
        Ok(())
    }

    /// The transaction committed.
    fn tpc_finish(&self, _txn: TxnId) {}

    /// The commit failed after the first phase began.
    fn tpc_abort(&self, txn: TxnId) {
        self.abort(txn);
    }

    /// The transaction was aborted before committing, or the participant was
    /// discarded by a savepoint rollback.
    fn abort(&self, _txn: TxnId) {}
}

/// State captured by [`DataManager::savepoint`].
pub trait RollbackPoint: Send {
    /// Restores the captured state. May be called more than once.
    fn rollback(&self);
}
