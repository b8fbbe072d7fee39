//! Transactions over a [`Database`].
//!
//! A transaction buffers root writes, collects commit participants and
//! before-commit hooks, and supports savepoints. Nothing reaches the store
//! until [`Transaction::commit`]; dropping an active transaction aborts it.

use crate::database::Database;
use crate::error::{StorageError, StorageResult};
use crate::participant::{DataManager, RollbackPoint};
use crate::store::Record;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of a transaction, unique across every database in the process.
///
/// Components that keep per-transaction state outside the transaction (such
/// as buffers shared by handles over several databases) can key on it alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxnId(u64);

impl TxnId {
    pub(crate) fn next() -> Self {
        Self(NEXT_TXN_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatus {
    Active,
    Committed,
    Aborted,
}

type CommitHook = Box<dyn FnOnce(&mut Transaction) -> StorageResult<()> + Send>;

/// A unit of work against a [`Database`].
pub struct Transaction {
    id: TxnId,
    db: Database,
    status: TxnStatus,
    /// Committed record of every root observed, as first seen.
    base: HashMap<String, Option<Record>>,
    /// Pending writes; `None` removes the root.
    writes: BTreeMap<String, Option<Value>>,
    participants: Vec<Arc<dyn DataManager>>,
    hooks: Vec<CommitHook>,
    savepoint_seq: u64,
    live_savepoints: Vec<u64>,
}

/// Restorable snapshot of a transaction's pending work.
pub struct Savepoint {
    txn: TxnId,
    seq: u64,
    writes: BTreeMap<String, Option<Value>>,
    points: Vec<Box<dyn RollbackPoint>>,
    participant_count: usize,
    hook_count: usize,
}

impl Savepoint {
    /// The transaction this savepoint belongs to.
    #[must_use]
    pub const fn txn(&self) -> TxnId {
        self.txn
    }
}

impl fmt::Debug for Savepoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Savepoint")
            .field("txn", &self.txn)
            .field("seq", &self.seq)
            .field("participants", &self.participant_count)
            .finish_non_exhaustive()
    }
}

impl Transaction {
    pub(crate) fn new(id: TxnId, db: Database) -> Self {
        Self {
            id,
            db,
            status: TxnStatus::Active,
            base: HashMap::new(),
            writes: BTreeMap::new(),
            participants: Vec::new(),
            hooks: Vec::new(),
            savepoint_seq: 0,
            live_savepoints: Vec::new(),
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub const fn id(&self) -> TxnId {
        self.id
    }

    /// Returns the current status.
    #[must_use]
    pub const fn status(&self) -> TxnStatus {
        self.status
    }

    /// Returns the database this transaction belongs to.
    #[must_use]
    pub const fn database(&self) -> &Database {
        &self.db
    }

    /// Returns true if there are uncommitted root writes.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.writes.is_empty()
    }

    fn ensure_active(&self) -> StorageResult<()> {
        match self.status {
            TxnStatus::Active => Ok(()),
            _ => Err(StorageError::Inactive(self.id.get())),
        }
    }

    /// Loads a root into the transaction's view the first time it is seen.
    fn observe(&mut self, name: &str) -> StorageResult<Option<&Record>> {
        if !self.base.contains_key(name) {
            let record = self.db.load(name)?;
            self.base.insert(name.to_string(), record);
        }
        Ok(self.base.get(name).and_then(Option::as_ref))
    }

    // ── Roots ────────────────────────────────────────────────────

    /// Reads a root as this transaction sees it.
    pub fn get(&mut self, name: &str) -> StorageResult<Option<Value>> {
        self.ensure_active()?;
        if let Some(pending) = self.writes.get(name) {
            return Ok(pending.clone());
        }
        Ok(self.observe(name)?.map(|record| record.state.clone()))
    }

    /// Reads and deserializes a root.
    pub fn get_as<T: DeserializeOwned>(&mut self, name: &str) -> StorageResult<Option<T>> {
        match self.get(name)? {
            Some(state) => Ok(Some(serde_json::from_value(state)?)),
            None => Ok(None),
        }
    }

    /// Returns true if the root exists in this transaction's view.
    pub fn contains(&mut self, name: &str) -> StorageResult<bool> {
        Ok(self.get(name)?.is_some())
    }

    /// Sets a root's state.
    pub fn put(&mut self, name: &str, state: Value) -> StorageResult<()> {
        self.ensure_active()?;
        self.observe(name)?;
        self.writes.insert(name.to_string(), Some(state));
        Ok(())
    }

    /// Serializes and sets a root's state.
    pub fn put_as<T: Serialize>(&mut self, name: &str, state: &T) -> StorageResult<()> {
        let state = serde_json::to_value(state)?;
        self.put(name, state)
    }

    /// Removes a root. Returns true if it existed in this transaction's view.
    pub fn remove(&mut self, name: &str) -> StorageResult<bool> {
        let existed = self.contains(name)?;
        if existed || self.writes.contains_key(name) {
            self.writes.insert(name.to_string(), None);
        }
        Ok(existed)
    }

    // ── Participants ─────────────────────────────────────────────

    /// Joins a participant to the commit protocol. Joining the same
    /// participant twice has no effect.
    pub fn join(&mut self, participant: Arc<dyn DataManager>) -> StorageResult<()> {
        self.ensure_active()?;
        let joined = self
            .participants
            .iter()
            .any(|p| std::ptr::addr_eq(Arc::as_ptr(p), Arc::as_ptr(&participant)));
        if !joined {
            self.participants.push(participant);
        }
        Ok(())
    }

    /// Number of joined participants.
    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// Registers a hook that runs at the start of [`Transaction::commit`],
    /// before any participant is driven. Hooks run in registration order and
    /// may register further hooks, which run after the current ones.
    pub fn add_before_commit_hook<F>(&mut self, hook: F) -> StorageResult<()>
    where
        F: FnOnce(&mut Transaction) -> StorageResult<()> + Send + 'static,
    {
        self.ensure_active()?;
        self.hooks.push(Box::new(hook));
        Ok(())
    }

    /// Number of hooks waiting to run.
    #[must_use]
    pub fn pending_hooks(&self) -> usize {
        self.hooks.len()
    }

    // ── Savepoints ───────────────────────────────────────────────

    /// Captures pending writes and every participant's state.
    pub fn savepoint(&mut self) -> StorageResult<Savepoint> {
        self.ensure_active()?;
        self.savepoint_seq += 1;
        let seq = self.savepoint_seq;
        self.live_savepoints.push(seq);
        let points = self
            .participants
            .iter()
            .map(|p| Arc::clone(p).savepoint())
            .collect();
        Ok(Savepoint {
            txn: self.id,
            seq,
            writes: self.writes.clone(),
            points,
            participant_count: self.participants.len(),
            hook_count: self.hooks.len(),
        })
    }

    /// Restores the state captured by `savepoint`.
    ///
    /// Participants joined after the savepoint are aborted and unjoined, and
    /// hooks registered after it are discarded. Savepoints taken after this
    /// one become invalid; this one stays valid and can be rolled back to
    /// again.
    pub fn rollback(&mut self, savepoint: &Savepoint) -> StorageResult<()> {
        self.ensure_active()?;
        if savepoint.txn != self.id {
            return Err(StorageError::ForeignSavepoint {
                savepoint: savepoint.txn.get(),
                transaction: self.id.get(),
            });
        }
        let Some(pos) = self.live_savepoints.iter().position(|s| *s == savepoint.seq) else {
            return Err(StorageError::InvalidData(format!(
                "savepoint {} was invalidated by an earlier rollback",
                savepoint.seq
            )));
        };
        self.live_savepoints.truncate(pos + 1);

        self.writes = savepoint.writes.clone();
        for point in &savepoint.points {
            point.rollback();
        }
        if self.participants.len() > savepoint.participant_count {
            let discarded = self.participants.split_off(savepoint.participant_count);
            for participant in discarded {
                participant.abort(self.id);
            }
        }
        self.hooks.truncate(savepoint.hook_count);
        debug!("txn {} rolled back to savepoint {}", self.id, savepoint.seq);
        Ok(())
    }

    // ── Completion ───────────────────────────────────────────────

    /// Commits the transaction.
    ///
    /// Runs before-commit hooks, drives participants through two-phase
    /// commit in `sort_key` order and writes the transaction's roots. A
    /// conflicting root that cannot be resolved fails the commit with
    /// [`StorageError::Conflict`]; every participant is then aborted and
    /// nothing is written.
    pub fn commit(mut self) -> StorageResult<()> {
        self.ensure_active()?;

        if let Err(e) = self.run_hooks() {
            warn!("txn {} before-commit hook failed: {}", self.id, e);
            self.abort_participants();
            return Err(e);
        }

        let mut order = self.participants.clone();
        order.sort_by_cached_key(|p| p.sort_key());

        match self.two_phase(&order) {
            Ok(version) => {
                self.status = TxnStatus::Committed;
                for participant in &order {
                    participant.tpc_finish(self.id);
                }
                match version {
                    Some(version) => debug!("txn {} committed at version {}", self.id, version),
                    None => debug!("txn {} committed without root writes", self.id),
                }
                Ok(())
            }
            Err(e) => {
                self.status = TxnStatus::Aborted;
                for participant in &order {
                    participant.tpc_abort(self.id);
                }
                debug!("txn {} commit failed: {}", self.id, e);
                Err(e)
            }
        }
    }

    /// Aborts the transaction, discarding writes and notifying participants.
    pub fn abort(mut self) {
        self.abort_participants();
    }

    fn run_hooks(&mut self) -> StorageResult<()> {
        while !self.hooks.is_empty() {
            let hooks = std::mem::take(&mut self.hooks);
            for hook in hooks {
                hook(self)?;
            }
        }
        Ok(())
    }

    fn two_phase(&mut self, order: &[Arc<dyn DataManager>]) -> StorageResult<Option<u64>> {
        for participant in order {
            participant.tpc_begin(self.id)?;
        }
        for participant in order {
            participant.commit(self.id)?;
        }
        for participant in order {
            participant.tpc_vote(self.id)?;
        }
        self.db.commit_roots(self.id, &self.base, &self.writes)
    }

    fn abort_participants(&mut self) {
        if self.status != TxnStatus::Active {
            return;
        }
        self.status = TxnStatus::Aborted;
        self.writes.clear();
        self.hooks.clear();
        for participant in std::mem::take(&mut self.participants) {
            participant.abort(self.id);
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.abort_participants();
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("writes", &self.writes.keys().collect::<Vec<_>>())
            .field("participants", &self.participants.len())
            .field("hooks", &self.hooks.len())
            .finish()
    }
}
