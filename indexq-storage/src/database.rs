//! Shared database handle and the commit pipeline.

use crate::duck::DuckDbRootStore;
use crate::error::{ConflictError, StorageResult};
use crate::resolve::ResolveConflict;
use crate::store::{MemoryRootStore, Record, RootChange, RootStore};
use crate::transaction::{Transaction, TxnId};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info};

/// Handle to a root store plus its commit machinery.
///
/// Cloning is cheap; every clone talks to the same store, resolver table and
/// commit lock. Each [`Transaction`] obtained from [`Database::begin`] sees
/// roots as of its first read of them and validates its writes optimistically
/// at commit time.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn RootStore>,
    resolvers: RwLock<HashMap<String, Arc<dyn ResolveConflict>>>,
    /// Guards the commit pipeline; holds the last committed serial.
    commit_lock: Mutex<u64>,
}

impl Database {
    /// Wraps an existing root store.
    pub fn new(store: Arc<dyn RootStore>) -> StorageResult<Self> {
        let last_version = store.last_version()?;
        Ok(Self {
            inner: Arc::new(Inner {
                store,
                resolvers: RwLock::new(HashMap::new()),
                commit_lock: Mutex::new(last_version),
            }),
        })
    }

    /// Creates a database over a fresh volatile store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(Inner {
                store: Arc::new(MemoryRootStore::new()),
                resolvers: RwLock::new(HashMap::new()),
                commit_lock: Mutex::new(0),
            }),
        }
    }

    /// Opens (or creates) a durable database backed by DuckDB.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let store = DuckDbRootStore::open(path)?;
        let db = Self::new(Arc::new(store))?;
        info!("opened root store at {}", path.display());
        Ok(db)
    }

    /// Starts a transaction with a fresh view of the store.
    pub fn begin(&self) -> Transaction {
        Transaction::new(TxnId::next(), self.clone())
    }

    /// Registers the resolver consulted when `root` diverges at commit time.
    /// Replaces any resolver previously registered for the same root.
    pub fn register_resolver(
        &self,
        root: impl Into<String>,
        resolver: Arc<dyn ResolveConflict>,
    ) -> StorageResult<()> {
        self.inner.resolvers.write()?.insert(root.into(), resolver);
        Ok(())
    }

    /// Returns true if a resolver is registered for `root`.
    pub fn has_resolver(&self, root: &str) -> StorageResult<bool> {
        Ok(self.inner.resolvers.read()?.contains_key(root))
    }

    /// Reads the latest committed state of a root outside any transaction.
    pub fn read(&self, root: &str) -> StorageResult<Option<Value>> {
        Ok(self.inner.store.load(root)?.map(|record| record.state))
    }

    /// Serial of the most recent commit that wrote anything.
    pub fn last_version(&self) -> StorageResult<u64> {
        Ok(*self.inner.commit_lock.lock()?)
    }

    pub(crate) fn load(&self, root: &str) -> StorageResult<Option<Record>> {
        self.inner.store.load(root)
    }

    /// Validates and writes a transaction's roots as one batch.
    ///
    /// `base` holds the record each written root had when the transaction
    /// first observed it. Returns the new commit serial, or `None` when there
    /// was nothing to write.
    pub(crate) fn commit_roots(
        &self,
        txn: TxnId,
        base: &HashMap<String, Option<Record>>,
        writes: &BTreeMap<String, Option<Value>>,
    ) -> StorageResult<Option<u64>> {
        if writes.is_empty() {
            return Ok(None);
        }

        let mut last_version = self.inner.commit_lock.lock()?;
        let mut changes = Vec::with_capacity(writes.len());
        for (name, new_state) in writes {
            let old = base.get(name).cloned().flatten();
            let current = self.inner.store.load(name)?;
            let unchanged = old.as_ref().map(|r| r.version) == current.as_ref().map(|r| r.version);
            let state = if unchanged {
                new_state.clone()
            } else {
                Some(self.resolve(name, old, current, new_state.as_ref())?)
            };
            changes.push(RootChange {
                name: name.clone(),
                state,
            });
        }

        let version = *last_version + 1;
        self.inner.store.apply(version, &changes)?;
        *last_version = version;
        debug!("txn {} committed {} root(s) at version {}", txn, changes.len(), version);
        Ok(Some(version))
    }

    fn resolve(
        &self,
        name: &str,
        old: Option<Record>,
        committed: Option<Record>,
        new: Option<&Value>,
    ) -> StorageResult<Value> {
        let (Some(old), Some(committed), Some(new)) = (old, committed, new) else {
            return Err(ConflictError::new(name, "root was created or removed concurrently").into());
        };
        let resolver = self.inner.resolvers.read()?.get(name).cloned();
        let Some(resolver) = resolver else {
            return Err(ConflictError::new(name, "no resolver registered").into());
        };
        let merged = resolver.resolve(name, &old.state, &committed.state, new)?;
        debug!(
            "resolved conflict on {} (base version {}, committed version {})",
            name, old.version, committed.version
        );
        Ok(merged)
    }
}
