//! Root store backends.
//!
//! A root store holds named JSON records, each stamped with the serial of
//! the commit that last wrote it. It knows nothing about transactions:
//! conflict detection and merging happen in [`Database`](crate::Database),
//! which serializes commits and hands the store one atomic batch per commit.

use crate::error::StorageResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

/// A committed root: its state and the commit serial that wrote it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Commit serial of the last write. Serials are database-wide, so a root
    /// that is removed and re-created never reuses a version.
    pub version: u64,
    /// The root's state.
    pub state: Value,
}

/// One root write inside a commit batch.
#[derive(Debug, Clone, PartialEq)]
pub struct RootChange {
    /// Root name.
    pub name: String,
    /// New state, or `None` to remove the root.
    pub state: Option<Value>,
}

/// Backend holding committed roots.
pub trait RootStore: Send + Sync {
    /// Loads the committed record for a root, if it exists.
    fn load(&self, name: &str) -> StorageResult<Option<Record>>;

    /// Applies a batch of changes atomically, stamping written roots with
    /// `version`.
    fn apply(&self, version: u64, changes: &[RootChange]) -> StorageResult<()>;

    /// Highest commit serial present in the store (0 when empty).
    fn last_version(&self) -> StorageResult<u64>;
}

/// Volatile root store for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryRootStore {
    roots: Mutex<HashMap<String, Record>>,
}

impl MemoryRootStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of roots currently stored.
    pub fn len(&self) -> StorageResult<usize> {
        Ok(self.roots.lock()?.len())
    }

    /// Returns true when no roots are stored.
    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl RootStore for MemoryRootStore {
    fn load(&self, name: &str) -> StorageResult<Option<Record>> {
        Ok(self.roots.lock()?.get(name).cloned())
    }

    fn apply(&self, version: u64, changes: &[RootChange]) -> StorageResult<()> {
        let mut roots = self.roots.lock()?;
        for change in changes {
            match &change.state {
                Some(state) => {
                    roots.insert(
                        change.name.clone(),
                        Record {
                            version,
                            state: state.clone(),
                        },
                    );
                }
                None => {
                    roots.remove(&change.name);
                }
            }
        }
        Ok(())
    }

    fn last_version(&self) -> StorageResult<u64> {
        Ok(self
            .roots
            .lock()?
            .values()
            .map(|record| record.version)
            .max()
            .unwrap_or(0))
    }
}
