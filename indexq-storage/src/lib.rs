//! Transactional root storage for indexq.
//!
//! Provides the storage collaborator the action queue runs on: named JSON
//! roots, transactions with two-phase-commit participants and savepoints,
//! and optimistic concurrency with per-root conflict resolution.
//!
//! # Architecture
//!
//! - A [`RootStore`] holds committed roots stamped with commit serials
//!   ([`MemoryRootStore`] for tests, [`DuckDbRootStore`] on disk)
//! - A [`Database`] serializes commits and owns the resolver table
//! - A [`Transaction`] reads roots lazily, buffers writes and drives its
//!   [`DataManager`] participants through commit or abort
//! - A [`ResolveConflict`] merges a root that another commit changed after
//!   the committing transaction read it; without one the commit fails with
//!   [`ConflictError`]

mod database;
mod duck;
mod error;
mod participant;
mod resolve;
mod store;
mod transaction;

pub use database::Database;
pub use duck::DuckDbRootStore;
pub use error::{ConflictError, StorageError, StorageResult};
pub use participant::{DataManager, RollbackPoint};
pub use resolve::ResolveConflict;
pub use store::{MemoryRootStore, Record, RootChange, RootStore};
pub use transaction::{Savepoint, Transaction, TxnId, TxnStatus};

use tracing::warn;

/// Open a DuckDB connection with stale WAL recovery.
///
/// If the initial open fails and a `.wal` file exists alongside the database,
/// it is removed and the open is retried once. This handles the common case
/// where an unclean shutdown leaves a WAL file that prevents reopening.
pub fn open_duckdb_with_wal_recovery(path: &std::path::Path) -> StorageResult<duckdb::Connection> {
    match duckdb::Connection::open(path) {
        Ok(conn) => Ok(conn),
        Err(first_err) => {
            let wal_path = path.with_extension(
                path.extension()
                    .map(|ext| format!("{}.wal", ext.to_string_lossy()))
                    .unwrap_or_else(|| "wal".to_string()),
            );
            if wal_path.exists() {
                warn!(
                    "DuckDB open failed, removing stale WAL and retrying: {}",
                    wal_path.display()
                );
                if std::fs::remove_file(&wal_path).is_ok() {
                    return duckdb::Connection::open(path).map_err(Into::into);
                }
            }
            Err(first_err.into())
        }
    }
}
