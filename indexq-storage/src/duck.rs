//! DuckDB-backed root store.

use crate::error::{StorageError, StorageResult};
use crate::store::{Record, RootChange, RootStore};
use duckdb::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Durable root store persisting each root as a JSON row.
pub struct DuckDbRootStore {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbRootStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = crate::open_duckdb_with_wal_recovery(path)?;
        Self::open_with_conn(Arc::new(Mutex::new(conn)))
    }

    /// Opens an in-memory store.
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::open_with_conn(Arc::new(Mutex::new(conn)))
    }

    /// Uses an existing connection, creating the roots table if needed.
    pub fn open_with_conn(conn: Arc<Mutex<Connection>>) -> StorageResult<Self> {
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StorageResult<()> {
        let conn = self.conn.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS indexq_roots (
                name VARCHAR PRIMARY KEY,
                version BIGINT NOT NULL,
                state VARCHAR NOT NULL
            );
            ",
        )?;
        Ok(())
    }
}

impl RootStore for DuckDbRootStore {
    fn load(&self, name: &str) -> StorageResult<Option<Record>> {
        let conn = self.conn.lock()?;
        let row = conn.query_row(
            "SELECT version, state FROM indexq_roots WHERE name = ?",
            params![name],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
        );
        let (version, state) = match row {
            Ok(row) => row,
            Err(duckdb::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let version = u64::try_from(version)
            .map_err(|_| StorageError::InvalidData(format!("negative version for root {name}")))?;
        Ok(Some(Record {
            version,
            state: serde_json::from_str(&state)?,
        }))
    }

    fn apply(&self, version: u64, changes: &[RootChange]) -> StorageResult<()> {
        let version = i64::try_from(version)
            .map_err(|_| StorageError::InvalidData(format!("version {version} out of range")))?;
        let mut conn = self.conn.lock()?;
        let tx = conn.transaction()?;
        for change in changes {
            match &change.state {
                Some(state) => {
                    let json = serde_json::to_string(state)?;
                    tx.execute(
                        "INSERT OR REPLACE INTO indexq_roots (name, version, state) VALUES (?, ?, ?)",
                        params![change.name, version, json],
                    )?;
                }
                None => {
                    tx.execute(
                        "DELETE FROM indexq_roots WHERE name = ?",
                        params![change.name],
                    )?;
                }
            }
        }
        tx.commit()?;
        debug!("applied {} root change(s) at version {}", changes.len(), version);
        Ok(())
    }

    fn last_version(&self) -> StorageResult<u64> {
        let conn = self.conn.lock()?;
        let max: i64 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM indexq_roots",
            [],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(max).unwrap_or(0))
    }
}
