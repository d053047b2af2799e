//! SQLite-backed state store
//!
//! Writes are buffered in memory and committed in a single transaction on
//! `flush`, so the durable file only ever moves from one flushed state to the
//! next.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::store::StateStore;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (
    key   BLOB PRIMARY KEY,
    value BLOB NOT NULL
)";

/// Durable key-value store in a single SQLite file
pub struct SqliteStore {
    name: String,
    path: PathBuf,
    conn: Option<Connection>,
    /// Buffered writes; `None` is a pending delete
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl SqliteStore {
    /// Open or create the store file at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        debug!(path = %path.display(), "SqliteStore::open: called");

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.execute(SCHEMA, [])?;

        info!(%name, path = %path.display(), "Opened SQLite store");
        Ok(Self {
            name,
            path,
            conn: Some(conn),
            pending: BTreeMap::new(),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<&Connection, StoreError> {
        self.conn.as_ref().ok_or_else(|| StoreError::Closed {
            name: self.name.clone(),
        })
    }
}

impl StateStore for SqliteStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.conn()?;
        self.pending.insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.conn()?;
        self.pending.insert(key.to_vec(), None);
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let conn = self.conn()?;
        if let Some(pending) = self.pending.get(key) {
            return Ok(pending.clone());
        }
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get::<_, Vec<u8>>(0))
            .optional()?;
        Ok(value)
    }

    fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key, value FROM kv ORDER BY key")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?)))?;

        let mut merged = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            merged.insert(key, value);
        }
        for (key, value) in &self.pending {
            match value {
                Some(value) => merged.insert(key.clone(), value.clone()),
                None => merged.remove(key),
            };
        }
        Ok(merged.into_iter().collect())
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        debug!(name = %self.name, pending = self.pending.len(), "SqliteStore::flush: called");
        let conn = self.conn.as_mut().ok_or_else(|| StoreError::Closed {
            name: self.name.clone(),
        })?;
        if self.pending.is_empty() {
            debug!(name = %self.name, "SqliteStore::flush: nothing buffered");
            return Ok(());
        }

        let tx = conn.transaction()?;
        for (key, value) in &self.pending {
            match value {
                Some(value) => {
                    tx.execute(
                        "INSERT INTO kv (key, value) VALUES (?1, ?2)
                         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                        params![key, value],
                    )?;
                }
                None => {
                    tx.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
                }
            }
        }
        tx.commit()?;

        self.pending.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<(), StoreError> {
        debug!(name = %self.name, "SqliteStore::close: called");
        if !self.pending.is_empty() {
            debug!(name = %self.name, discarded = self.pending.len(), "SqliteStore::close: discarding unflushed writes");
            self.pending.clear();
        }
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
            info!(name = %self.name, "Closed SQLite store");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.conn.is_some()
    }
}
