//! In-memory state store
//!
//! Clones share the same backing maps, so a handle kept by a test (or by a
//! provider that "reopens" stores across task instances) observes exactly what
//! the owning task made durable.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::error::StoreError;
use crate::store::StateStore;

#[derive(Debug, Default)]
struct Inner {
    durable: BTreeMap<Vec<u8>, Vec<u8>>,
    /// Buffered writes; `None` is a pending delete
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    open: bool,
    fail_flush: Option<String>,
    flushes: u64,
}

/// Shared in-memory store with flush-failure injection
#[derive(Debug, Clone)]
pub struct MemoryStore {
    name: String,
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    /// Create a new, open, empty store
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        debug!(%name, "MemoryStore::new: called");
        Self {
            name,
            inner: Arc::new(Mutex::new(Inner {
                open: true,
                ..Default::default()
            })),
        }
    }

    /// Reopen the store, discarding anything not flushed
    pub fn reopen(&self) -> Result<(), StoreError> {
        debug!(name = %self.name, "MemoryStore::reopen: called");
        let mut inner = self.lock()?;
        inner.pending.clear();
        inner.open = true;
        Ok(())
    }

    /// Make subsequent flushes fail with `StoreError::Rejected`
    pub fn fail_flushes(&self, reason: Option<&str>) -> Result<(), StoreError> {
        debug!(name = %self.name, ?reason, "MemoryStore::fail_flushes: called");
        self.lock()?.fail_flush = reason.map(str::to_string);
        Ok(())
    }

    /// Entries that survived the last flush
    pub fn durable_entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.durable.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    /// Number of successful flushes
    pub fn flush_count(&self) -> Result<u64, StoreError> {
        Ok(self.lock()?.flushes)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Poisoned {
            name: self.name.clone(),
        })
    }

    fn lock_open(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        let inner = self.lock()?;
        if !inner.open {
            return Err(StoreError::Closed {
                name: self.name.clone(),
            });
        }
        Ok(inner)
    }
}

impl StateStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.lock_open()?.pending.insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.lock_open()?.pending.insert(key.to_vec(), None);
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let inner = self.lock_open()?;
        match inner.pending.get(key) {
            Some(pending) => Ok(pending.clone()),
            None => Ok(inner.durable.get(key).cloned()),
        }
    }

    fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let inner = self.lock_open()?;
        let mut merged = inner.durable.clone();
        for (key, value) in &inner.pending {
            match value {
                Some(value) => merged.insert(key.clone(), value.clone()),
                None => merged.remove(key),
            };
        }
        Ok(merged.into_iter().collect())
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        debug!(name = %self.name, "MemoryStore::flush: called");
        let mut inner = self.lock_open()?;
        if let Some(reason) = inner.fail_flush.clone() {
            debug!(name = %self.name, %reason, "MemoryStore::flush: injected failure");
            return Err(StoreError::Rejected {
                name: self.name.clone(),
                reason,
            });
        }
        let pending = std::mem::take(&mut inner.pending);
        for (key, value) in pending {
            match value {
                Some(value) => inner.durable.insert(key, value),
                None => inner.durable.remove(&key),
            };
        }
        inner.flushes += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), StoreError> {
        debug!(name = %self.name, "MemoryStore::close: called");
        let mut inner = self.lock()?;
        if !inner.pending.is_empty() {
            debug!(name = %self.name, discarded = inner.pending.len(), "MemoryStore::close: discarding unflushed writes");
        }
        inner.pending.clear();
        inner.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.lock().map(|inner| inner.open).unwrap_or(false)
    }
}
