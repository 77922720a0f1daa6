//! In-process cache backend.

use crate::cache::CacheBackend;
use crate::error::StorageError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// HashMap-backed store; expired entries are dropped lazily on read or by `purge_expired`.
#[derive(Debug, Default)]
pub struct MemoryCacheBackend {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl CacheBackend for MemoryCacheBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }
        // Expired: re-check under the write lock in case a fresh put raced in.
        let mut entries = self.entries.write();
        if entries
            .get(key)
            .map(|entry| entry.is_expired(now))
            .unwrap_or(false)
        {
            entries.remove(key);
        }
        Ok(None)
    }

    fn put(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StorageError> {
        let entry = MemoryEntry {
            value: value.to_vec(),
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().insert(key.to_string(), entry);
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let now = Instant::now();
        Ok(self
            .entries
            .read()
            .get(key)
            .map(|entry| !entry.is_expired(now))
            .unwrap_or(false))
    }

    fn remove(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.write().remove(key).is_some())
    }

    fn remove_prefix(&self, prefix: &str) -> Result<usize, StorageError> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before - entries.len())
    }

    fn purge_expired(&self) -> Result<usize, StorageError> {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        Ok(before - entries.len())
    }
}
