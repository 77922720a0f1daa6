//! Persistent cache backend on sled.
//!
//! Each value is wrapped in a bincode-encoded [`StoredEntry`] carrying its
//! absolute expiry, so TTLs survive restarts.

use crate::cache::CacheBackend;
use crate::error::StorageError;
use crate::types::now_millis;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const CACHE_TREE: &str = "lectern_cache";

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    expires_at_ms: u64,
    value: Vec<u8>,
}

impl StoredEntry {
    fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

pub struct SledCacheBackend {
    tree: sled::Tree,
}

impl SledCacheBackend {
    /// Open (or create) a cache database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)
            .map_err(|e| StorageError::Backend(format!("Failed to open sled database: {}", e)))?;
        Self::from_db(&db)
    }

    pub fn from_db(db: &sled::Db) -> Result<Self, StorageError> {
        let tree = db
            .open_tree(CACHE_TREE)
            .map_err(|e| StorageError::Backend(format!("Failed to open cache tree: {}", e)))?;
        Ok(Self { tree })
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.tree
            .flush()
            .map_err(|e| StorageError::Backend(format!("Failed to flush cache: {}", e)))?;
        Ok(())
    }

    fn decode(bytes: &[u8]) -> Result<StoredEntry, StorageError> {
        bincode::deserialize(bytes).map_err(|e| {
            StorageError::Serialization(format!("Failed to deserialize cache entry: {}", e))
        })
    }

    fn read(&self, key: &str) -> Result<Option<StoredEntry>, StorageError> {
        let raw = self
            .tree
            .get(key.as_bytes())
            .map_err(|e| StorageError::Backend(format!("Failed to read cache entry: {}", e)))?;
        match raw {
            Some(bytes) => {
                let entry = Self::decode(&bytes)?;
                if entry.is_expired(now_millis()) {
                    // Drop lazily; a failed removal only leaves garbage behind for purge.
                    let _ = self.tree.remove(key.as_bytes());
                    Ok(None)
                } else {
                    Ok(Some(entry))
                }
            }
            None => Ok(None),
        }
    }
}

impl CacheBackend for SledCacheBackend {
    fn name(&self) -> &'static str {
        "sled"
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.read(key)?.map(|entry| entry.value))
    }

    fn put(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StorageError> {
        let entry = StoredEntry {
            expires_at_ms: now_millis().saturating_add(ttl.as_millis() as u64),
            value: value.to_vec(),
        };
        let bytes = bincode::serialize(&entry).map_err(|e| {
            StorageError::Serialization(format!("Failed to serialize cache entry: {}", e))
        })?;
        self.tree
            .insert(key.as_bytes(), bytes)
            .map_err(|e| StorageError::Backend(format!("Failed to write cache entry: {}", e)))?;
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.read(key)?.is_some())
    }

    fn remove(&self, key: &str) -> Result<bool, StorageError> {
        let removed = self
            .tree
            .remove(key.as_bytes())
            .map_err(|e| StorageError::Backend(format!("Failed to remove cache entry: {}", e)))?;
        Ok(removed.is_some())
    }

    fn remove_prefix(&self, prefix: &str) -> Result<usize, StorageError> {
        let mut batch = sled::Batch::default();
        let mut count = 0;
        for item in self.tree.scan_prefix(prefix.as_bytes()) {
            let (key, _) =
                item.map_err(|e| StorageError::Backend(format!("Failed to scan cache: {}", e)))?;
            batch.remove(key);
            count += 1;
        }
        self.tree
            .apply_batch(batch)
            .map_err(|e| StorageError::Backend(format!("Failed to remove cache entries: {}", e)))?;
        Ok(count)
    }

    fn purge_expired(&self) -> Result<usize, StorageError> {
        let now = now_millis();
        let mut batch = sled::Batch::default();
        let mut count = 0;
        for item in self.tree.iter() {
            let (key, value) =
                item.map_err(|e| StorageError::Backend(format!("Failed to scan cache: {}", e)))?;
            // Undecodable records are unusable either way.
            let expired = Self::decode(&value)
                .map(|entry| entry.is_expired(now))
                .unwrap_or(true);
            if expired {
                batch.remove(key);
                count += 1;
            }
        }
        self.tree
            .apply_batch(batch)
            .map_err(|e| StorageError::Backend(format!("Failed to purge cache: {}", e)))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache");
        {
            let backend = SledCacheBackend::open(&path).unwrap();
            backend
                .put("plan:s1", b"{\"plan\":1}", Duration::from_secs(60))
                .unwrap();
            backend.flush().unwrap();
        }
        let backend = SledCacheBackend::open(&path).unwrap();
        assert_eq!(
            backend.get("plan:s1").unwrap(),
            Some(b"{\"plan\":1}".to_vec())
        );
    }

    #[test]
    fn expired_entries_read_as_absent() {
        let dir = TempDir::new().unwrap();
        let backend = SledCacheBackend::open(dir.path().join("cache")).unwrap();
        backend.put("chunk:s1:1", b"x", Duration::ZERO).unwrap();
        backend.put("chunk:s1:2", b"y", Duration::from_secs(60)).unwrap();
        assert_eq!(backend.get("chunk:s1:1").unwrap(), None);
        assert!(backend.exists("chunk:s1:2").unwrap());
    }

    #[test]
    fn purge_and_prefix_removal() {
        let dir = TempDir::new().unwrap();
        let backend = SledCacheBackend::open(dir.path().join("cache")).unwrap();
        backend.put("chunk:s1:1", b"x", Duration::ZERO).unwrap();
        backend.put("chunk:s1:2", b"x", Duration::from_secs(60)).unwrap();
        backend.put("chunk:s2:1", b"x", Duration::from_secs(60)).unwrap();

        assert_eq!(backend.purge_expired().unwrap(), 1);
        assert_eq!(backend.remove_prefix("chunk:s1:").unwrap(), 1);
        assert!(backend.exists("chunk:s2:1").unwrap());
    }
}
