//! Action Cache
//!
//! Keyed store for generated plans and per-step action chunks. Keys are
//! deterministic strings derived from the session id (and step id, or the
//! topic+params fingerprint for reusable plans). The cache is the single source
//! of truth shared by the orchestrator (writer) and delivery (replay reader).
//!
//! A backend outage never fails the pipeline: reads degrade to a miss and
//! writes are best-effort.

pub mod memory;
pub mod sled_store;

pub use memory::MemoryCacheBackend;
pub use sled_store::SledCacheBackend;

use crate::error::{PipelineError, StorageError};
use crate::lecture::{ActionChunk, ChunkSource, Plan};
use crate::metrics::PerformanceMonitor;
use crate::types::{SessionId, StepId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Raw byte store with per-entry TTL. Implementations must be safe for concurrent use.
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &'static str;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    fn put(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StorageError>;
    fn exists(&self, key: &str) -> Result<bool, StorageError>;
    fn remove(&self, key: &str) -> Result<bool, StorageError>;
    fn remove_prefix(&self, prefix: &str) -> Result<usize, StorageError>;
    fn purge_expired(&self) -> Result<usize, StorageError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// `plan:{sessionId}`
    Plan(SessionId),
    /// `plan-fp:{fingerprint}`
    PlanFingerprint(String),
    /// `chunk:{sessionId}:{stepId}`
    Chunk(SessionId, StepId),
}

impl CacheKey {
    pub fn chunk(session_id: &str, step_id: StepId) -> Self {
        CacheKey::Chunk(session_id.to_string(), step_id)
    }

    pub fn plan(session_id: &str) -> Self {
        CacheKey::Plan(session_id.to_string())
    }

    pub fn is_chunk(&self) -> bool {
        matches!(self, CacheKey::Chunk(..))
    }

    /// Prefix covering every chunk key of a session.
    pub fn chunk_prefix(session_id: &str) -> String {
        format!("chunk:{session_id}:")
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Plan(session_id) => write!(f, "plan:{session_id}"),
            CacheKey::PlanFingerprint(fingerprint) => write!(f, "plan-fp:{fingerprint}"),
            CacheKey::Chunk(session_id, step_id) => write!(f, "chunk:{session_id}:{step_id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheEntry {
    Plan(Plan),
    Chunk(ActionChunk),
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// TTL for plans and primary chunks
    pub ttl: Duration,
    /// TTL for fallback chunks, kept short so later runs can regenerate them
    pub fallback_ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60 * 60),
            fallback_ttl: Duration::from_secs(60),
        }
    }
}

pub struct ActionCache {
    backend: Arc<dyn CacheBackend>,
    monitor: Option<Arc<PerformanceMonitor>>,
    settings: CacheSettings,
}

impl ActionCache {
    pub fn new(backend: Arc<dyn CacheBackend>, settings: CacheSettings) -> Self {
        Self {
            backend,
            monitor: None,
            settings,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCacheBackend::new()), CacheSettings::default())
    }

    pub fn with_monitor(mut self, monitor: Arc<PerformanceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Counted lookup: every call records a hit or a miss with the monitor.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.load(key);
        if let Some(monitor) = &self.monitor {
            match (key.is_chunk(), entry.is_some()) {
                (true, true) => monitor.record_cache_hit(),
                (true, false) => monitor.record_cache_miss(),
                (false, true) => monitor.record_plan_cache_hit(),
                (false, false) => monitor.record_plan_cache_miss(),
            }
        }
        entry
    }

    /// Uncounted lookup used for replay reads.
    pub fn peek(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.load(key)
    }

    /// Best-effort write; returns whether the backend accepted it.
    pub fn put(&self, key: &CacheKey, entry: &CacheEntry, ttl: Duration) -> bool {
        let key_str = key.to_string();
        let bytes = match serde_json::to_vec(entry) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(key = %key_str, error = %err, "Failed to serialize cache entry");
                return false;
            }
        };
        match self.backend.put(&key_str, &bytes, ttl) {
            Ok(()) => {
                debug!(key = %key_str, bytes = bytes.len(), ttl_secs = ttl.as_secs(), "Cache write");
                true
            }
            Err(err) => {
                warn!(
                    key = %key_str,
                    backend = self.backend.name(),
                    error = %self.unavailable(err),
                    "Cache unavailable, write skipped"
                );
                false
            }
        }
    }

    pub fn exists(&self, key: &CacheKey) -> bool {
        let key_str = key.to_string();
        match self.backend.exists(&key_str) {
            Ok(exists) => exists,
            Err(err) => {
                warn!(
                    key = %key_str,
                    error = %self.unavailable(err),
                    "Cache unavailable, treating as absent"
                );
                false
            }
        }
    }

    pub fn get_plan(&self, key: &CacheKey) -> Option<Plan> {
        match self.get(key)? {
            CacheEntry::Plan(plan) => Some(plan),
            CacheEntry::Chunk(_) => {
                warn!(key = %key, "Cache key holds a chunk where a plan was expected");
                None
            }
        }
    }

    pub fn get_chunk(&self, session_id: &str, step_id: StepId) -> Option<ActionChunk> {
        Self::expect_chunk(self.get(&CacheKey::chunk(session_id, step_id)))
    }

    pub fn peek_chunk(&self, session_id: &str, step_id: StepId) -> Option<ActionChunk> {
        Self::expect_chunk(self.peek(&CacheKey::chunk(session_id, step_id)))
    }

    pub fn peek_plan(&self, session_id: &str) -> Option<Plan> {
        match self.peek(&CacheKey::plan(session_id))? {
            CacheEntry::Plan(plan) => Some(plan),
            CacheEntry::Chunk(_) => None,
        }
    }

    /// Store a plan under its session key and, if given, its fingerprint key.
    pub fn put_plan(&self, plan: &Plan, fingerprint: Option<&str>) -> bool {
        let entry = CacheEntry::Plan(plan.clone());
        let mut stored = self.put(&CacheKey::plan(&plan.session_id), &entry, self.settings.ttl);
        if let Some(fingerprint) = fingerprint {
            stored &= self.put(
                &CacheKey::PlanFingerprint(fingerprint.to_string()),
                &entry,
                self.settings.ttl,
            );
        }
        stored
    }

    pub fn put_chunk(&self, chunk: &ActionChunk) -> bool {
        let ttl = match chunk.source {
            ChunkSource::Primary => self.settings.ttl,
            ChunkSource::Fallback => self.settings.fallback_ttl,
        };
        self.put(
            &CacheKey::chunk(&chunk.session_id, chunk.step_id),
            &CacheEntry::Chunk(chunk.clone()),
            ttl,
        )
    }

    /// Drop a session's plan and chunk keys. Fingerprint entries are shared and kept.
    pub fn remove_session(&self, session_id: &str) -> usize {
        let mut removed = 0;
        match self.backend.remove(&CacheKey::plan(session_id).to_string()) {
            Ok(true) => removed += 1,
            Ok(false) => {}
            Err(err) => {
                warn!(session_id, error = %self.unavailable(err), "Failed to remove cached plan")
            }
        }
        match self.backend.remove_prefix(&CacheKey::chunk_prefix(session_id)) {
            Ok(count) => removed += count,
            Err(err) => {
                warn!(session_id, error = %self.unavailable(err), "Failed to remove cached chunks")
            }
        }
        removed
    }

    pub fn purge_expired(&self) -> usize {
        match self.backend.purge_expired() {
            Ok(count) => count,
            Err(err) => {
                warn!(error = %self.unavailable(err), "Failed to purge expired cache entries");
                0
            }
        }
    }

    fn load(&self, key: &CacheKey) -> Option<CacheEntry> {
        let key_str = key.to_string();
        let raw = match self.backend.get(&key_str) {
            Ok(raw) => raw?,
            Err(err) => {
                warn!(
                    key = %key_str,
                    backend = self.backend.name(),
                    error = %self.unavailable(err),
                    "Cache unavailable, treating lookup as miss"
                );
                return None;
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(key = %key_str, error = %err, "Discarding undecodable cache entry");
                None
            }
        }
    }

    fn unavailable(&self, err: StorageError) -> PipelineError {
        PipelineError::CacheUnavailable(format!("{} backend: {}", self.backend.name(), err))
    }

    fn expect_chunk(entry: Option<CacheEntry>) -> Option<ActionChunk> {
        match entry? {
            CacheEntry::Chunk(chunk) => Some(chunk),
            CacheEntry::Plan(_) => None,
        }
    }
}
