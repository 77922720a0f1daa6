//! Lecture service: the external facade over the pipeline.
//!
//! Assembles cache, generators, orchestrator, delivery and monitor from a
//! [`LecternConfig`] and exposes session creation, the join/leave channel
//! protocol, status and metrics.

use crate::cache::{ActionCache, CacheBackend, MemoryCacheBackend, SledCacheBackend};
use crate::config::{CacheBackendKind, LecternConfig};
use crate::delivery::{ChannelHandle, ChannelId, ClientCommand, DeliveryCoordinator};
use crate::error::PipelineError;
use crate::generation::{GenerationBackend, HttpGenerationBackend, PlanGenerator, StepGenerator};
use crate::lecture::{Session, SessionParams};
use crate::metrics::{MetricsSnapshot, PerformanceMonitor};
use crate::orchestrator::{PipelineOrchestrator, SessionRecord, SessionReport};
use crate::types::SessionId;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub topic: String,
    #[serde(default)]
    pub params: SessionParams,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: SessionId,
}

pub struct LectureService {
    orchestrator: Arc<PipelineOrchestrator>,
    delivery: Arc<DeliveryCoordinator>,
    cache: Arc<ActionCache>,
    monitor: Arc<PerformanceMonitor>,
}

impl LectureService {
    /// Build the service with the configured HTTP backend and cache backend.
    pub fn from_config(config: &LecternConfig, workspace_root: &Path) -> Result<Self, PipelineError> {
        let backend = HttpGenerationBackend::from_config(&config.provider)
            .map_err(|e| PipelineError::ConfigError(e.to_string()))?;
        let cache_backend = open_cache_backend(config, workspace_root)?;
        Ok(Self::with_backend(config, Arc::new(backend), cache_backend))
    }

    /// Build the service around explicit backends.
    ///
    /// Starts the metrics reporter and session pruner when called inside a tokio runtime.
    pub fn with_backend(
        config: &LecternConfig,
        backend: Arc<dyn GenerationBackend>,
        cache_backend: Arc<dyn CacheBackend>,
    ) -> Self {
        let monitor = PerformanceMonitor::init(config.metrics.settings());
        let cache = Arc::new(
            ActionCache::new(cache_backend, config.cache.settings()).with_monitor(monitor.clone()),
        );
        let delivery = Arc::new(DeliveryCoordinator::new(cache.clone()));
        let policy = config.generation.retry_policy();

        let plans = PlanGenerator::new(backend.clone(), cache.clone(), policy.clone())
            .with_max_steps(config.orchestrator.max_steps)
            .with_plan_reuse(config.cache.reuse_plans)
            .with_monitor(monitor.clone());
        let steps = StepGenerator::new(backend.clone(), policy).with_monitor(monitor.clone());
        let orchestrator = Arc::new(PipelineOrchestrator::new(
            plans,
            steps,
            cache.clone(),
            delivery.clone(),
            monitor.clone(),
            config.orchestrator.settings(),
        ));
        orchestrator.start_pruner();

        info!(
            backend = backend.name(),
            cache = cache.backend_name(),
            step_concurrency = config.orchestrator.step_concurrency,
            "Lecture service ready"
        );
        Self {
            orchestrator,
            delivery,
            cache,
            monitor,
        }
    }

    /// Start a session; generation runs in the background.
    pub fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<CreateSessionResponse, PipelineError> {
        let session_id = self.orchestrator.submit(&request.topic, request.params)?;
        Ok(CreateSessionResponse { session_id })
    }

    /// Attach a channel to a session, replaying what is already available.
    pub fn join(&self, session_id: &str, channel: ChannelHandle) -> Result<usize, PipelineError> {
        if !self.is_known(session_id) {
            return Err(PipelineError::SessionNotFound(session_id.to_string()));
        }
        self.delivery.join(session_id, channel)
    }

    pub fn leave(&self, session_id: &str, channel_id: ChannelId) -> bool {
        self.delivery.leave(session_id, channel_id)
    }

    /// Apply a client command arriving on `channel`.
    pub fn dispatch(&self, command: ClientCommand, channel: &ChannelHandle) -> Result<(), PipelineError> {
        match command {
            ClientCommand::Join { session_id } => {
                self.join(&session_id, channel.clone())?;
            }
            ClientCommand::Leave { session_id } => {
                self.leave(&session_id, channel.id());
            }
        }
        Ok(())
    }

    /// Re-run a registered session in the background.
    pub fn resume(&self, session_id: &str) -> Result<(), PipelineError> {
        self.orchestrator.resume(session_id)
    }

    /// Rebuild a session from its cached plan and run it to completion.
    ///
    /// Every cached step is replayed without regeneration; steps that expired
    /// from the cache are generated again.
    pub async fn restore(&self, session_id: &str) -> Result<SessionReport, PipelineError> {
        if !self.orchestrator.registry().contains(session_id) {
            let plan = self
                .cache
                .peek_plan(session_id)
                .ok_or_else(|| PipelineError::SessionNotFound(session_id.to_string()))?;
            self.orchestrator.adopt(Session::with_id(
                session_id.to_string(),
                plan.topic,
                SessionParams::default(),
            ));
        }
        self.orchestrator.run_session(session_id).await
    }

    pub fn session_status(&self, session_id: &str) -> Option<SessionRecord> {
        self.orchestrator.registry().get(session_id)
    }

    pub fn cleanup(&self, session_id: &str) -> bool {
        self.orchestrator.cleanup(session_id)
    }

    pub fn prune_expired(&self) -> usize {
        self.orchestrator.prune_expired()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.monitor.snapshot()
    }

    pub fn subscribe_metrics(&self) -> watch::Receiver<Option<MetricsSnapshot>> {
        self.monitor.subscribe()
    }

    pub fn orchestrator(&self) -> &Arc<PipelineOrchestrator> {
        &self.orchestrator
    }

    pub fn cache(&self) -> &Arc<ActionCache> {
        &self.cache
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    /// Stop background reporting and pruning. Running sessions are not cancelled.
    pub fn shutdown(&self) {
        self.orchestrator.stop_pruner();
        self.monitor.destroy();
    }

    fn is_known(&self, session_id: &str) -> bool {
        self.orchestrator.registry().contains(session_id)
            || self.cache.peek_plan(session_id).is_some()
    }
}

fn open_cache_backend(
    config: &LecternConfig,
    workspace_root: &Path,
) -> Result<Arc<dyn CacheBackend>, PipelineError> {
    Ok(match config.cache.backend {
        CacheBackendKind::Memory => Arc::new(MemoryCacheBackend::new()),
        CacheBackendKind::Sled => {
            let path = config.cache.resolved_path(workspace_root);
            Arc::new(SledCacheBackend::open(path)?)
        }
    })
}
