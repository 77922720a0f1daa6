//! Pipeline Orchestrator
//!
//! Drives one session end to end: resolve the plan, resolve every step (cache
//! first, generator otherwise) with bounded concurrency, write results to the
//! cache, and publish them to delivery in step order. Only plan failure ends a
//! session early; individual steps always resolve, if need be to a fallback.

pub mod registry;
pub mod reorder;

pub use registry::{SessionRecord, SessionRegistry};
pub use reorder::ReorderBuffer;

use crate::cache::ActionCache;
use crate::delivery::DeliveryCoordinator;
use crate::error::PipelineError;
use crate::generation::{PlanGenerator, StepContext, StepGenerator};
use crate::lecture::{ActionChunk, Session, SessionParams, SessionStatus, StepSpec};
use crate::metrics::{PerformanceMonitor, RequestOutcome};
use crate::types::{now_millis, SessionId};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Steps resolved concurrently per session
    pub step_concurrency: usize,
    /// Age after which idle sessions are pruned
    pub session_ttl: Duration,
    /// Period of the background pruner; `None` disables it
    pub prune_interval: Option<Duration>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            step_concurrency: 3,
            session_ttl: Duration::from_secs(60 * 60),
            prune_interval: Some(Duration::from_secs(60)),
        }
    }
}

/// Outcome of one completed run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub session_id: SessionId,
    pub total_steps: usize,
    /// Steps produced by the generator in this run
    pub generated: usize,
    /// Steps served from the cache
    pub from_cache: usize,
    /// Steps delivered as fallback chunks, whichever way they were resolved
    pub fallback: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepOrigin {
    Cache,
    Generated,
}

/// Clears the running flag however the run ends.
///
/// A run dropped before [`RunGuard::finish`] (cancelled, or its runtime shut
/// down) is recorded as a failed request so the in-flight count stays balanced.
struct RunGuard<'a> {
    registry: &'a SessionRegistry,
    monitor: &'a PerformanceMonitor,
    session_id: &'a str,
    started: Instant,
    finished: bool,
}

impl RunGuard<'_> {
    fn finish(&mut self, outcome: RequestOutcome) -> Duration {
        let elapsed = self.started.elapsed();
        self.monitor.record_request_end(outcome, elapsed);
        self.finished = true;
        elapsed
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(session_id = self.session_id, "Session run dropped before finishing");
            self.monitor
                .record_request_end(RequestOutcome::Failed, self.started.elapsed());
        }
        self.registry.finish_run(self.session_id);
    }
}

pub struct PipelineOrchestrator {
    plans: PlanGenerator,
    steps: StepGenerator,
    cache: Arc<ActionCache>,
    delivery: Arc<DeliveryCoordinator>,
    monitor: Arc<PerformanceMonitor>,
    registry: SessionRegistry,
    settings: OrchestratorSettings,
    pruner: Mutex<Option<JoinHandle<()>>>,
}

impl PipelineOrchestrator {
    pub fn new(
        plans: PlanGenerator,
        steps: StepGenerator,
        cache: Arc<ActionCache>,
        delivery: Arc<DeliveryCoordinator>,
        monitor: Arc<PerformanceMonitor>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            plans,
            steps,
            cache,
            delivery,
            monitor,
            registry: SessionRegistry::new(),
            settings,
            pruner: Mutex::new(None),
        }
    }

    /// Start the periodic `prune_expired` sweep. Needs a tokio runtime; idempotent.
    pub fn start_pruner(self: &Arc<Self>) -> bool {
        let Some(period) = self.settings.prune_interval else {
            return false;
        };
        let mut pruner = self.pruner.lock();
        if pruner.as_ref().is_some_and(|task| !task.is_finished()) {
            return true;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                *pruner = Some(handle.spawn(Self::prune_loop(Arc::downgrade(self), period)));
                debug!(interval_ms = period.as_millis(), "Started session pruner");
                true
            }
            Err(_) => {
                warn!("No tokio runtime available; session pruner not started");
                false
            }
        }
    }

    /// Cancel the background sweep. Idempotent.
    pub fn stop_pruner(&self) {
        if let Some(task) = self.pruner.lock().take() {
            task.abort();
            debug!("Stopped session pruner");
        }
    }

    pub fn is_pruning(&self) -> bool {
        self.pruner
            .lock()
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    async fn prune_loop(weak: Weak<PipelineOrchestrator>, period: Duration) {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(orchestrator) = weak.upgrade() else {
                break;
            };
            orchestrator.prune_expired();
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Create and register a session without running it.
    pub fn register(&self, topic: &str, params: SessionParams) -> Result<Session, PipelineError> {
        if topic.trim().is_empty() {
            return Err(PipelineError::InvalidRequest(
                "topic cannot be empty".to_string(),
            ));
        }
        let session = Session::new(topic.trim(), params);
        self.registry.insert(session.clone());
        debug!(session_id = %session.session_id, topic = %session.topic, "Session registered");
        Ok(session)
    }

    /// Register an externally known session (e.g. restored from a persistent cache).
    pub fn adopt(&self, session: Session) -> bool {
        self.registry.insert(session)
    }

    /// Register a session and run it on a background task. Returns immediately.
    pub fn submit(self: &Arc<Self>, topic: &str, params: SessionParams) -> Result<SessionId, PipelineError> {
        let session = self.register(topic, params)?;
        self.spawn_run(session.session_id.clone());
        Ok(session.session_id)
    }

    /// Re-run a known session in the background; cached steps are replayed.
    pub fn resume(self: &Arc<Self>, session_id: &str) -> Result<(), PipelineError> {
        if !self.registry.contains(session_id) {
            return Err(PipelineError::SessionNotFound(session_id.to_string()));
        }
        self.spawn_run(session_id.to_string());
        Ok(())
    }

    fn spawn_run(self: &Arc<Self>, session_id: SessionId) {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = orchestrator.run_session(&session_id).await {
                debug!(session_id = %session_id, error = %err, "Background run ended with error");
            }
        });
    }

    /// Run the pipeline for a registered session to completion.
    pub async fn run_session(&self, session_id: &str) -> Result<SessionReport, PipelineError> {
        let session = self
            .registry
            .get(session_id)
            .map(|record| record.session)
            .ok_or_else(|| PipelineError::SessionNotFound(session_id.to_string()))?;
        if !self.registry.try_start(session_id) {
            warn!(session_id, "Session already running, not starting again");
            return Err(PipelineError::InvalidRequest(format!(
                "session {session_id} is already running"
            )));
        }
        self.monitor.record_request_start();
        let mut guard = RunGuard {
            registry: &self.registry,
            monitor: &self.monitor,
            session_id,
            started: Instant::now(),
            finished: false,
        };

        self.delivery.open_session(session_id);
        self.registry.set_status(session_id, SessionStatus::Planning);
        info!(session_id, topic = %session.topic, "Session run started");

        let plan = match self.plans.plan(&session).await {
            Ok(plan) => plan,
            Err(err) => {
                let message = err.to_string();
                error!(session_id, error = %message, "Session failed");
                self.registry.mark_failed(session_id, message.clone());
                self.delivery.fail(session_id, &message);
                guard.finish(RequestOutcome::Failed);
                return Err(err);
            }
        };

        let total_steps = plan.step_count();
        self.registry.set_total_steps(session_id, total_steps);
        self.registry
            .set_status(session_id, SessionStatus::Generating);

        let context = StepContext::for_plan(&plan);
        let mut report = SessionReport {
            session_id: session_id.to_string(),
            total_steps,
            ..SessionReport::default()
        };
        let mut reorder = ReorderBuffer::new(1);
        let session_ref = &session;
        let context_ref = &context;
        let mut resolved = stream::iter(plan.steps.clone())
            .map(move |step| async move { self.resolve_step(session_ref, &step, context_ref).await })
            .buffer_unordered(self.settings.step_concurrency.max(1));

        while let Some((chunk, origin)) = resolved.next().await {
            match origin {
                StepOrigin::Cache => report.from_cache += 1,
                StepOrigin::Generated => report.generated += 1,
            }
            if chunk.is_fallback() {
                report.fallback += 1;
            }
            for (_, ready) in reorder.push(chunk.step_id, chunk) {
                self.delivery.publish(session_id, &ready);
            }
        }
        drop(resolved);

        self.delivery.complete(session_id, total_steps);
        self.registry
            .set_status(session_id, SessionStatus::Completed);
        let elapsed = guard.finish(RequestOutcome::Succeeded);
        info!(
            session_id,
            total_steps,
            generated = report.generated,
            from_cache = report.from_cache,
            fallback = report.fallback,
            duration_ms = elapsed.as_millis(),
            "Session completed"
        );
        Ok(report)
    }

    async fn resolve_step(
        &self,
        session: &Session,
        step: &StepSpec,
        context: &StepContext,
    ) -> (ActionChunk, StepOrigin) {
        if let Some(chunk) = self.cache.get_chunk(&session.session_id, step.id) {
            debug!(session_id = %session.session_id, step_id = step.id, "Step served from cache");
            return (chunk, StepOrigin::Cache);
        }
        let chunk = self.steps.generate(step, &session.topic, context).await;
        self.cache.put_chunk(&chunk);
        (chunk, StepOrigin::Generated)
    }

    pub fn status(&self, session_id: &str) -> Option<SessionStatus> {
        self.registry.status(session_id)
    }

    /// Forget a session's registry entry and delivery state. Cached results stay.
    pub fn cleanup(&self, session_id: &str) -> bool {
        let removed = self.registry.remove(session_id).is_some();
        let forgotten = self.delivery.forget_session(session_id);
        if removed || forgotten {
            debug!(session_id, "Session cleaned up");
        }
        removed
    }

    /// Clean up idle sessions older than the session TTL and sweep expired cache entries.
    pub fn prune_expired(&self) -> usize {
        let expired = self
            .registry
            .expired(now_millis(), self.settings.session_ttl);
        for session_id in &expired {
            self.cleanup(session_id);
        }
        let purged = self.cache.purge_expired();
        if !expired.is_empty() || purged > 0 {
            info!(sessions = expired.len(), cache_entries = purged, "Pruned expired state");
        }
        expired.len()
    }
}

impl Drop for PipelineOrchestrator {
    fn drop(&mut self) {
        self.stop_pruner();
    }
}
