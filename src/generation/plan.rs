//! Plan resolution: cache first, then the backend with the shared retry discipline.

use crate::cache::{ActionCache, CacheKey};
use crate::error::PipelineError;
use crate::generation::backend::GenerationBackend;
use crate::generation::payload::parse_plan_steps;
use crate::generation::prompt::plan_request;
use crate::generation::retry::{run_with_retry, RetryPolicy};
use crate::lecture::{Plan, Session};
use crate::metrics::{AttemptKind, PerformanceMonitor};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info};

pub const DEFAULT_MAX_STEPS: usize = 12;

#[derive(Clone)]
pub struct PlanGenerator {
    backend: Arc<dyn GenerationBackend>,
    cache: Arc<ActionCache>,
    policy: RetryPolicy,
    max_steps: usize,
    reuse_plans: bool,
    monitor: Option<Arc<PerformanceMonitor>>,
}

impl PlanGenerator {
    pub fn new(backend: Arc<dyn GenerationBackend>, cache: Arc<ActionCache>, policy: RetryPolicy) -> Self {
        Self {
            backend,
            cache,
            policy,
            max_steps: DEFAULT_MAX_STEPS,
            reuse_plans: true,
            monitor: None,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    /// Whether plans may be shared between sessions with the same topic and params.
    pub fn with_plan_reuse(mut self, reuse_plans: bool) -> Self {
        self.reuse_plans = reuse_plans;
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<PerformanceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Resolve the plan for `session`, generating and caching it on a miss.
    pub async fn plan(&self, session: &Session) -> Result<Plan, PipelineError> {
        let session_id = &session.session_id;
        if let Some(plan) = self.cache.get_plan(&CacheKey::plan(session_id)) {
            debug!(session_id = %session_id, steps = plan.step_count(), "Plan cache hit");
            return Ok(plan);
        }

        let fingerprint = session.fingerprint();
        if self.reuse_plans {
            let key = CacheKey::PlanFingerprint(fingerprint.clone());
            if let Some(shared) = self.cache.get_plan(&key) {
                let plan = shared.rebind(session_id);
                info!(
                    session_id = %session_id,
                    source_session = %shared.session_id,
                    steps = plan.step_count(),
                    "Reusing cached plan for identical topic"
                );
                self.cache.put_plan(&plan, None);
                return Ok(plan);
            }
        }

        let started = Instant::now();
        let request = plan_request(session, self.max_steps);
        let backend = &self.backend;
        let max_steps = self.max_steps;
        let result = run_with_retry(
            &self.policy,
            AttemptKind::Plan,
            self.monitor.as_deref(),
            |attempt| {
                let request = &request;
                async move {
                    debug!(session_id = %request.session_id, attempt, "Generating plan");
                    let raw = backend.generate(request).await?;
                    parse_plan_steps(&raw, max_steps)
                }
            },
        )
        .await;
        if let Some(monitor) = &self.monitor {
            monitor.record_plan_time(started.elapsed().as_secs_f64() * 1000.0);
        }

        let steps = result.map_err(|exhausted| {
            error!(
                session_id = %session_id,
                attempts = exhausted.attempts,
                error = %exhausted.last,
                "Plan generation failed"
            );
            PipelineError::PlanGenerationFailure {
                session_id: session_id.clone(),
                attempts: exhausted.attempts,
                cause: exhausted.last,
            }
        })?;

        let plan = Plan {
            session_id: session_id.clone(),
            topic: session.topic.clone(),
            steps,
        };
        plan.validate()?;
        self.cache
            .put_plan(&plan, self.reuse_plans.then_some(fingerprint.as_str()));
        info!(
            session_id = %session_id,
            steps = plan.step_count(),
            duration_ms = started.elapsed().as_millis(),
            "Plan generated"
        );
        Ok(plan)
    }
}
