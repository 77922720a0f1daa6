//! Step generation: one plan step in, one action chunk out, always.

use crate::error::PipelineError;
use crate::generation::backend::GenerationBackend;
use crate::generation::fallback::fallback_chunk;
use crate::generation::payload::parse_actions;
use crate::generation::prompt::{step_request, StepContext};
use crate::generation::retry::{run_with_retry, RetryPolicy};
use crate::lecture::{ActionChunk, StepSpec};
use crate::metrics::{AttemptKind, PerformanceMonitor};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct StepGenerator {
    backend: Arc<dyn GenerationBackend>,
    policy: RetryPolicy,
    monitor: Option<Arc<PerformanceMonitor>>,
}

impl StepGenerator {
    pub fn new(backend: Arc<dyn GenerationBackend>, policy: RetryPolicy) -> Self {
        Self {
            backend,
            policy,
            monitor: None,
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<PerformanceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Generate actions for `step`, degrading to a fallback chunk once retries are spent.
    pub async fn generate(&self, step: &StepSpec, topic: &str, context: &StepContext) -> ActionChunk {
        let started = Instant::now();
        let request = step_request(step, topic, context);
        let backend = &self.backend;

        let result = run_with_retry(
            &self.policy,
            AttemptKind::Step,
            self.monitor.as_deref(),
            |attempt| {
                let request = &request;
                async move {
                    debug!(
                        session_id = %request.session_id,
                        step_id = step.id,
                        attempt,
                        backend = backend.name(),
                        "Generating step"
                    );
                    let raw = backend.generate(request).await?;
                    parse_actions(&raw)
                }
            },
        )
        .await;

        let chunk = match result {
            Ok(actions) => ActionChunk::primary(&context.session_id, step.id, actions),
            Err(exhausted) => {
                let failure = PipelineError::step_failure(step.id, exhausted.last);
                warn!(
                    session_id = %context.session_id,
                    step_id = step.id,
                    attempts = exhausted.attempts,
                    error = %failure,
                    "Step generation failed, using fallback"
                );
                if let Some(monitor) = &self.monitor {
                    monitor.record_fallback();
                }
                fallback_chunk(&context.session_id, step)
            }
        };

        let elapsed = started.elapsed();
        if let Some(monitor) = &self.monitor {
            monitor.record_step_time(elapsed.as_secs_f64() * 1000.0);
        }
        debug!(
            session_id = %context.session_id,
            step_id = step.id,
            duration_ms = elapsed.as_millis(),
            fallback = chunk.is_fallback(),
            "Step resolved"
        );
        chunk
    }
}
