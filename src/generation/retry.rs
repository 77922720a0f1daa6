//! Bounded retry loop shared by plan and step generation.
//!
//! Every attempt runs under its own timeout. Retryable failures back off
//! exponentially (`base * 2^(n-1)`, capped); non-retryable ones end the loop.

use crate::error::GenerationError;
use crate::metrics::{AttemptKind, PerformanceMonitor};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub attempt_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            attempt_timeout: Duration::from_secs(30),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_max)
    }
}

/// All attempts failed; carries the last cause.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryExhausted {
    pub attempts: u32,
    pub last: GenerationError,
}

enum AttemptOutcome<T> {
    Success(T),
    Retryable(GenerationError),
    Fatal(GenerationError),
}

/// Run `attempt` until it succeeds, fails fatally, or the policy is exhausted.
///
/// The closure receives the 1-based attempt number. Each attempt is reported to
/// the monitor with its latency, whatever the outcome.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    kind: AttemptKind,
    monitor: Option<&PerformanceMonitor>,
    mut attempt: F,
) -> Result<T, RetryExhausted>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, GenerationError>>,
{
    let max_attempts = policy.max_attempts();
    let mut attempt_no = 0;
    loop {
        attempt_no += 1;
        let started = Instant::now();
        let outcome = match tokio::time::timeout(policy.attempt_timeout, attempt(attempt_no)).await
        {
            Ok(Ok(value)) => AttemptOutcome::Success(value),
            Ok(Err(err)) if err.is_retryable() => AttemptOutcome::Retryable(err),
            Ok(Err(err)) => AttemptOutcome::Fatal(err),
            Err(_) => AttemptOutcome::Retryable(GenerationError::Timeout(policy.attempt_timeout)),
        };
        let latency = started.elapsed();
        if let Some(monitor) = monitor {
            monitor.record_generation_attempt(
                kind,
                latency,
                matches!(outcome, AttemptOutcome::Success(_)),
            );
        }

        match outcome {
            AttemptOutcome::Success(value) => return Ok(value),
            AttemptOutcome::Fatal(err) => {
                warn!(?kind, attempt = attempt_no, error = %err, "Generation failed, not retryable");
                return Err(RetryExhausted {
                    attempts: attempt_no,
                    last: err,
                });
            }
            AttemptOutcome::Retryable(err) => {
                if attempt_no >= max_attempts {
                    warn!(?kind, attempts = attempt_no, error = %err, "Generation retries exhausted");
                    return Err(RetryExhausted {
                        attempts: attempt_no,
                        last: err,
                    });
                }
                let delay = policy.backoff(attempt_no);
                debug!(
                    ?kind,
                    attempt = attempt_no,
                    latency_ms = latency.as_millis(),
                    backoff_ms = delay.as_millis(),
                    error = %err,
                    "Generation attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
