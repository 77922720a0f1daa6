use serde::{Deserialize, Serialize};
use std::fmt;

/// Immutable point-in-time view of the performance monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub captured_at: String,
    pub uptime_secs: f64,
    pub total_requests: u64,
    pub succeeded_requests: u64,
    pub failed_requests: u64,
    pub in_flight_requests: u64,
    pub success_rate: f64,
    pub failure_rate: f64,
    pub requests_per_minute: f64,
    pub avg_request_ms: f64,
    pub avg_plan_ms: f64,
    pub avg_step_ms: f64,
    pub avg_attempt_ms: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub plan_cache_hits: u64,
    pub plan_cache_misses: u64,
    pub generation_attempts: u64,
    pub failed_attempts: u64,
    pub fallback_steps: u64,
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pipeline metrics @ {}", self.captured_at)?;
        writeln!(
            f,
            "  requests: {} total, {} ok, {} failed, {} in flight ({:.1}% success, {:.1}/min)",
            self.total_requests,
            self.succeeded_requests,
            self.failed_requests,
            self.in_flight_requests,
            self.success_rate * 100.0,
            self.requests_per_minute
        )?;
        writeln!(
            f,
            "  timings: request {:.0}ms, plan {:.0}ms, step {:.0}ms, attempt {:.0}ms",
            self.avg_request_ms, self.avg_plan_ms, self.avg_step_ms, self.avg_attempt_ms
        )?;
        writeln!(
            f,
            "  cache: {} hits, {} misses ({:.1}% hit rate), plans {} hits / {} misses",
            self.cache_hits,
            self.cache_misses,
            self.cache_hit_rate * 100.0,
            self.plan_cache_hits,
            self.plan_cache_misses
        )?;
        write!(
            f,
            "  generation: {} attempts, {} failed, {} fallback steps",
            self.generation_attempts, self.failed_attempts, self.fallback_steps
        )
    }
}
