//! Process-wide performance monitor.
//!
//! Counters are lock-free atomics; timings and the request-rate window sit behind
//! short parking_lot critical sections. The only scheduled element is the
//! snapshot reporter started by [`PerformanceMonitor::init`], which is cancelled
//! by [`PerformanceMonitor::destroy`] or on drop.

use crate::metrics::snapshot::MetricsSnapshot;
use crate::metrics::window::{Ewma, RollingWindow};
use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Interval between periodic snapshots; `None` disables the reporter
    pub snapshot_interval: Option<Duration>,
    /// Trailing window for the requests/minute rate
    pub window: Duration,
    /// Smoothing factor for timing averages
    pub ewma_alpha: f64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            snapshot_interval: Some(Duration::from_secs(60)),
            window: Duration::from_secs(60),
            ewma_alpha: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptKind {
    Plan,
    Step,
}

#[derive(Debug, Default)]
struct Counters {
    total_requests: AtomicU64,
    succeeded_requests: AtomicU64,
    failed_requests: AtomicU64,
    in_flight_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    plan_cache_hits: AtomicU64,
    plan_cache_misses: AtomicU64,
    generation_attempts: AtomicU64,
    failed_attempts: AtomicU64,
    fallback_steps: AtomicU64,
}

#[derive(Debug)]
struct Timings {
    request: Ewma,
    plan: Ewma,
    step: Ewma,
    attempt: Ewma,
}

pub struct PerformanceMonitor {
    settings: MonitorSettings,
    started_at: Instant,
    counters: Counters,
    timings: Mutex<Timings>,
    request_window: Mutex<RollingWindow>,
    reporter: Mutex<Option<JoinHandle<()>>>,
    snapshots: watch::Sender<Option<MetricsSnapshot>>,
}

impl PerformanceMonitor {
    /// Create an isolated monitor without a background reporter.
    pub fn new(settings: MonitorSettings) -> Self {
        let alpha = settings.ewma_alpha;
        let (snapshots, _) = watch::channel(None);
        Self {
            started_at: Instant::now(),
            counters: Counters::default(),
            timings: Mutex::new(Timings {
                request: Ewma::new(alpha),
                plan: Ewma::new(alpha),
                step: Ewma::new(alpha),
                attempt: Ewma::new(alpha),
            }),
            request_window: Mutex::new(RollingWindow::new(settings.window)),
            reporter: Mutex::new(None),
            snapshots,
            settings,
        }
    }

    /// Create a shared monitor and start the periodic snapshot reporter.
    ///
    /// Must be called from within a tokio runtime for the reporter to start.
    pub fn init(settings: MonitorSettings) -> Arc<Self> {
        let monitor = Arc::new(Self::new(settings));
        if let Some(period) = monitor.settings.snapshot_interval {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let weak = Arc::downgrade(&monitor);
                    let task = handle.spawn(Self::report_loop(weak, period));
                    *monitor.reporter.lock() = Some(task);
                    debug!(interval_ms = period.as_millis(), "Started metrics reporter");
                }
                Err(_) => {
                    warn!("No tokio runtime available; metrics reporter not started");
                }
            }
        }
        monitor
    }

    /// Cancel the background reporter. Idempotent.
    pub fn destroy(&self) {
        if let Some(task) = self.reporter.lock().take() {
            task.abort();
            debug!("Stopped metrics reporter");
        }
    }

    pub fn is_reporting(&self) -> bool {
        self.reporter
            .lock()
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Receiver for the periodic snapshots emitted by the reporter.
    pub fn subscribe(&self) -> watch::Receiver<Option<MetricsSnapshot>> {
        self.snapshots.subscribe()
    }

    pub fn record_request_start(&self) {
        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);
        self.counters
            .in_flight_requests
            .fetch_add(1, Ordering::Relaxed);
        self.request_window.lock().record(Instant::now());
    }

    pub fn record_request_end(&self, outcome: RequestOutcome, duration: Duration) {
        let _ = self.counters.in_flight_requests.fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |current| Some(current.saturating_sub(1)),
        );
        match outcome {
            RequestOutcome::Succeeded => {
                self.counters
                    .succeeded_requests
                    .fetch_add(1, Ordering::Relaxed);
            }
            RequestOutcome::Failed => {
                self.counters.failed_requests.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.timings.lock().request.record(duration_ms(duration));
    }

    pub fn record_plan_time(&self, ms: f64) {
        self.timings.lock().plan.record(ms);
    }

    pub fn record_step_time(&self, ms: f64) {
        self.timings.lock().step.record(ms);
    }

    pub fn record_cache_hit(&self) {
        self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_plan_cache_hit(&self) {
        self.counters.plan_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_plan_cache_miss(&self) {
        self.counters.plan_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_generation_attempt(&self, kind: AttemptKind, latency: Duration, ok: bool) {
        self.counters
            .generation_attempts
            .fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.counters.failed_attempts.fetch_add(1, Ordering::Relaxed);
        }
        self.timings.lock().attempt.record(duration_ms(latency));
        debug!(?kind, latency_ms = latency.as_millis(), ok, "Generation attempt recorded");
    }

    pub fn record_fallback(&self) {
        self.counters.fallback_steps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_hits(&self) -> u64 {
        self.counters.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.counters.cache_misses.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = &self.counters;
        let succeeded = c.succeeded_requests.load(Ordering::Relaxed);
        let failed = c.failed_requests.load(Ordering::Relaxed);
        let finished = succeeded + failed;
        let (success_rate, failure_rate) = if finished == 0 {
            (0.0, 0.0)
        } else {
            let rate = succeeded as f64 / finished as f64;
            (rate, 1.0 - rate)
        };
        let hits = c.cache_hits.load(Ordering::Relaxed);
        let misses = c.cache_misses.load(Ordering::Relaxed);
        let cache_hit_rate = if hits + misses == 0 {
            0.0
        } else {
            hits as f64 / (hits + misses) as f64
        };
        let requests_per_minute = self.request_window.lock().per_minute(Instant::now());
        let timings = self.timings.lock();

        MetricsSnapshot {
            captured_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            uptime_secs: self.started_at.elapsed().as_secs_f64(),
            total_requests: c.total_requests.load(Ordering::Relaxed),
            succeeded_requests: succeeded,
            failed_requests: failed,
            in_flight_requests: c.in_flight_requests.load(Ordering::Relaxed),
            success_rate,
            failure_rate,
            requests_per_minute,
            avg_request_ms: timings.request.value(),
            avg_plan_ms: timings.plan.value(),
            avg_step_ms: timings.step.value(),
            avg_attempt_ms: timings.attempt.value(),
            cache_hits: hits,
            cache_misses: misses,
            cache_hit_rate,
            plan_cache_hits: c.plan_cache_hits.load(Ordering::Relaxed),
            plan_cache_misses: c.plan_cache_misses.load(Ordering::Relaxed),
            generation_attempts: c.generation_attempts.load(Ordering::Relaxed),
            failed_attempts: c.failed_attempts.load(Ordering::Relaxed),
            fallback_steps: c.fallback_steps.load(Ordering::Relaxed),
        }
    }

    async fn report_loop(weak: Weak<PerformanceMonitor>, period: Duration) {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(monitor) = weak.upgrade() else {
                break;
            };
            let snapshot = monitor.snapshot();
            info!(
                target: "lectern::metrics",
                total_requests = snapshot.total_requests,
                in_flight = snapshot.in_flight_requests,
                success_rate = snapshot.success_rate,
                requests_per_minute = snapshot.requests_per_minute,
                avg_plan_ms = snapshot.avg_plan_ms,
                avg_step_ms = snapshot.avg_step_ms,
                cache_hits = snapshot.cache_hits,
                cache_misses = snapshot.cache_misses,
                fallback_steps = snapshot.fallback_steps,
                "Pipeline metrics snapshot"
            );
            monitor.snapshots.send_replace(Some(snapshot));
        }
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(MonitorSettings {
            snapshot_interval: None,
            ..MonitorSettings::default()
        })
    }
}

impl Drop for PerformanceMonitor {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn duration_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
