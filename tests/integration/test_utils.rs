//! Shared test utilities for integration tests
//!
//! A scriptable generation backend, service builders, and event collection.

use async_trait::async_trait;
use lectern::cache::{CacheBackend, MemoryCacheBackend};
use lectern::config::LecternConfig;
use lectern::delivery::{ChannelHandle, DeliveryEvent};
use lectern::generation::{GenerationBackend, GenerationRequest, RequestKind};
use lectern::types::StepId;
use lectern::{GenerationError, LectureService};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

/// Global mutex to serialize environment variable access across tests
static ENV_MUTEX: StdMutex<()> = StdMutex::new(());

/// Generation backend driven by a per-test script.
///
/// Plans list `steps` steps; step replies are a single label action naming
/// the step. Failures and delays are configured per step.
#[derive(Default)]
pub struct ScriptBackend {
    steps: usize,
    plan_down: bool,
    steps_down: AtomicBool,
    failures: Mutex<HashMap<StepId, u32>>,
    delays: HashMap<StepId, std::time::Duration>,
    plan_calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    step_calls: Mutex<HashMap<StepId, usize>>,
}

impl ScriptBackend {
    pub fn new(steps: usize) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }

    /// Every plan request fails with a transport error.
    pub fn plan_down(mut self) -> Self {
        self.plan_down = true;
        self
    }

    /// Every step request fails with a transport error.
    pub fn steps_down(self) -> Self {
        self.steps_down.store(true, Ordering::SeqCst);
        self
    }

    /// The first `times` requests for `step_id` fail.
    pub fn fail_step(self, step_id: StepId, times: u32) -> Self {
        self.failures.lock().insert(step_id, times);
        self
    }

    pub fn delay_step(mut self, step_id: StepId, delay: std::time::Duration) -> Self {
        self.delays.insert(step_id, delay);
        self
    }

    pub fn plan_calls(&self) -> usize {
        self.plan_calls.load(Ordering::SeqCst)
    }

    pub fn step_calls(&self, step_id: StepId) -> usize {
        self.step_calls.lock().get(&step_id).copied().unwrap_or(0)
    }

    /// Highest number of step requests that were running at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn total_step_calls(&self) -> usize {
        self.step_calls.lock().values().sum()
    }

    fn plan_reply(&self) -> String {
        let steps: Vec<_> = (1..=self.steps)
            .map(|id| json!({"id": id, "tag": format!("part-{id}"), "desc": format!("Part {id}")}))
            .collect();
        json!({ "steps": steps }).to_string()
    }
}

#[async_trait]
impl GenerationBackend for ScriptBackend {
    fn name(&self) -> &str {
        "script"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        match request.kind {
            RequestKind::Plan => {
                self.plan_calls.fetch_add(1, Ordering::SeqCst);
                if self.plan_down {
                    return Err(GenerationError::Transport("plan backend down".to_string()));
                }
                Ok(self.plan_reply())
            }
            RequestKind::Step => {
                let step_id = request.step_id.unwrap_or(0);
                *self.step_calls.lock().entry(step_id).or_insert(0) += 1;
                let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
                if let Some(delay) = self.delays.get(&step_id) {
                    tokio::time::sleep(*delay).await;
                }
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                if self.steps_down.load(Ordering::SeqCst) {
                    return Err(GenerationError::Transport("step backend down".to_string()));
                }
                {
                    let mut failures = self.failures.lock();
                    if let Some(left) = failures.get_mut(&step_id) {
                        if *left > 0 {
                            *left -= 1;
                            return Err(GenerationError::HttpStatus {
                                status: 503,
                                body: "overloaded".to_string(),
                            });
                        }
                    }
                }
                Ok(json!([{"op": "drawLabel", "text": format!("step {step_id}")}]).to_string())
            }
        }
    }
}

/// Defaults with fast backoff and no periodic metrics reporter.
pub fn test_config() -> LecternConfig {
    let mut config = LecternConfig::default();
    config.metrics.snapshot_interval_secs = 0;
    config.generation.backoff_base_ms = 10;
    config.generation.backoff_max_ms = 40;
    config
}

pub fn service_with(backend: Arc<ScriptBackend>) -> LectureService {
    service_on(backend, Arc::new(MemoryCacheBackend::new()))
}

pub fn service_on(backend: Arc<ScriptBackend>, cache: Arc<dyn CacheBackend>) -> LectureService {
    LectureService::with_backend(&test_config(), backend, cache)
}

/// Receive events until (and including) the terminal one.
pub async fn collect_until_terminal(rx: &mut UnboundedReceiver<DeliveryEvent>) -> Vec<DeliveryEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            break;
        }
    }
    events
}

/// Events already queued on the channel, without waiting.
pub fn drain(rx: &mut UnboundedReceiver<DeliveryEvent>) -> Vec<DeliveryEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn rendered_steps(events: &[DeliveryEvent]) -> Vec<StepId> {
    events.iter().filter_map(DeliveryEvent::step_id).collect()
}

pub fn join(service: &LectureService, session_id: &str) -> UnboundedReceiver<DeliveryEvent> {
    let (handle, rx) = ChannelHandle::pair();
    service.join(session_id, handle).unwrap();
    rx
}

/// Run `f` with XDG_CONFIG_HOME and HOME pointed into `test_dir`.
pub fn with_isolated_env<F, R>(test_dir: &TempDir, f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let saved: Vec<(&str, Option<String>)> = ["HOME", "XDG_CONFIG_HOME", "LECTERN_ENV", "LECTERN_API_KEY"]
        .into_iter()
        .map(|key| (key, std::env::var(key).ok()))
        .collect();

    let home = test_dir.path().join("home");
    std::fs::create_dir_all(&home).unwrap();
    std::env::set_var("HOME", &home);
    std::env::set_var("XDG_CONFIG_HOME", test_dir.path().join("xdg"));
    std::env::remove_var("LECTERN_ENV");
    std::env::remove_var("LECTERN_API_KEY");

    let result = f();

    for (key, value) in saved {
        match value {
            Some(value) => std::env::set_var(key, value),
            None => std::env::remove_var(key),
        }
    }
    result
}
