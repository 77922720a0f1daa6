//! Bounded accumulators: exponentially-weighted averages and a rolling event window.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Exponentially-weighted moving average.
#[derive(Debug, Clone)]
pub struct Ewma {
    alpha: f64,
    value: Option<f64>,
    samples: u64,
}

impl Ewma {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(f64::EPSILON, 1.0),
            value: None,
            samples: 0,
        }
    }

    pub fn record(&mut self, sample: f64) {
        self.samples += 1;
        self.value = Some(match self.value {
            None => sample,
            Some(current) => self.alpha * sample + (1.0 - self.alpha) * current,
        });
    }

    /// Current average, 0.0 before the first sample.
    pub fn value(&self) -> f64 {
        self.value.unwrap_or(0.0)
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }
}

/// Timestamps of recent events within a fixed trailing window.
#[derive(Debug)]
pub struct RollingWindow {
    window: Duration,
    max_events: usize,
    events: VecDeque<Instant>,
}

impl RollingWindow {
    const DEFAULT_MAX_EVENTS: usize = 10_000;

    pub fn new(window: Duration) -> Self {
        Self::with_capacity(window, Self::DEFAULT_MAX_EVENTS)
    }

    pub fn with_capacity(window: Duration, max_events: usize) -> Self {
        Self {
            window: window.max(Duration::from_millis(1)),
            max_events: max_events.max(1),
            events: VecDeque::new(),
        }
    }

    pub fn record(&mut self, now: Instant) {
        self.prune(now);
        if self.events.len() == self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(now);
    }

    pub fn count(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.events.len()
    }

    /// Event rate normalised to one minute.
    pub fn per_minute(&mut self, now: Instant) -> f64 {
        let count = self.count(now) as f64;
        count * 60.0 / self.window.as_secs_f64()
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.events.front() {
            if now.saturating_duration_since(*front) > self.window {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }
}
