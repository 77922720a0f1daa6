//! Performance monitoring: process-wide counters, rolling rates and EWMA timings
//! for the generation pipeline, with an optional interval-driven snapshot reporter.

pub mod monitor;
pub mod snapshot;
pub mod window;

pub use monitor::{AttemptKind, MonitorSettings, PerformanceMonitor, RequestOutcome};
pub use snapshot::MetricsSnapshot;
