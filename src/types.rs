//! Shared identifiers and helpers: session ids, step ids, timestamps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Session identifier (`lec-{millis}-{pid}-{seq}`)
pub type SessionId = String;

/// Step identifier; dense and 1-based within a plan
pub type StepId = u32;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Current time as milliseconds since Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Generate a unique session id.
pub fn new_session_id() -> SessionId {
    let ts = now_millis();
    let pid = std::process::id();
    let seq = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("lec-{ts}-{pid}-{seq}")
}
