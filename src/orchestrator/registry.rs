//! In-memory registry of known sessions and their run state.

use crate::lecture::{Session, SessionStatus};
use crate::types::{now_millis, SessionId};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionRecord {
    pub session: Session,
    pub status: SessionStatus,
    pub total_steps: Option<usize>,
    pub last_error: Option<String>,
    /// A run is in progress
    pub running: bool,
    pub updated_at_ms: u64,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SessionRecord>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session; an existing record under the same id is kept.
    pub fn insert(&self, session: Session) -> bool {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&session.session_id) {
            return false;
        }
        sessions.insert(
            session.session_id.clone(),
            SessionRecord {
                session,
                status: SessionStatus::Pending,
                total_steps: None,
                last_error: None,
                running: false,
                updated_at_ms: now_millis(),
            },
        );
        true
    }

    pub fn get(&self, session_id: &str) -> Option<SessionRecord> {
        self.sessions.read().get(session_id).cloned()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().contains_key(session_id)
    }

    pub fn status(&self, session_id: &str) -> Option<SessionStatus> {
        self.sessions.read().get(session_id).map(|r| r.status)
    }

    /// Mark a run as started. Returns false if the session is unknown or already running.
    pub fn try_start(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(session_id) {
            Some(record) if !record.running => {
                record.running = true;
                record.last_error = None;
                record.updated_at_ms = now_millis();
                true
            }
            _ => false,
        }
    }

    pub fn finish_run(&self, session_id: &str) {
        self.update(session_id, |record| record.running = false);
    }

    pub fn set_status(&self, session_id: &str, status: SessionStatus) {
        self.update(session_id, |record| record.status = status);
    }

    pub fn set_total_steps(&self, session_id: &str, total_steps: usize) {
        self.update(session_id, |record| record.total_steps = Some(total_steps));
    }

    pub fn mark_failed(&self, session_id: &str, error: String) {
        self.update(session_id, |record| {
            record.status = SessionStatus::Failed;
            record.last_error = Some(error);
        });
    }

    pub fn remove(&self, session_id: &str) -> Option<SessionRecord> {
        self.sessions.write().remove(session_id)
    }

    /// Idle sessions created more than `ttl` before `now_ms`.
    pub fn expired(&self, now_ms: u64, ttl: Duration) -> Vec<SessionId> {
        let ttl_ms = ttl.as_millis() as u64;
        self.sessions
            .read()
            .values()
            .filter(|r| !r.running && now_ms.saturating_sub(r.session.created_at_ms) > ttl_ms)
            .map(|r| r.session.session_id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    fn update(&self, session_id: &str, apply: impl FnOnce(&mut SessionRecord)) {
        if let Some(record) = self.sessions.write().get_mut(session_id) {
            apply(record);
            record.updated_at_ms = now_millis();
        }
    }
}
