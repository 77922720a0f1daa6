use crate::types::{new_session_id, now_millis, SessionId};
use blake3::Hasher;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Optional generation parameters supplied with a topic query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<String>,
    /// Any further free-form parameters; sorted so fingerprints are stable
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, String>,
}

impl SessionParams {
    /// Deterministic fingerprint of topic + params used for cross-session plan reuse.
    ///
    /// fingerprint = blake3("topic" || len || topic || ("k=v\n")*)
    pub fn fingerprint(&self, topic: &str) -> String {
        let topic = topic.trim();
        let mut hasher = Hasher::new();
        hasher.update(b"topic");
        hasher.update(&(topic.len() as u64).to_be_bytes());
        hasher.update(topic.as_bytes());

        let mut fields: BTreeMap<&str, &str> = BTreeMap::new();
        if let Some(style) = &self.style {
            fields.insert("style", style);
        }
        if let Some(depth) = &self.depth {
            fields.insert("depth", depth);
        }
        for (key, value) in &self.extra {
            fields.entry(key.as_str()).or_insert(value.as_str());
        }
        for (key, value) in fields {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }

        hex::encode(hasher.finalize().as_bytes())
    }
}

/// One end-to-end run of the pipeline for a single topic query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub topic: String,
    pub params: SessionParams,
    pub created_at_ms: u64,
}

impl Session {
    pub fn new(topic: impl Into<String>, params: SessionParams) -> Self {
        Self {
            session_id: new_session_id(),
            topic: topic.into(),
            params,
            created_at_ms: now_millis(),
        }
    }

    /// Rebuild a session under a known id (e.g. when resuming from a persistent cache).
    pub fn with_id(session_id: SessionId, topic: impl Into<String>, params: SessionParams) -> Self {
        Self {
            session_id,
            topic: topic.into(),
            params,
            created_at_ms: now_millis(),
        }
    }

    pub fn fingerprint(&self) -> String {
        self.params.fingerprint(&self.topic)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Planning,
    Generating,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Planning => "planning",
            SessionStatus::Generating => "generating",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}
