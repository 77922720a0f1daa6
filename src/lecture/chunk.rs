use crate::types::{now_millis, SessionId, StepId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque renderable action. Only `op` is inspected; everything else passes through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub op: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Action {
    pub fn new(op: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            payload: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkSource {
    Primary,
    Fallback,
}

/// Generated actions for one step of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionChunk {
    pub session_id: SessionId,
    pub step_id: StepId,
    pub actions: Vec<Action>,
    pub generated_at_ms: u64,
    pub source: ChunkSource,
}

impl ActionChunk {
    pub fn primary(session_id: &str, step_id: StepId, actions: Vec<Action>) -> Self {
        Self {
            session_id: session_id.to_string(),
            step_id,
            actions,
            generated_at_ms: now_millis(),
            source: ChunkSource::Primary,
        }
    }

    pub fn fallback(session_id: &str, step_id: StepId, actions: Vec<Action>) -> Self {
        Self {
            session_id: session_id.to_string(),
            step_id,
            actions,
            generated_at_ms: now_millis(),
            source: ChunkSource::Fallback,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.source == ChunkSource::Fallback
    }
}
