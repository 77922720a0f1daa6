//! Live channel protocol messages.

use crate::lecture::{Action, ActionChunk};
use crate::types::{SessionId, StepId};
use serde::{Deserialize, Serialize};

/// Server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum DeliveryEvent {
    #[serde(rename_all = "camelCase")]
    Rendered {
        session_id: SessionId,
        step_id: StepId,
        actions: Vec<Action>,
        is_fallback: bool,
    },
    #[serde(rename_all = "camelCase")]
    Completed {
        session_id: SessionId,
        total_steps: usize,
    },
    #[serde(rename_all = "camelCase")]
    Failed { session_id: SessionId, error: String },
}

impl DeliveryEvent {
    pub fn rendered(chunk: &ActionChunk) -> Self {
        DeliveryEvent::Rendered {
            session_id: chunk.session_id.clone(),
            step_id: chunk.step_id,
            actions: chunk.actions.clone(),
            is_fallback: chunk.is_fallback(),
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            DeliveryEvent::Rendered { session_id, .. }
            | DeliveryEvent::Completed { session_id, .. }
            | DeliveryEvent::Failed { session_id, .. } => session_id,
        }
    }

    pub fn step_id(&self) -> Option<StepId> {
        match self {
            DeliveryEvent::Rendered { step_id, .. } => Some(*step_id),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryEvent::Rendered { .. })
    }
}

/// Client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum ClientCommand {
    #[serde(rename_all = "camelCase")]
    Join { session_id: SessionId },
    #[serde(rename_all = "camelCase")]
    Leave { session_id: SessionId },
}
