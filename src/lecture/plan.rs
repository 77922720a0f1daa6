use crate::error::PipelineError;
use crate::types::{SessionId, StepId};
use serde::{Deserialize, Serialize};

/// One unit of the lecture to be compiled into actions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSpec {
    pub id: StepId,
    pub tag: String,
    pub desc: String,
    pub compiler: String,
}

/// Ordered list of step specifications for a session.
///
/// Immutable once generated; step ids are contiguous starting at 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub session_id: SessionId,
    pub topic: String,
    pub steps: Vec<StepSpec>,
}

impl Plan {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.session_id.trim().is_empty() {
            return Err(PipelineError::InvalidPlan(
                "Plan session id cannot be empty".to_string(),
            ));
        }
        if self.steps.is_empty() {
            return Err(PipelineError::InvalidPlan(
                "Plan must contain at least one step".to_string(),
            ));
        }
        for (index, step) in self.steps.iter().enumerate() {
            let expected = index as StepId + 1;
            if step.id != expected {
                return Err(PipelineError::InvalidPlan(format!(
                    "Plan step ids must be contiguous from 1: expected {}, got {}",
                    expected, step.id
                )));
            }
        }
        Ok(())
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn step(&self, step_id: StepId) -> Option<&StepSpec> {
        if step_id == 0 {
            return None;
        }
        self.steps.get(step_id as usize - 1)
    }

    /// Copy of this plan bound to another session (cross-session reuse).
    pub fn rebind(&self, session_id: &str) -> Plan {
        Plan {
            session_id: session_id.to_string(),
            topic: self.topic.clone(),
            steps: self.steps.clone(),
        }
    }

    /// `(id, tag)` pairs used as prompt context for individual steps.
    pub fn outline(&self) -> Vec<(StepId, String)> {
        self.steps
            .iter()
            .map(|step| (step.id, step.tag.clone()))
            .collect()
    }
}
