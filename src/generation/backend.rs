//! Generation backend abstraction.

use crate::error::GenerationError;
use crate::types::{SessionId, StepId};
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Plan,
    Step,
}

/// One backend call: a system instruction plus the user prompt.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub kind: RequestKind,
    pub session_id: SessionId,
    /// Set for step requests
    pub step_id: Option<StepId>,
    pub system: String,
    pub prompt: String,
}

/// Produces a raw text payload for a request. Parsing happens in the caller.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}
