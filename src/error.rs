//! Error types for the Lectern generation pipeline.

use crate::types::{SessionId, StepId};
use std::time::Duration;
use thiserror::Error;

/// Storage-related errors raised by cache backends
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Cause of a single failed generation attempt.
///
/// Attempt failures never escape the step generator; they feed the retry loop
/// and, for plans, become the cause of a [`PipelineError::PlanGenerationFailure`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("Generation attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("Backend transport error: {0}")]
    Transport(String),

    #[error("Backend returned status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Backend rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Backend authentication failed: {0}")]
    AuthFailed(String),

    #[error("Backend returned an empty payload")]
    EmptyOutput,

    #[error("Malformed generation output: {0}")]
    MalformedOutput(String),

    #[error("Generation backend not configured: {0}")]
    NotConfigured(String),
}

impl GenerationError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            GenerationError::AuthFailed(_) => false,
            GenerationError::NotConfigured(_) => false,
            _ => true,
        }
    }
}

/// Pipeline-level errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Plan generation failed for session {session_id} after {attempts} attempt(s): {cause}")]
    PlanGenerationFailure {
        session_id: SessionId,
        attempts: u32,
        cause: GenerationError,
    },

    #[error("Step {step_id} generation failed: {cause}")]
    StepGenerationFailure {
        step_id: StepId,
        cause: GenerationError,
    },

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Delivery channel {channel_id} for session {session_id} failed: {reason}")]
    DeliveryChannelError {
        session_id: SessionId,
        channel_id: u64,
        reason: String,
    },

    #[error("Malformed generation output: {0}")]
    MalformedGenerationOutput(String),

    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
}

impl From<config::ConfigError> for PipelineError {
    fn from(err: config::ConfigError) -> Self {
        PipelineError::ConfigError(err.to_string())
    }
}

impl PipelineError {
    /// Classify a step that exhausted its retries.
    ///
    /// Malformed payloads keep their own kind; everything else is a step failure.
    pub fn step_failure(step_id: StepId, cause: GenerationError) -> Self {
        match cause {
            GenerationError::MalformedOutput(detail) => PipelineError::MalformedGenerationOutput(
                format!("step {step_id}: {detail}"),
            ),
            cause => PipelineError::StepGenerationFailure { step_id, cause },
        }
    }

    /// Whether the error ends a session (as opposed to being recovered locally).
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::PlanGenerationFailure { .. } | PipelineError::InvalidPlan(_)
        )
    }
}
