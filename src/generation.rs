//! Generation domain: turns topics into plans and plan steps into action chunks.
//!
//! Everything that talks to the generation backend lives here: the backend
//! trait and its HTTP implementation, prompt construction, payload parsing, the
//! bounded retry loop, and the deterministic fallback used when a step cannot be
//! generated.

pub mod backend;
pub mod fallback;
pub mod payload;
pub mod plan;
pub mod prompt;
pub mod provider;
pub mod retry;
pub mod step;

pub use backend::{GenerationBackend, GenerationRequest, RequestKind};
pub use plan::PlanGenerator;
pub use prompt::StepContext;
pub use provider::{HttpGenerationBackend, ProviderConfig, ProviderType};
pub use retry::{RetryExhausted, RetryPolicy};
pub use step::StepGenerator;
