//! Lecture domain model: sessions, plans, steps, and action chunks.
//! Pure data; generation, caching and delivery live in their own domains.

pub mod chunk;
pub mod plan;
pub mod session;

pub use chunk::{Action, ActionChunk, ChunkSource};
pub use plan::{Plan, StepSpec};
pub use session::{Session, SessionParams, SessionStatus};
