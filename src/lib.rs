//! Lectern: lecture plan/step generation, caching and ordered delivery
//!
//! A topic query becomes a [`lecture::Plan`] of ordered steps; each step is
//! generated into an [`lecture::ActionChunk`] with bounded concurrency, cached
//! per session and step, and streamed to every joined client in step order.

pub mod cache;
pub mod cli;
pub mod config;
pub mod delivery;
pub mod error;
pub mod generation;
pub mod lecture;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod service;
pub mod types;

pub use error::{GenerationError, PipelineError, StorageError};
pub use service::{CreateSessionRequest, CreateSessionResponse, LectureService};
