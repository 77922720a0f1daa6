//! CLI: argument types, the command route, and output formatting.

pub mod output;
pub mod parse;
pub mod route;

pub use output::{format_event, map_error};
pub use parse::{Cli, Commands};
pub use route::{CommandOutcome, RunContext};
