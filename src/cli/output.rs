//! CLI output: error mapping and event lines.

use crate::delivery::DeliveryEvent;
use crate::error::PipelineError;

/// Map pipeline errors to a string for CLI output.
pub fn map_error(e: &PipelineError) -> String {
    match e {
        PipelineError::ConfigError(msg) => format!(
            "Configuration error: {}\nRun `lectern config` to inspect the effective settings.",
            msg
        ),
        other => other.to_string(),
    }
}

/// One JSON line per delivery event, in the same shape live clients receive.
pub fn format_event(event: &DeliveryEvent) -> Result<String, PipelineError> {
    serde_json::to_string(event)
        .map_err(|e| PipelineError::InvalidRequest(format!("unserializable event: {}", e)))
}
