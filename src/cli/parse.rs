//! CLI parse: clap types for Lectern. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Lectern CLI - generate, cache and stream lecture steps
#[derive(Parser, Debug)]
#[command(name = "lectern")]
#[command(about = "Generate lecture plans and steps, cache them, and stream them in order")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, both)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output includes "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Generate a lecture for a topic and stream its steps as JSON lines
    Run {
        /// Topic query, e.g. "Explain gravity"
        #[arg(long)]
        topic: String,
        /// Presentation style hint
        #[arg(long)]
        style: Option<String>,
        /// Depth hint (e.g. intro, detailed)
        #[arg(long)]
        depth: Option<String>,
        /// Extra generation parameter as key=value (repeatable)
        #[arg(long = "param", value_parser = parse_key_value)]
        params: Vec<(String, String)>,
        /// Skip the metrics summary after the run
        #[arg(long)]
        no_metrics: bool,
    },
    /// Replay a session from the persistent cache
    Replay {
        /// Session id printed by `lectern run`
        session_id: String,
    },
    /// Print the effective configuration (secrets redacted)
    Config,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{}'", raw));
    }
    Ok((key.to_string(), value.trim().to_string()))
}
