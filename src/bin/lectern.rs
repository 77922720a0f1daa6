//! Lectern CLI Binary
//!
//! Command-line interface for the Lectern lecture generation pipeline.

use anyhow::{anyhow, Context};
use clap::Parser;
use directories::ProjectDirs;
use lectern::cli::{map_error, Cli, CommandOutcome, RunContext};
use lectern::config::ConfigLoader;
use lectern::logging::{init_logging, LoggingConfig};
use std::process;
use tracing::{error, info};

fn main() {
    let cli = Cli::parse();
    match run(cli) {
        Ok(CommandOutcome::Success) => {}
        Ok(CommandOutcome::SessionFailed(reason)) => {
            error!(reason = %reason, "Session failed");
            process::exit(2);
        }
        Err(e) => {
            eprintln!("{:#}", e);
            process::exit(1);
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<CommandOutcome> {
    let logging_config = build_logging_config(&cli);
    init_logging(Some(&logging_config)).context("Failed to initialize logging")?;

    info!("Lectern CLI starting");

    let context = RunContext::new(cli.workspace.clone(), cli.config.clone())
        .map_err(|e| anyhow!(map_error(&e)))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let mut stdout = std::io::stdout();
    let outcome = runtime
        .block_on(context.execute(&cli.command, &mut stdout))
        .map_err(|e| {
            error!("Command failed: {}", e);
            anyhow!(map_error(&e))
        })?;
    info!("Command completed");
    Ok(outcome)
}

/// Build logging configuration from CLI args, environment, and config file
fn build_logging_config(cli: &Cli) -> LoggingConfig {
    let mut config = if let Some(ref config_path) = cli.config {
        ConfigLoader::load_from_file(config_path)
            .ok()
            .map(|c| c.logging)
            .unwrap_or_default()
    } else {
        ConfigLoader::load(&cli.workspace)
            .ok()
            .map(|c| c.logging)
            .unwrap_or_default()
    };

    // CLI arguments win
    if let Some(ref level) = cli.log_level {
        config.level = level.clone();
    }
    if let Some(ref format) = cli.log_format {
        config.format = format.clone();
    }
    if let Some(ref output) = cli.log_output {
        config.output = output.clone();
    }
    if let Some(ref file) = cli.log_file {
        config.file = file.clone();
    } else if config.file == LoggingConfig::default().file {
        if let Some(dirs) = ProjectDirs::from("", "", "lectern") {
            config.file = dirs.data_local_dir().join("lectern.log");
        }
    } else if config.file.is_relative() {
        config.file = cli.workspace.join(&config.file);
    }

    config
}
