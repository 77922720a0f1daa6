//! Workspace config files, lowest precedence first:
//! `lectern.toml`, `config/config.toml`, `config/{LECTERN_ENV}.toml`.

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, File};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const ENV_VAR: &str = "LECTERN_ENV";
const DEFAULT_ENV: &str = "development";

/// Candidate files for `workspace_root`, existing or not.
pub fn candidates(workspace_root: &Path) -> Vec<PathBuf> {
    let env_name = std::env::var(ENV_VAR)
        .ok()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_ENV.to_string());
    let config_dir = workspace_root.join("config");
    vec![
        workspace_root.join("lectern.toml"),
        config_dir.join("config.toml"),
        config_dir.join(format!("{}.toml", env_name.trim())),
    ]
}

pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
    workspace_root: &Path,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Ok(candidates(workspace_root)
        .into_iter()
        .filter(|path| path.is_file())
        .fold(builder, |builder, path| {
            debug!(config_path = %path.display(), "Adding workspace configuration");
            builder.add_source(File::from(path).required(false))
        }))
}
