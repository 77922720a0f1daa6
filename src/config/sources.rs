//! Config sources in precedence order: global file, workspace files, environment.

pub mod global_file;
pub mod workspace_file;

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, Environment};

/// `LECTERN_CACHE__TTL_SECS=10` overrides `cache.ttl_secs`.
pub fn add_environment(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Ok(builder.add_source(
        Environment::with_prefix("LECTERN")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    ))
}
