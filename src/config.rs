//! Configuration System
//!
//! Layered configuration: built-in defaults, the global file, workspace files,
//! then `LECTERN_*` environment variables. Each section converts into the
//! settings type of the component it configures.

use crate::cache::CacheSettings;
use crate::error::PipelineError;
use crate::generation::RetryPolicy;
use crate::logging::LoggingConfig;
use crate::metrics::MonitorSettings;
use crate::orchestrator::OrchestratorSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use crate::generation::{ProviderConfig, ProviderType};

mod merge;
mod sources;

/// Environment variable consulted when no API key is configured.
pub const API_KEY_ENV: &str = "LECTERN_API_KEY";

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LecternConfig {
    pub provider: ProviderConfig,
    pub generation: GenerationConfig,
    pub cache: CacheConfig,
    pub orchestrator: OrchestratorConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub attempt_timeout_ms: u64,
    /// Retries after the first attempt
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: 30_000,
            max_retries: 2,
            backoff_base_ms: 1_000,
            backoff_max_ms: 8_000,
        }
    }
}

impl GenerationConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            attempt_timeout: Duration::from_millis(self.attempt_timeout_ms),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackendKind {
    #[default]
    Memory,
    Sled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,
    /// Database directory for the sled backend, relative to the workspace
    pub path: PathBuf,
    pub ttl_secs: u64,
    pub fallback_ttl_secs: u64,
    /// Share plans between sessions with identical topic and params
    pub reuse_plans: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Memory,
            path: PathBuf::from(".lectern/cache"),
            ttl_secs: 3_600,
            fallback_ttl_secs: 60,
            reuse_plans: true,
        }
    }
}

impl CacheConfig {
    pub fn settings(&self) -> CacheSettings {
        CacheSettings {
            ttl: Duration::from_secs(self.ttl_secs),
            fallback_ttl: Duration::from_secs(self.fallback_ttl_secs),
        }
    }

    /// Sled path resolved against `workspace_root` when relative.
    pub fn resolved_path(&self, workspace_root: &Path) -> PathBuf {
        if self.path.is_absolute() {
            self.path.clone()
        } else {
            workspace_root.join(&self.path)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub step_concurrency: usize,
    pub max_steps: usize,
    pub session_ttl_secs: u64,
    /// 0 disables the background pruner
    pub prune_interval_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            step_concurrency: 3,
            max_steps: 12,
            session_ttl_secs: 3_600,
            prune_interval_secs: 60,
        }
    }
}

impl OrchestratorConfig {
    pub fn settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            step_concurrency: self.step_concurrency,
            session_ttl: Duration::from_secs(self.session_ttl_secs),
            prune_interval: (self.prune_interval_secs > 0)
                .then(|| Duration::from_secs(self.prune_interval_secs)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 0 disables the periodic reporter
    pub snapshot_interval_secs: u64,
    pub window_secs: u64,
    pub ewma_alpha: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            snapshot_interval_secs: 60,
            window_secs: 60,
            ewma_alpha: 0.2,
        }
    }
}

impl MetricsConfig {
    pub fn settings(&self) -> MonitorSettings {
        MonitorSettings {
            snapshot_interval: (self.snapshot_interval_secs > 0)
                .then(|| Duration::from_secs(self.snapshot_interval_secs)),
            window: Duration::from_secs(self.window_secs.max(1)),
            ewma_alpha: self.ewma_alpha,
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    Provider(String),
    Generation(String),
    Cache(String),
    Orchestrator(String),
    Metrics(String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Provider(msg) => write!(f, "Provider: {}", msg),
            ValidationError::Generation(msg) => write!(f, "Generation: {}", msg),
            ValidationError::Cache(msg) => write!(f, "Cache: {}", msg),
            ValidationError::Orchestrator(msg) => write!(f, "Orchestrator: {}", msg),
            ValidationError::Metrics(msg) => write!(f, "Metrics: {}", msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl LecternConfig {
    /// Validate the entire configuration, collecting every problem.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.provider.model.trim().is_empty() {
            errors.push(ValidationError::Provider("model cannot be empty".to_string()));
        }
        if let Some(endpoint) = &self.provider.endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                errors.push(ValidationError::Provider(format!(
                    "endpoint '{}' must be an http(s) URL",
                    endpoint
                )));
            }
        }
        if self.provider.provider_type == ProviderType::LocalCustom && self.provider.endpoint.is_none() {
            errors.push(ValidationError::Provider(
                "local_custom provider requires an endpoint".to_string(),
            ));
        }

        if self.generation.attempt_timeout_ms == 0 {
            errors.push(ValidationError::Generation(
                "attempt_timeout_ms must be positive".to_string(),
            ));
        }
        if self.generation.backoff_max_ms < self.generation.backoff_base_ms {
            errors.push(ValidationError::Generation(
                "backoff_max_ms must not be below backoff_base_ms".to_string(),
            ));
        }

        if self.cache.ttl_secs == 0 {
            errors.push(ValidationError::Cache("ttl_secs must be positive".to_string()));
        }
        if self.cache.fallback_ttl_secs > self.cache.ttl_secs {
            errors.push(ValidationError::Cache(
                "fallback_ttl_secs must not exceed ttl_secs".to_string(),
            ));
        }
        if self.cache.backend == CacheBackendKind::Sled && self.cache.path.as_os_str().is_empty() {
            errors.push(ValidationError::Cache(
                "sled backend requires a path".to_string(),
            ));
        }

        if self.orchestrator.step_concurrency == 0 {
            errors.push(ValidationError::Orchestrator(
                "step_concurrency must be at least 1".to_string(),
            ));
        }
        if self.orchestrator.max_steps == 0 {
            errors.push(ValidationError::Orchestrator(
                "max_steps must be at least 1".to_string(),
            ));
        }

        if !(self.metrics.ewma_alpha > 0.0 && self.metrics.ewma_alpha <= 1.0) {
            errors.push(ValidationError::Metrics(
                "ewma_alpha must be in (0, 1]".to_string(),
            ));
        }

        if self.logging.format != "json" && self.logging.format != "text" {
            errors.push(ValidationError::Logging(format!(
                "format '{}' must be 'json' or 'text'",
                self.logging.format
            )));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Render as TOML, with the API key masked.
    pub fn to_redacted_toml(&self) -> Result<String, PipelineError> {
        let mut redacted = self.clone();
        if redacted.provider.api_key.is_some() {
            redacted.provider.api_key = Some("***".to_string());
        }
        toml::to_string_pretty(&redacted)
            .map_err(|e| PipelineError::ConfigError(format!("Failed to render config: {}", e)))
    }
}

/// Loads [`LecternConfig`] from the layered sources.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Defaults, global file, `{workspace}/config/*.toml`, then environment.
    pub fn load(workspace_root: &Path) -> Result<LecternConfig, PipelineError> {
        let builder = merge::merge_policy::builder_with_defaults()?;
        let builder = sources::global_file::add_to_builder(builder)?;
        let builder = sources::workspace_file::add_to_builder(builder, workspace_root)?;
        let builder = sources::add_environment(builder)?;
        Self::finish(builder.build()?.try_deserialize()?)
    }

    /// Defaults, one explicit file, then environment.
    pub fn load_from_file(path: &Path) -> Result<LecternConfig, PipelineError> {
        if !path.exists() {
            return Err(PipelineError::ConfigError(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        let builder = merge::merge_policy::builder_with_defaults()?
            .add_source(config::File::from(path.to_path_buf()).required(true));
        let builder = sources::add_environment(builder)?;
        Self::finish(builder.build()?.try_deserialize()?)
    }

    pub fn global_config_path() -> Option<PathBuf> {
        sources::global_file::global_config_path()
    }

    fn finish(mut config: LecternConfig) -> Result<LecternConfig, PipelineError> {
        if config.provider.api_key.is_none() {
            config.provider.api_key = std::env::var(API_KEY_ENV)
                .ok()
                .filter(|key| !key.trim().is_empty());
        }
        config.validate().map_err(|errors| {
            let error_msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            PipelineError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                error_msgs.join("\n")
            ))
        })?;
        Ok(config)
    }
}
