//! Merge rules: built-in defaults, applied below every file and env source.

use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default("provider.provider_type", "openai")?
        .set_default("provider.model", "gpt-4o-mini")?
        .set_default("provider.request_timeout_secs", 120)?
        .set_default("generation.attempt_timeout_ms", 30_000)?
        .set_default("generation.max_retries", 2)?
        .set_default("generation.backoff_base_ms", 1_000)?
        .set_default("generation.backoff_max_ms", 8_000)?
        .set_default("cache.backend", "memory")?
        .set_default("cache.path", ".lectern/cache")?
        .set_default("cache.ttl_secs", 3_600)?
        .set_default("cache.fallback_ttl_secs", 60)?
        .set_default("cache.reuse_plans", true)?
        .set_default("orchestrator.step_concurrency", 3)?
        .set_default("orchestrator.max_steps", 12)?
        .set_default("orchestrator.session_ttl_secs", 3_600)?
        .set_default("orchestrator.prune_interval_secs", 60)?
        .set_default("metrics.snapshot_interval_secs", 60)?
        .set_default("metrics.window_secs", 60)?
        .set_default("metrics.ewma_alpha", 0.2)
}
