//! Layered configuration loading from workspace files and environment

use super::test_utils::with_isolated_env;
use lectern::config::{CacheBackendKind, ConfigLoader};
use lectern::generation::ProviderType;
use lectern::PipelineError;
use std::time::Duration;
use tempfile::TempDir;

fn write_workspace_config(root: &std::path::Path, name: &str, body: &str) {
    let dir = root.join("config");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(name), body).unwrap();
}

#[test]
fn defaults_apply_without_any_files() {
    let dir = TempDir::new().unwrap();
    let config = with_isolated_env(&dir, || ConfigLoader::load(dir.path())).unwrap();
    assert_eq!(config.cache.backend, CacheBackendKind::Memory);
    assert_eq!(config.orchestrator.step_concurrency, 3);
    assert_eq!(config.generation.retry_policy().max_retries, 2);
    assert!(config.provider.api_key.is_none());
}

#[test]
fn workspace_file_and_environment_layers_merge() {
    let dir = TempDir::new().unwrap();
    write_workspace_config(
        dir.path(),
        "config.toml",
        r#"
[provider]
provider_type = "ollama"
model = "llama3"
endpoint = "http://localhost:11434"

[cache]
backend = "sled"
ttl_secs = 600

[orchestrator]
step_concurrency = 5
"#,
    );
    write_workspace_config(
        dir.path(),
        "staging.toml",
        r#"
[orchestrator]
step_concurrency = 2
"#,
    );

    let config = with_isolated_env(&dir, || {
        std::env::set_var("LECTERN_ENV", "staging");
        std::env::set_var("LECTERN_CACHE__FALLBACK_TTL_SECS", "30");
        let loaded = ConfigLoader::load(dir.path());
        std::env::remove_var("LECTERN_CACHE__FALLBACK_TTL_SECS");
        loaded
    })
    .unwrap();

    assert_eq!(config.provider.provider_type, ProviderType::Ollama);
    assert_eq!(config.provider.model, "llama3");
    assert_eq!(config.cache.backend, CacheBackendKind::Sled);
    assert_eq!(config.cache.settings().ttl, Duration::from_secs(600));
    assert_eq!(config.cache.settings().fallback_ttl, Duration::from_secs(30));
    assert_eq!(config.orchestrator.step_concurrency, 2);
}

#[test]
fn api_key_falls_back_to_environment() {
    let dir = TempDir::new().unwrap();
    let config = with_isolated_env(&dir, || {
        std::env::set_var("LECTERN_API_KEY", "sk-from-env");
        ConfigLoader::load(dir.path())
    })
    .unwrap();
    assert_eq!(config.provider.api_key.as_deref(), Some("sk-from-env"));
    let rendered = config.to_redacted_toml().unwrap();
    assert!(!rendered.contains("sk-from-env"));
}

#[test]
fn invalid_values_are_reported_together() {
    let dir = TempDir::new().unwrap();
    write_workspace_config(
        dir.path(),
        "config.toml",
        r#"
[orchestrator]
step_concurrency = 0

[cache]
ttl_secs = 0
"#,
    );
    let result = with_isolated_env(&dir, || ConfigLoader::load(dir.path()));
    match result {
        Err(PipelineError::ConfigError(message)) => {
            assert!(message.contains("step_concurrency"));
            assert!(message.contains("ttl_secs"));
        }
        other => panic!("expected a configuration error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn explicit_file_must_exist() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.toml");
    let result = with_isolated_env(&dir, || ConfigLoader::load_from_file(&missing));
    assert!(matches!(result, Err(PipelineError::ConfigError(_))));
}
