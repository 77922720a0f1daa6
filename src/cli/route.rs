//! CLI route: single route table and run context. Dispatches to the lecture service.

use crate::cli::output::format_event;
use crate::cli::parse::Commands;
use crate::config::{CacheBackendKind, ConfigLoader, LecternConfig};
use crate::delivery::{ChannelHandle, DeliveryEvent};
use crate::error::{PipelineError, StorageError};
use crate::lecture::SessionParams;
use crate::service::{CreateSessionRequest, LectureService};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};

/// How a command ended when it did not error outright
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Success,
    /// The session reached the failed state; the message was already streamed.
    SessionFailed(String),
}

/// Runtime context for CLI execution: workspace and loaded configuration.
pub struct RunContext {
    config: LecternConfig,
    workspace_root: PathBuf,
}

impl RunContext {
    /// Create run context from workspace root and optional config path. Uses ConfigLoader only.
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, PipelineError> {
        let config = if let Some(ref cfg_path) = config_path {
            ConfigLoader::load_from_file(cfg_path)?
        } else {
            ConfigLoader::load(&workspace_root)?
        };
        Ok(Self::with_config(workspace_root, config))
    }

    pub fn with_config(workspace_root: PathBuf, config: LecternConfig) -> Self {
        Self {
            config,
            workspace_root,
        }
    }

    pub fn config(&self) -> &LecternConfig {
        &self.config
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Execute a command, writing its primary output to `out`.
    pub async fn execute(
        &self,
        command: &Commands,
        out: &mut dyn Write,
    ) -> Result<CommandOutcome, PipelineError> {
        match command {
            Commands::Run {
                topic,
                style,
                depth,
                params,
                no_metrics,
            } => {
                let service = LectureService::from_config(&self.config, &self.workspace_root)?;
                let request = CreateSessionRequest {
                    topic: topic.clone(),
                    params: SessionParams {
                        style: style.clone(),
                        depth: depth.clone(),
                        extra: params.iter().cloned().collect(),
                    },
                };
                let outcome = run_lecture(&service, request, out).await;
                if !no_metrics {
                    eprintln!("{}", service.metrics());
                }
                service.shutdown();
                outcome
            }
            Commands::Replay { session_id } => {
                if self.config.cache.backend != CacheBackendKind::Sled {
                    return Err(PipelineError::ConfigError(
                        "replay needs the persistent cache; set cache.backend = \"sled\"".to_string(),
                    ));
                }
                let service = LectureService::from_config(&self.config, &self.workspace_root)?;
                let outcome = replay_lecture(&service, session_id, out).await;
                service.shutdown();
                outcome
            }
            Commands::Config => {
                let rendered = self.config.to_redacted_toml()?;
                write_line(out, rendered.trim_end())?;
                Ok(CommandOutcome::Success)
            }
        }
    }
}

/// Create a session, join it, and stream every event until the terminal one.
pub(crate) async fn run_lecture(
    service: &LectureService,
    request: CreateSessionRequest,
    out: &mut dyn Write,
) -> Result<CommandOutcome, PipelineError> {
    let response = service.create_session(request)?;
    info!(session_id = %response.session_id, "Session created");

    let (handle, rx) = ChannelHandle::pair();
    service.join(&response.session_id, handle)?;
    stream_events(rx, out).await
}

/// Rebuild a session from the cache and stream it from the first step.
pub(crate) async fn replay_lecture(
    service: &LectureService,
    session_id: &str,
    out: &mut dyn Write,
) -> Result<CommandOutcome, PipelineError> {
    let (handle, rx) = ChannelHandle::pair();
    let replayed = service.join(session_id, handle)?;
    debug!(session_id, replayed, "Replay joined");

    let report = service.restore(session_id).await?;
    info!(
        session_id,
        from_cache = report.from_cache,
        generated = report.generated,
        "Replay finished"
    );
    stream_events(rx, out).await
}

async fn stream_events(
    mut rx: UnboundedReceiver<DeliveryEvent>,
    out: &mut dyn Write,
) -> Result<CommandOutcome, PipelineError> {
    while let Some(event) = rx.recv().await {
        write_line(out, &format_event(&event)?)?;
        match event {
            DeliveryEvent::Completed { .. } => return Ok(CommandOutcome::Success),
            DeliveryEvent::Failed { error, .. } => return Ok(CommandOutcome::SessionFailed(error)),
            DeliveryEvent::Rendered { .. } => {}
        }
    }
    Err(PipelineError::InvalidRequest(
        "event stream closed before the session finished".to_string(),
    ))
}

fn write_line(out: &mut dyn Write, line: &str) -> Result<(), PipelineError> {
    writeln!(out, "{}", line).map_err(StorageError::from)?;
    out.flush().map_err(StorageError::from)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheBackend;
    use crate::generation::backend::testing::ScriptedBackend;
    use std::sync::Arc;

    fn quiet_config() -> LecternConfig {
        let mut config = LecternConfig::default();
        config.metrics.snapshot_interval_secs = 0;
        config.generation.backoff_base_ms = 10;
        config.generation.backoff_max_ms = 40;
        config
    }

    fn lines(buf: &[u8]) -> Vec<serde_json::Value> {
        String::from_utf8_lossy(buf)
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn run_streams_steps_then_completion() {
        let service = LectureService::with_backend(
            &quiet_config(),
            Arc::new(ScriptedBackend::new(3)),
            Arc::new(MemoryCacheBackend::new()),
        );
        let mut out = Vec::new();
        let outcome = run_lecture(
            &service,
            CreateSessionRequest {
                topic: "Explain gravity".to_string(),
                params: SessionParams::default(),
            },
            &mut out,
        )
        .await
        .unwrap();

        assert_eq!(outcome, CommandOutcome::Success);
        let events = lines(&out);
        assert_eq!(events.len(), 4);
        let steps: Vec<u64> = events[..3]
            .iter()
            .map(|e| e["stepId"].as_u64().unwrap())
            .collect();
        assert_eq!(steps, vec![1, 2, 3]);
        assert_eq!(events[3]["event"], "completed");
    }

    #[tokio::test(start_paused = true)]
    async fn run_reports_failed_session() {
        let service = LectureService::with_backend(
            &quiet_config(),
            Arc::new(ScriptedBackend::failing()),
            Arc::new(MemoryCacheBackend::new()),
        );
        let mut out = Vec::new();
        let outcome = run_lecture(
            &service,
            CreateSessionRequest {
                topic: "Explain gravity".to_string(),
                params: SessionParams::default(),
            },
            &mut out,
        )
        .await
        .unwrap();

        assert!(matches!(outcome, CommandOutcome::SessionFailed(_)));
        assert_eq!(lines(&out).last().unwrap()["event"], "failed");
    }

    #[tokio::test]
    async fn replay_requires_persistent_cache() {
        let context = RunContext::with_config(PathBuf::from("."), quiet_config());
        let mut out = Vec::new();
        let result = context
            .execute(
                &Commands::Replay {
                    session_id: "lec-1".to_string(),
                },
                &mut out,
            )
            .await;
        assert!(matches!(result, Err(PipelineError::ConfigError(_))));
    }

    #[tokio::test]
    async fn config_command_redacts_api_key() {
        let mut config = quiet_config();
        config.provider.api_key = Some("sk-secret".to_string());
        let context = RunContext::with_config(PathBuf::from("."), config);
        let mut out = Vec::new();
        let outcome = context.execute(&Commands::Config, &mut out).await.unwrap();
        assert_eq!(outcome, CommandOutcome::Success);
        let text = String::from_utf8(out).unwrap();
        assert!(!text.contains("sk-secret"));
        assert!(text.contains("[cache]"));
    }
}
