//! Persistent cache behavior through the service

use super::test_utils::*;
use lectern::cache::{ActionCache, CacheBackend, CacheKey, CacheSettings, SledCacheBackend};
use lectern::lecture::{ActionChunk, Action, SessionParams};
use lectern::PipelineError;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test(start_paused = true)]
async fn session_survives_process_restart_with_sled() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cache");

    let session_id = {
        let sled = Arc::new(SledCacheBackend::open(&path).unwrap());
        let service = service_on(Arc::new(ScriptBackend::new(3)), sled.clone());
        let session = service
            .orchestrator()
            .register("Explain gravity", SessionParams::default())
            .unwrap();
        service
            .orchestrator()
            .run_session(&session.session_id)
            .await
            .unwrap();
        sled.flush().unwrap();
        session.session_id
    };

    let backend = Arc::new(ScriptBackend::new(3));
    let sled = Arc::new(SledCacheBackend::open(&path).unwrap());
    let service = service_on(backend.clone(), sled);

    let mut rx = join(&service, &session_id);
    assert_eq!(rendered_steps(&drain(&mut rx)), vec![1, 2, 3]);

    let report = service.restore(&session_id).await.unwrap();
    assert_eq!(report.from_cache, 3);
    assert_eq!(report.generated, 0);
    assert_eq!(backend.plan_calls(), 0);
    assert_eq!(backend.total_step_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn restore_of_unknown_session_is_not_found() {
    let dir = TempDir::new().unwrap();
    let sled = Arc::new(SledCacheBackend::open(dir.path().join("cache")).unwrap());
    let service = service_on(Arc::new(ScriptBackend::new(1)), sled);
    assert!(matches!(
        service.restore("lec-never-created").await,
        Err(PipelineError::SessionNotFound(_))
    ));
}

#[test]
fn fallback_chunks_expire_before_primary_chunks() {
    let dir = TempDir::new().unwrap();
    let backend: Arc<dyn CacheBackend> =
        Arc::new(SledCacheBackend::open(dir.path().join("cache")).unwrap());
    let cache = ActionCache::new(
        backend,
        CacheSettings {
            ttl: Duration::from_secs(60),
            fallback_ttl: Duration::from_millis(50),
        },
    );

    let label = Action::new("drawLabel").with("text", "hello");
    assert!(cache.put_chunk(&ActionChunk::primary("lec-1", 1, vec![label.clone()])));
    assert!(cache.put_chunk(&ActionChunk::fallback("lec-1", 2, vec![label])));
    assert!(cache.exists(&CacheKey::chunk("lec-1", 2)));

    std::thread::sleep(Duration::from_millis(120));
    assert!(cache.peek_chunk("lec-1", 1).is_some());
    assert!(cache.peek_chunk("lec-1", 2).is_none());
    assert!(cache.purge_expired() <= 1);
}

#[test]
fn removing_a_session_leaves_other_sessions() {
    let cache = ActionCache::in_memory();
    let label = Action::new("drawLabel").with("text", "x");
    for step in 1..=3 {
        cache.put_chunk(&ActionChunk::primary("lec-1", step, vec![label.clone()]));
        cache.put_chunk(&ActionChunk::primary("lec-10", step, vec![label.clone()]));
    }
    assert_eq!(cache.remove_session("lec-1"), 3);
    assert!(cache.peek_chunk("lec-1", 1).is_none());
    assert!(cache.peek_chunk("lec-10", 3).is_some());
}
