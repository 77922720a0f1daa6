//! End-to-end pipeline runs against a scripted backend

use super::test_utils::*;
use lectern::delivery::DeliveryEvent;
use lectern::lecture::{SessionParams, SessionStatus};
use lectern::PipelineError;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn flaky_step_is_retried_and_second_run_is_served_from_cache() {
    let backend = Arc::new(ScriptBackend::new(5).fail_step(3, 2));
    let service = service_with(backend.clone());
    let orchestrator = service.orchestrator();
    let session = orchestrator
        .register("Explain gravity", SessionParams::default())
        .unwrap();
    let mut rx = join(&service, &session.session_id);

    let started = tokio::time::Instant::now();
    let report = orchestrator.run_session(&session.session_id).await.unwrap();
    // Two backoffs on step 3: 10ms then 20ms.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(30), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(200), "elapsed {elapsed:?}");
    assert_eq!(report.total_steps, 5);
    assert_eq!(report.generated, 5);
    assert_eq!(report.fallback, 0);
    assert_eq!(backend.step_calls(3), 3);

    let events = collect_until_terminal(&mut rx).await;
    assert_eq!(rendered_steps(&events), vec![1, 2, 3, 4, 5]);
    assert!(matches!(
        events.last(),
        Some(DeliveryEvent::Completed { total_steps: 5, .. })
    ));
    let metrics = service.metrics();
    assert_eq!(metrics.cache_misses, 5);
    assert_eq!(metrics.cache_hits, 0);

    let again = orchestrator.run_session(&session.session_id).await.unwrap();
    assert_eq!(again.from_cache, 5);
    assert_eq!(again.generated, 0);
    assert_eq!(backend.total_step_calls(), 7);
    assert_eq!(backend.plan_calls(), 1);

    let metrics = service.metrics();
    assert_eq!(metrics.cache_hits, 5);
    assert_eq!(metrics.cache_misses, 5);
    assert_eq!(metrics.succeeded_requests, 2);
}

#[tokio::test(start_paused = true)]
async fn steps_fall_back_when_backend_goes_down_after_planning() {
    let backend = Arc::new(ScriptBackend::new(4).steps_down());
    let service = service_with(backend.clone());
    let orchestrator = service.orchestrator();
    let session = orchestrator
        .register("Explain tides", SessionParams::default())
        .unwrap();
    let mut rx = join(&service, &session.session_id);

    let report = orchestrator.run_session(&session.session_id).await.unwrap();
    assert_eq!(report.fallback, 4);
    assert_eq!(
        orchestrator.status(&session.session_id),
        Some(SessionStatus::Completed)
    );

    let events = collect_until_terminal(&mut rx).await;
    assert_eq!(rendered_steps(&events), vec![1, 2, 3, 4]);
    for event in &events[..4] {
        match event {
            DeliveryEvent::Rendered {
                actions,
                is_fallback,
                ..
            } => {
                assert!(*is_fallback);
                assert!(!actions.is_empty());
            }
            other => panic!("expected a rendered step, got {:?}", other),
        }
    }
    assert_eq!(service.metrics().fallback_steps, 4);
}

#[tokio::test(start_paused = true)]
async fn plan_failure_fails_the_session() {
    let backend = Arc::new(ScriptBackend::new(3).plan_down());
    let service = service_with(backend.clone());
    let orchestrator = service.orchestrator();
    let session = orchestrator
        .register("Explain entropy", SessionParams::default())
        .unwrap();
    let mut rx = join(&service, &session.session_id);

    let result = orchestrator.run_session(&session.session_id).await;
    assert!(matches!(
        result,
        Err(PipelineError::PlanGenerationFailure { attempts: 3, .. })
    ));
    assert_eq!(backend.plan_calls(), 3);
    assert_eq!(backend.total_step_calls(), 0);

    let record = service.session_status(&session.session_id).unwrap();
    assert_eq!(record.status, SessionStatus::Failed);
    assert!(record.last_error.is_some());

    let events = collect_until_terminal(&mut rx).await;
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], DeliveryEvent::Failed { .. }));
    assert_eq!(service.metrics().failed_requests, 1);
}

#[tokio::test(start_paused = true)]
async fn late_joiner_receives_full_replay() {
    let backend = Arc::new(ScriptBackend::new(3));
    let service = service_with(backend);
    let orchestrator = service.orchestrator();
    let session = orchestrator
        .register("Explain gravity", SessionParams::default())
        .unwrap();
    orchestrator.run_session(&session.session_id).await.unwrap();

    let mut rx = join(&service, &session.session_id);
    let events = drain(&mut rx);
    assert_eq!(rendered_steps(&events), vec![1, 2, 3]);
    assert!(matches!(
        events.last(),
        Some(DeliveryEvent::Completed { total_steps: 3, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn rerun_is_idempotent_for_subscribers() {
    let backend = Arc::new(ScriptBackend::new(3));
    let service = service_with(backend);
    let orchestrator = service.orchestrator();
    let session = orchestrator
        .register("Explain gravity", SessionParams::default())
        .unwrap();
    let mut rx = join(&service, &session.session_id);

    orchestrator.run_session(&session.session_id).await.unwrap();
    let first = collect_until_terminal(&mut rx).await;
    orchestrator.run_session(&session.session_id).await.unwrap();
    let second = drain(&mut rx);

    assert_eq!(rendered_steps(&first), vec![1, 2, 3]);
    // Steps already delivered are not sent again.
    assert!(rendered_steps(&second).is_empty());
}

#[tokio::test(start_paused = true)]
async fn same_topic_reuses_cached_plan() {
    let backend = Arc::new(ScriptBackend::new(2));
    let service = service_with(backend.clone());
    let orchestrator = service.orchestrator();

    let first = orchestrator
        .register("Explain gravity", SessionParams::default())
        .unwrap();
    orchestrator.run_session(&first.session_id).await.unwrap();
    let second = orchestrator
        .register("Explain gravity", SessionParams::default())
        .unwrap();
    let report = orchestrator.run_session(&second.session_id).await.unwrap();

    assert_eq!(backend.plan_calls(), 1);
    assert_eq!(report.total_steps, 2);
    // Chunks belong to a session, so the new session generates its own.
    assert_eq!(report.generated, 2);
    assert_eq!(service.metrics().plan_cache_hits, 1);
}

#[tokio::test(start_paused = true)]
async fn submit_runs_in_background() {
    let backend = Arc::new(ScriptBackend::new(2));
    let service = service_with(backend);
    let response = service
        .create_session(lectern::CreateSessionRequest {
            topic: "Explain gravity".to_string(),
            params: SessionParams::default(),
        })
        .unwrap();
    let mut rx = join(&service, &response.session_id);
    let events = collect_until_terminal(&mut rx).await;
    assert_eq!(rendered_steps(&events), vec![1, 2]);

    assert!(service.cleanup(&response.session_id));
    assert!(service.session_status(&response.session_id).is_none());
    // The plan is still cached, so the session can be joined and replayed.
    let mut rx = join(&service, &response.session_id);
    let replayed = drain(&mut rx);
    assert_eq!(rendered_steps(&replayed), vec![1, 2]);
}

#[tokio::test]
async fn empty_topic_is_rejected() {
    let service = service_with(Arc::new(ScriptBackend::new(1)));
    let result = service.create_session(lectern::CreateSessionRequest {
        topic: "   ".to_string(),
        params: SessionParams::default(),
    });
    assert!(matches!(result, Err(PipelineError::InvalidRequest(_))));
}
