//! Ordered delivery under out-of-order completion and concurrent subscribers

use super::test_utils::*;
use lectern::delivery::DeliveryEvent;
use lectern::lecture::SessionParams;
use lectern::CreateSessionRequest;
use std::sync::Arc;
use std::time::Duration;

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

#[tokio::test(start_paused = true)]
async fn later_steps_finishing_first_are_held_back() {
    let backend = Arc::new(
        ScriptBackend::new(5)
            .delay_step(1, ms(300))
            .delay_step(2, ms(200))
            .delay_step(3, ms(100)),
    );
    let service = service_with(backend.clone());
    let orchestrator = service.orchestrator();
    let session = orchestrator
        .register("Explain gravity", SessionParams::default())
        .unwrap();
    let mut rx = join(&service, &session.session_id);

    orchestrator.run_session(&session.session_id).await.unwrap();

    let events = collect_until_terminal(&mut rx).await;
    assert_eq!(rendered_steps(&events), vec![1, 2, 3, 4, 5]);
    assert!(backend.peak_in_flight() <= 3);
    assert!(backend.peak_in_flight() >= 2);
}

#[tokio::test(start_paused = true)]
async fn mid_run_joiner_gets_replay_then_live_steps() {
    let backend = Arc::new(
        ScriptBackend::new(5)
            .delay_step(2, ms(100))
            .delay_step(3, ms(200))
            .delay_step(4, ms(300))
            .delay_step(5, ms(400)),
    );
    let service = service_with(backend);
    let response = service
        .create_session(CreateSessionRequest {
            topic: "Explain gravity".to_string(),
            params: SessionParams::default(),
        })
        .unwrap();
    let mut early = join(&service, &response.session_id);

    tokio::time::sleep(ms(250)).await;
    let mut late = join(&service, &response.session_id);
    let replayed = drain(&mut late);
    assert_eq!(rendered_steps(&replayed), vec![1, 2, 3]);

    let rest = collect_until_terminal(&mut late).await;
    assert_eq!(rendered_steps(&rest), vec![4, 5]);
    assert!(matches!(rest.last(), Some(DeliveryEvent::Completed { .. })));

    let all = collect_until_terminal(&mut early).await;
    assert_eq!(rendered_steps(&all), vec![1, 2, 3, 4, 5]);
}

#[tokio::test(start_paused = true)]
async fn left_channel_stops_receiving() {
    let backend = Arc::new(ScriptBackend::new(3).delay_step(2, ms(100)));
    let service = service_with(backend);
    let response = service
        .create_session(CreateSessionRequest {
            topic: "Explain gravity".to_string(),
            params: SessionParams::default(),
        })
        .unwrap();

    let (handle, mut gone) = lectern::delivery::ChannelHandle::pair();
    service.join(&response.session_id, handle.clone()).unwrap();
    let mut stays = join(&service, &response.session_id);
    assert!(service.leave(&response.session_id, handle.id()));

    let events = collect_until_terminal(&mut stays).await;
    assert_eq!(rendered_steps(&events), vec![1, 2, 3]);
    assert!(drain(&mut gone).is_empty());
}

#[tokio::test(start_paused = true)]
async fn dropped_receiver_does_not_disturb_others() {
    let backend = Arc::new(ScriptBackend::new(3).delay_step(1, ms(50)));
    let service = service_with(backend);
    let orchestrator = service.orchestrator();
    let session = orchestrator
        .register("Explain gravity", SessionParams::default())
        .unwrap();
    let dropped = join(&service, &session.session_id);
    drop(dropped);
    let mut rx = join(&service, &session.session_id);

    orchestrator.run_session(&session.session_id).await.unwrap();
    let events = collect_until_terminal(&mut rx).await;
    assert_eq!(rendered_steps(&events), vec![1, 2, 3]);
    let status = orchestrator.status(&session.session_id).unwrap();
    assert!(status.is_terminal());
}
