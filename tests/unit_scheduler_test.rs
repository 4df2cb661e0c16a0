// tests/unit_scheduler_test.rs

mod common;

use common::{Call, MockChatClient};
use palisade::client::ClientError;
use palisade::core::actions::Action;
use palisade::core::scheduler::{ActionError, ActionScheduler};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

fn notice(n: usize) -> Action {
    Action::Notice {
        room_id: "!mgmt:a".to_string(),
        body: format!("notice {n}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_tasks_execute_in_submission_order() {
    let client = Arc::new(MockChatClient::new());
    let (scheduler, worker) = ActionScheduler::new(client.clone(), Duration::from_millis(100));
    let (shutdown_tx, _) = broadcast::channel(1);
    let handle = tokio::spawn(worker.run(shutdown_tx.subscribe()));

    let mut slots = Vec::new();
    for n in 0..5 {
        slots.push(scheduler.submit(notice(n)).await);
    }
    for slot in slots {
        assert_eq!(slot.await.unwrap(), Ok(()));
    }

    let bodies: Vec<String> = client
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::Notice { body, .. } => Some(body),
            _ => None,
        })
        .collect();
    assert_eq!(bodies, vec!["notice 0", "notice 1", "notice 2", "notice 3", "notice 4"]);

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_throttle_spaces_tasks_by_min_delay() {
    let client = Arc::new(MockChatClient::new());
    let (scheduler, worker) = ActionScheduler::new(client.clone(), Duration::from_millis(100));
    let (shutdown_tx, _) = broadcast::channel(1);
    let handle = tokio::spawn(worker.run(shutdown_tx.subscribe()));

    let started = Instant::now();
    let mut slots = Vec::new();
    for n in 0..10 {
        slots.push(scheduler.submit(notice(n)).await);
    }
    for slot in slots {
        assert_eq!(slot.await.unwrap(), Ok(()));
    }

    // Ten instantaneous tasks take at least (10 - 1) × 100 ms.
    assert!(started.elapsed() >= Duration::from_millis(900));

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried_until_success() {
    let client = Arc::new(MockChatClient::new());
    client.inject_failures(
        "ban !r:a",
        vec![
            ClientError::RateLimited { retry_after_ms: 200 },
            ClientError::Other { code: 502, message: "bad gateway".into() },
        ],
    );
    let (scheduler, worker) = ActionScheduler::new(client.clone(), Duration::from_millis(10));
    let (shutdown_tx, _) = broadcast::channel(1);
    let handle = tokio::spawn(worker.run(shutdown_tx.subscribe()));

    let slot = scheduler
        .submit(Action::Ban {
            room_id: "!r:a".to_string(),
            user_id: "@spam:evil.example".to_string(),
            reason: "spam".to_string(),
        })
        .await;
    assert_eq!(slot.await.unwrap(), Ok(()));

    // The two injected failures were absorbed; exactly one ban landed.
    let bans = client.calls_of(|c| matches!(c, Call::Ban { .. }));
    assert_eq!(bans.len(), 1);

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhaust_after_persistent_transient_failure() {
    let client = Arc::new(MockChatClient::new());
    client.inject_failures(
        "ban !r:a",
        vec![ClientError::Transport("connection reset".into()); 10],
    );
    let (scheduler, worker) = ActionScheduler::new(client.clone(), Duration::from_millis(10));
    let (shutdown_tx, _) = broadcast::channel(1);
    let handle = tokio::spawn(worker.run(shutdown_tx.subscribe()));

    let slot = scheduler
        .submit(Action::Ban {
            room_id: "!r:a".to_string(),
            user_id: "@spam:evil.example".to_string(),
            reason: "spam".to_string(),
        })
        .await;
    match slot.await.unwrap() {
        Err(ActionError::RetriesExhausted(ClientError::Transport(_))) => {}
        other => panic!("expected retry exhaustion, got {other:?}"),
    }

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_permanent_failure_surfaces_immediately_and_worker_continues() {
    let client = Arc::new(MockChatClient::new());
    client.inject_failures("ban !r:a", vec![ClientError::Forbidden]);
    let (scheduler, worker) = ActionScheduler::new(client.clone(), Duration::from_millis(10));
    let (shutdown_tx, _) = broadcast::channel(1);
    let handle = tokio::spawn(worker.run(shutdown_tx.subscribe()));

    let failed = scheduler
        .submit(Action::Ban {
            room_id: "!r:a".to_string(),
            user_id: "@spam:evil.example".to_string(),
            reason: "spam".to_string(),
        })
        .await;
    let ok = scheduler.submit(notice(1)).await;

    assert_eq!(
        failed.await.unwrap(),
        Err(ActionError::Failed(ClientError::Forbidden))
    );
    // The failure did not wedge the worker; later tasks still run.
    assert_eq!(ok.await.unwrap(), Ok(()));

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_pending_tasks_as_cancelled() {
    let client = Arc::new(MockChatClient::new());
    let (scheduler, worker) = ActionScheduler::new(client.clone(), Duration::from_secs(3600));
    let (shutdown_tx, _) = broadcast::channel(1);

    // Queue several tasks before the worker ever runs, then shut down
    // immediately: only the first task can start; the rest drain cancelled.
    let first = scheduler.submit(notice(0)).await;
    let second = scheduler.submit(notice(1)).await;
    let third = scheduler.submit(notice(2)).await;

    let handle = tokio::spawn(worker.run(shutdown_tx.subscribe()));
    assert_eq!(first.await.unwrap(), Ok(()));
    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();

    assert_eq!(second.await.unwrap(), Err(ActionError::Cancelled));
    assert_eq!(third.await.unwrap(), Err(ActionError::Cancelled));
}
