// tests/unit_reports_test.rs

mod common;

use common::{Call, MockChatClient};
use palisade::core::account::REPORT_CURSOR_EVENT;
use palisade::core::event::AbuseReport;
use palisade::core::reports::ReportPoller;
use palisade::core::scheduler::ActionScheduler;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn report(id: i64, reason: &str) -> AbuseReport {
    AbuseReport {
        id,
        room_id: "!r:a".to_string(),
        event_id: Some(format!("$evt{id}")),
        user_id: "@reporter:good".to_string(),
        reason: Some(reason.to_string()),
        received_ts: 1_700_000_000_000,
    }
}

#[tokio::test(start_paused = true)]
async fn test_new_reports_are_surfaced_and_the_cursor_persisted() {
    let client = Arc::new(MockChatClient::new());
    client.reports.lock().extend([report(0, "spam"), report(1, "harassment")]);

    let (scheduler, worker) = ActionScheduler::new(client.clone(), Duration::from_millis(1));
    let (shutdown_tx, _) = broadcast::channel(1);
    tokio::spawn(worker.run(shutdown_tx.subscribe()));

    let poller = ReportPoller::new(
        client.clone(),
        scheduler,
        "!mgmt:good",
        Duration::from_secs(60),
    );
    tokio::spawn(poller.run(shutdown_tx.subscribe()));

    // Let one poll interval elapse plus a little slack for the notices.
    tokio::time::sleep(Duration::from_secs(65)).await;

    let notices = client.calls_of(|c| matches!(c, Call::Notice { .. }));
    assert_eq!(notices.len(), 2);
    match &notices[0] {
        Call::Notice { room_id, body } => {
            assert_eq!(room_id, "!mgmt:good");
            assert!(body.contains("spam"));
            assert!(body.contains("@reporter:good"));
        }
        _ => unreachable!(),
    }

    // The cursor advanced past both reports and was written back.
    let cursor = client
        .account_data
        .lock()
        .get(REPORT_CURSOR_EVENT)
        .cloned()
        .unwrap();
    assert_eq!(cursor["from"], 2);

    // Another interval with no new reports stays quiet.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(client.calls_of(|c| matches!(c, Call::Notice { .. })).len(), 2);
    let _ = shutdown_tx.send(());
}
