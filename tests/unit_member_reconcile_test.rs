// tests/unit_member_reconcile_test.rs

mod common;

use common::{Call, MockChatClient, rule_event};
use palisade::client::ClientError;
use palisade::config::{ProtectionsConfig, RedactionConfig};
use palisade::core::event::RoomEvent;
use palisade::core::policy::PolicyManager;
use palisade::core::policy::rule::RULE_USER_EVENT;
use palisade::core::protect::ProtectedRooms;
use palisade::core::protections::{Protections, REDACT_ON_BAN};
use palisade::core::reconcile::MemberBanReconciler;
use palisade::core::redaction::RedactionQueue;
use palisade::core::reporter::{ErrorAggregator, ErrorKind};
use palisade::core::scheduler::ActionScheduler;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

struct Fixture {
    client: Arc<MockChatClient>,
    policies: Arc<PolicyManager>,
    protected: Arc<ProtectedRooms>,
    protections: Arc<Protections>,
    reporter: Arc<ErrorAggregator>,
    members: MemberBanReconciler,
    shutdown_tx: broadcast::Sender<()>,
}

fn fixture() -> Fixture {
    let client = Arc::new(MockChatClient::new());
    let policies = Arc::new(PolicyManager::new());
    let protected = Arc::new(ProtectedRooms::new());
    let protections = Arc::new(Protections::new(ProtectionsConfig::default()));
    let reporter = Arc::new(ErrorAggregator::new());
    let (scheduler, worker) = ActionScheduler::new(client.clone(), Duration::from_millis(1));
    let (shutdown_tx, _) = broadcast::channel(1);
    tokio::spawn(worker.run(shutdown_tx.subscribe()));

    let (redactions, redaction_worker) = RedactionQueue::new(
        client.clone(),
        scheduler.clone(),
        RedactionConfig::default(),
    );
    tokio::spawn(redaction_worker.run(shutdown_tx.subscribe()));

    let members = MemberBanReconciler::new(
        scheduler,
        policies.clone(),
        protected.clone(),
        redactions,
        protections.clone(),
        reporter.clone(),
        50,
    );
    Fixture {
        client,
        policies,
        protected,
        protections,
        reporter,
        members,
        shutdown_tx,
    }
}

fn join_members(protected: &ProtectedRooms, room_id: &str, users: &[&str]) {
    for (i, user) in users.iter().enumerate() {
        let mut event = RoomEvent::state(
            "m.room.member",
            user,
            serde_json::json!({ "membership": "join" }),
        );
        event.origin_server_ts = i as i64;
        protected.handle_event(room_id, &event);
    }
}

#[tokio::test(start_paused = true)]
async fn test_sweep_bans_exactly_the_matching_member() {
    let f = fixture();
    f.policies.watch("!list:a");
    f.protected.add("!r:a");
    join_members(
        &f.protected,
        "!r:a",
        &["@alice:good", "@spam1:evil.example", "@spam2:other"],
    );
    f.policies.apply_room_events(
        "!list:a",
        &[rule_event(RULE_USER_EVENT, "rule:spam", "@spam*:evil.example", "flood")],
    );

    f.members.sweep_all().await;

    let bans = f.client.calls_of(|c| matches!(c, Call::Ban { .. }));
    assert_eq!(bans.len(), 1);
    assert_eq!(
        bans[0],
        Call::Ban {
            room_id: "!r:a".to_string(),
            user_id: "@spam1:evil.example".to_string(),
            reason: "flood".to_string(),
        }
    );
    let _ = f.shutdown_tx.send(());
}

#[tokio::test(start_paused = true)]
async fn test_sweep_without_user_rules_does_nothing() {
    let f = fixture();
    f.protected.add("!r:a");
    join_members(&f.protected, "!r:a", &["@alice:good"]);
    f.members.sweep_all().await;
    assert!(f.client.calls().is_empty());
    let _ = f.shutdown_tx.send(());
}

#[tokio::test(start_paused = true)]
async fn test_membership_event_triggers_a_targeted_check() {
    let f = fixture();
    f.policies.watch("!list:a");
    f.protected.add("!r:a");
    f.policies.apply_room_events(
        "!list:a",
        &[rule_event(RULE_USER_EVENT, "rule:spam", "@spam*:*", "flood")],
    );

    f.members.on_membership("!r:a", "@spam3:late.join", "join").await;
    f.members.on_membership("!r:a", "@alice:good", "join").await;
    // Leaves are not ban targets.
    f.members.on_membership("!r:a", "@spam4:gone", "leave").await;

    let bans = f.client.calls_of(|c| matches!(c, Call::Ban { .. }));
    assert_eq!(bans.len(), 1);
    assert_eq!(
        bans[0],
        Call::Ban {
            room_id: "!r:a".to_string(),
            user_id: "@spam3:late.join".to_string(),
            reason: "flood".to_string(),
        }
    );
    let _ = f.shutdown_tx.send(());
}

#[tokio::test(start_paused = true)]
async fn test_first_rule_in_insertion_order_supplies_the_reason() {
    let f = fixture();
    f.policies.watch("!list:a");
    f.policies.watch("!list:b");
    f.protected.add("!r:a");
    join_members(&f.protected, "!r:a", &["@spam1:evil.example"]);
    f.policies.apply_room_events(
        "!list:a",
        &[rule_event(RULE_USER_EVENT, "rule:1", "@spam*:evil.example", "first reason")],
    );
    f.policies.apply_room_events(
        "!list:b",
        &[rule_event(RULE_USER_EVENT, "rule:2", "@spam1:*", "second reason")],
    );

    f.members.sweep_all().await;

    let bans = f.client.calls_of(|c| matches!(c, Call::Ban { .. }));
    assert_eq!(bans.len(), 1);
    match &bans[0] {
        Call::Ban { reason, .. } => assert_eq!(reason, "first reason"),
        _ => unreachable!(),
    }
    let _ = f.shutdown_tx.send(());
}

#[tokio::test(start_paused = true)]
async fn test_redact_on_ban_queues_redactions_after_the_ban() {
    let f = fixture();
    f.protections.enable(REDACT_ON_BAN).unwrap();
    f.policies.watch("!list:a");
    f.protected.add("!r:a");
    join_members(&f.protected, "!r:a", &["@spam1:evil.example"]);
    // Two recent messages from the spammer, one from a bystander.
    {
        let mut messages = f.client.recent_messages.lock();
        let msg = |event_id: &str, sender: &str| RoomEvent {
            kind: "m.room.message".to_string(),
            sender: sender.to_string(),
            event_id: event_id.to_string(),
            content: serde_json::json!({ "body": "x" }),
            ..Default::default()
        };
        messages.insert(
            "!r:a".to_string(),
            vec![
                msg("$1", "@spam1:evil.example"),
                msg("$2", "@alice:good"),
                msg("$3", "@spam1:evil.example"),
            ],
        );
    }
    f.policies.apply_room_events(
        "!list:a",
        &[rule_event(RULE_USER_EVENT, "rule:spam", "@spam*:evil.example", "flood")],
    );

    f.members.sweep_all().await;
    // Let the redaction worker drain its queue.
    tokio::time::sleep(Duration::from_secs(5)).await;

    let calls = f.client.calls();
    let ban_pos = calls.iter().position(|c| matches!(c, Call::Ban { .. }));
    let redacted: Vec<&Call> = calls.iter().filter(|c| matches!(c, Call::Redact { .. })).collect();
    assert!(ban_pos.is_some());
    assert_eq!(redacted.len(), 2);
    for call in &redacted {
        match call {
            Call::Redact { event_id, .. } => assert!(event_id == "$1" || event_id == "$3"),
            _ => unreachable!(),
        }
    }
    // Bans land before the follow-up redactions.
    assert!(calls.iter().position(|c| matches!(c, Call::Redact { .. })).unwrap() > ban_pos.unwrap());
    let _ = f.shutdown_tx.send(());
}

#[tokio::test(start_paused = true)]
async fn test_failed_ban_reports_every_matching_rule() {
    let f = fixture();
    f.policies.watch("!list:a");
    f.protected.add("!r:a");
    join_members(&f.protected, "!r:a", &["@spam1:evil.example"]);
    f.policies.apply_room_events(
        "!list:a",
        &[
            rule_event(RULE_USER_EVENT, "rule:1", "@spam*:evil.example", "one"),
            rule_event(RULE_USER_EVENT, "rule:2", "@spam1:*", "two"),
        ],
    );
    f.client.inject_failures("ban !r:a", vec![ClientError::Forbidden]);

    f.members.sweep_all().await;

    let report = f.reporter.drain().expect("the failed ban was recorded");
    assert_eq!(report.entries[0].1, ErrorKind::Permission);
    let message = &report.entries[0].2[0];
    assert!(message.contains("@spam*:evil.example"));
    assert!(message.contains("@spam1:*"));
    let _ = f.shutdown_tx.send(());
}

#[tokio::test(start_paused = true)]
async fn test_no_automatic_unbans() {
    let f = fixture();
    f.policies.watch("!list:a");
    f.protected.add("!r:a");
    // A rule existed, banned someone, and was since tombstoned; the sweep
    // must not unban anyone on its own.
    f.members.sweep_all().await;
    assert!(f.client.calls_of(|c| matches!(c, Call::Unban { .. })).is_empty());
    let _ = f.shutdown_tx.send(());
}
