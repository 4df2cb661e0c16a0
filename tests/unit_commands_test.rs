// tests/unit_commands_test.rs

mod common;

use common::{Call, MockChatClient, rule_event};
use palisade::Moderator;
use palisade::config::Config;
use palisade::core::commands::CommandListener;
use palisade::core::event::{InboundEvent, RoomEvent};
use palisade::core::policy::rule::RULE_SERVER_EVENT;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

const MGMT: &str = "!mgmt:good.example";

fn test_config() -> Config {
    Config {
        user_id: "@palisade:good.example".to_string(),
        own_server: "good.example".to_string(),
        management_room: MGMT.to_string(),
        background_delay_ms: 1,
        ..Default::default()
    }
}

struct Fixture {
    client: Arc<MockChatClient>,
    moderator: Arc<Moderator>,
    tx: mpsc::Sender<InboundEvent>,
    shutdown_tx: broadcast::Sender<()>,
}

fn fixture() -> Fixture {
    let client = Arc::new(MockChatClient::new());
    let (moderator, init) = Moderator::new(test_config(), client.clone());
    let (shutdown_tx, _) = broadcast::channel(1);
    tokio::spawn(init.scheduler_worker.run(shutdown_tx.subscribe()));

    let (tx, rx) = mpsc::channel(16);
    let listener = CommandListener::new(Arc::clone(&moderator), rx);
    tokio::spawn(listener.run(shutdown_tx.subscribe()));

    Fixture {
        client,
        moderator,
        tx,
        shutdown_tx,
    }
}

fn command(body: &str, event_id: &str) -> InboundEvent {
    InboundEvent {
        room_id: MGMT.to_string(),
        event: RoomEvent {
            kind: "m.room.message".to_string(),
            sender: "@mod:good.example".to_string(),
            event_id: event_id.to_string(),
            content: json!({ "msgtype": "m.text", "body": body }),
            ..Default::default()
        },
    }
}

fn reactions(client: &MockChatClient) -> Vec<(String, String)> {
    client
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::React { event_id, key, .. } => Some((event_id, key)),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_sync_command_is_acknowledged_with_a_checkmark() {
    let f = fixture();
    f.tx.send(command("!palisade sync", "$cmd1")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(
        reactions(&f.client),
        vec![("$cmd1".to_string(), "✅".to_string())]
    );
    let _ = f.shutdown_tx.send(());
}

#[tokio::test(start_paused = true)]
async fn test_rules_command_replies_with_the_dump_then_acknowledges() {
    let f = fixture();
    f.moderator.policies.watch("!list:a");
    f.moderator.policies.apply_room_events(
        "!list:a",
        &[rule_event(RULE_SERVER_EVENT, "rule:evil", "evil.example", "spam")],
    );

    f.tx.send(command("!palisade rules", "$cmd2")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let notices = f.client.calls_of(|c| matches!(c, Call::Notice { .. }));
    assert_eq!(notices.len(), 1);
    match &notices[0] {
        Call::Notice { room_id, body } => {
            assert_eq!(room_id, MGMT);
            assert!(body.contains("[server] evil.example: spam"));
        }
        _ => unreachable!(),
    }
    assert_eq!(
        reactions(&f.client),
        vec![("$cmd2".to_string(), "✅".to_string())]
    );
    let _ = f.shutdown_tx.send(());
}

#[tokio::test(start_paused = true)]
async fn test_failed_verify_is_acknowledged_with_a_cross() {
    let f = fixture();
    // A protected room with no readable power levels fails verification.
    f.moderator.protected.add("!r:a");

    f.tx.send(command("!palisade verify", "$cmd3")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(
        reactions(&f.client),
        vec![("$cmd3".to_string(), "❌".to_string())]
    );
    let notices = f.client.calls_of(|c| matches!(c, Call::Notice { .. }));
    assert_eq!(notices.len(), 1);
    match &notices[0] {
        Call::Notice { body, .. } => assert!(body.contains("1 rooms failed")),
        _ => unreachable!(),
    }
    let _ = f.shutdown_tx.send(());
}

#[tokio::test(start_paused = true)]
async fn test_unaddressed_chatter_and_unknown_words_are_ignored() {
    let f = fixture();
    f.tx.send(command("hello everyone", "$chat")).await.unwrap();
    f.tx.send(command("!palisade frobnicate", "$unknown")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(f.client.calls().is_empty());
    let _ = f.shutdown_tx.send(());
}

#[tokio::test(start_paused = true)]
async fn test_own_messages_are_never_acknowledged() {
    let f = fixture();
    let mut echo = command("!palisade sync", "$echo");
    echo.event.sender = "@palisade:good.example".to_string();
    f.tx.send(echo).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(f.client.calls().is_empty());
    let _ = f.shutdown_tx.send(());
}
