// src/core/event.rs

//! The inbound event model: the fields of a room event the daemon consumes,
//! and the `(room, event)` tuples delivered by the sync stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known event types the daemon reads or writes.
pub const MEMBER_EVENT: &str = "m.room.member";
pub const SERVER_ACL_EVENT: &str = "m.room.server_acl";
pub const POWER_LEVELS_EVENT: &str = "m.room.power_levels";
pub const MESSAGE_EVENT: &str = "m.room.message";
pub const REACTION_EVENT: &str = "m.reaction";

/// A single room event, reduced to the fields the core consumes.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RoomEvent {
    #[serde(rename = "type")]
    pub kind: String,
    /// Present for state events; `None` for timeline events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_key: Option<String>,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub origin_server_ts: i64,
}

impl RoomEvent {
    /// Builds a state event; the usual constructor in tests and fixtures.
    pub fn state(kind: &str, state_key: &str, content: Value) -> Self {
        Self {
            kind: kind.to_string(),
            state_key: Some(state_key.to_string()),
            content,
            ..Default::default()
        }
    }

    pub fn is_state(&self) -> bool {
        self.state_key.is_some()
    }

    /// The `membership` field of an `m.room.member` event, if this is one.
    pub fn membership(&self) -> Option<&str> {
        if self.kind != MEMBER_EVENT {
            return None;
        }
        self.content.get("membership").and_then(Value::as_str)
    }

    /// True when the content is an empty object, which tombstones the state
    /// this event's `(type, state_key)` pair previously carried.
    pub fn has_empty_content(&self) -> bool {
        self.content.as_object().is_some_and(|o| o.is_empty()) || self.content.is_null()
    }
}

/// One entry of the inbound stream: a room id paired with an event.
/// Per-room ordering is server-assigned; there is no cross-room ordering.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub room_id: String,
    pub event: RoomEvent,
}

/// An abuse report fetched from the server's report endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbuseReport {
    pub id: i64,
    pub room_id: String,
    #[serde(default)]
    pub event_id: Option<String>,
    /// The user who filed the report.
    pub user_id: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub received_ts: i64,
}
