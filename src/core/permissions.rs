// src/core/permissions.rs

//! The permission verifier: checks that the daemon's account holds power
//! levels adequate for banning, kicking, redacting, and writing the server
//! ACL in every protected room.

use crate::client::ChatClient;
use crate::core::event::SERVER_ACL_EVENT;
use crate::core::protect::ProtectedRooms;
use crate::core::reporter::{ErrorAggregator, ErrorKind};
use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub struct PermissionVerifier {
    client: Arc<dyn ChatClient>,
    protected: Arc<ProtectedRooms>,
    reporter: Arc<ErrorAggregator>,
    user_id: String,
}

impl PermissionVerifier {
    pub fn new(
        client: Arc<dyn ChatClient>,
        protected: Arc<ProtectedRooms>,
        reporter: Arc<ErrorAggregator>,
        user_id: &str,
    ) -> Self {
        Self {
            client,
            protected,
            reporter,
            user_id: user_id.to_string(),
        }
    }

    /// Verifies every protected room; records one permission error per room
    /// with deficits. Returns the number of rooms that failed verification.
    pub async fn verify_all(&self) -> usize {
        let rooms = self.protected.room_ids();
        let checks = rooms.iter().map(|room_id| self.verify_room(room_id));
        join_all(checks).await.into_iter().filter(|ok| !ok).count()
    }

    /// Returns true when the daemon holds every required level in the room.
    pub async fn verify_room(&self, room_id: &str) -> bool {
        let levels = match self.client.get_power_levels(room_id).await {
            Ok(levels) => levels,
            Err(e) => {
                self.reporter.record(
                    room_id,
                    ErrorKind::Transient,
                    format!("could not fetch power levels: {e}"),
                );
                return false;
            }
        };

        let own = effective_level(&levels, &self.user_id);
        let mut deficits = Vec::new();
        for (name, required) in [
            ("ban", action_level(&levels, "ban", 50)),
            ("kick", action_level(&levels, "kick", 50)),
            ("redact", action_level(&levels, "redact", 50)),
            (SERVER_ACL_EVENT, state_event_level(&levels, SERVER_ACL_EVENT)),
        ] {
            if own < required {
                deficits.push(format!("{name} needs {required}, we have {own}"));
            }
        }

        if deficits.is_empty() {
            debug!("Permissions verified for {room_id} (level {own}).");
            true
        } else {
            self.reporter
                .record(room_id, ErrorKind::Permission, deficits.join("; "));
            false
        }
    }
}

/// The daemon's effective level: its `users` entry, else `users_default`.
fn effective_level(levels: &Value, user_id: &str) -> i64 {
    levels
        .get("users")
        .and_then(|users| users.get(user_id))
        .and_then(Value::as_i64)
        .unwrap_or_else(|| levels.get("users_default").and_then(Value::as_i64).unwrap_or(0))
}

/// The level required for a top-level action key (`ban`, `kick`, `redact`).
fn action_level(levels: &Value, action: &str, default: i64) -> i64 {
    levels.get(action).and_then(Value::as_i64).unwrap_or(default)
}

/// The level required to send a given state event: its `events` entry, else
/// `state_default`.
fn state_event_level(levels: &Value, event_type: &str) -> i64 {
    levels
        .get("events")
        .and_then(|events| events.get(event_type))
        .and_then(Value::as_i64)
        .unwrap_or_else(|| {
            levels
                .get("state_default")
                .and_then(Value::as_i64)
                .unwrap_or(50)
        })
}
