// tests/common/mod.rs

#![allow(dead_code)]

//! A recording `ChatClient` double shared by the unit tests. Every outbound
//! call is appended to a log the test can assert on; responses are
//! programmable per room.

use async_trait::async_trait;
use palisade::client::{ChatClient, ClientError, SyncBatch};
use palisade::core::event::{AbuseReport, RoomEvent};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    SendState {
        room_id: String,
        event_type: String,
        state_key: String,
        content: Value,
    },
    Ban {
        room_id: String,
        user_id: String,
        reason: String,
    },
    Kick {
        room_id: String,
        user_id: String,
    },
    Unban {
        room_id: String,
        user_id: String,
    },
    Redact {
        room_id: String,
        event_id: String,
    },
    Notice {
        room_id: String,
        body: String,
    },
    React {
        room_id: String,
        event_id: String,
        key: String,
    },
    Join {
        room_id: String,
    },
    PutAccountData {
        event_type: String,
        content: Value,
    },
}

#[derive(Default)]
pub struct MockChatClient {
    pub calls: Mutex<Vec<Call>>,
    /// room id → current ACL content returned by `get_state_event`.
    pub acl_state: Mutex<HashMap<String, Value>>,
    /// How many times the ACL state event was read.
    pub acl_fetches: Mutex<usize>,
    /// room id → power-levels content.
    pub power_levels: Mutex<HashMap<String, Value>>,
    /// room id → joined members.
    pub members: Mutex<HashMap<String, HashMap<String, i64>>>,
    /// room id → recent timeline events (newest first).
    pub recent_messages: Mutex<HashMap<String, Vec<RoomEvent>>>,
    /// account-data store.
    pub account_data: Mutex<HashMap<String, Value>>,
    /// Reports served by `poll_reports`.
    pub reports: Mutex<Vec<AbuseReport>>,
    /// Errors injected per (kind, room) key, consumed one call at a time.
    pub failures: Mutex<HashMap<String, Vec<ClientError>>>,
}

impl MockChatClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn calls_of(&self, pred: impl Fn(&Call) -> bool) -> Vec<Call> {
        self.calls.lock().iter().filter(|c| pred(c)).cloned().collect()
    }

    /// Queues `errors` for successive calls matching `key` (e.g. "ban !r").
    pub fn inject_failures(&self, key: &str, errors: Vec<ClientError>) {
        self.failures.lock().insert(key.to_string(), errors);
    }

    fn next_failure(&self, key: &str) -> Option<ClientError> {
        let mut failures = self.failures.lock();
        let queued = failures.get_mut(key)?;
        if queued.is_empty() { None } else { Some(queued.remove(0)) }
    }
}

#[async_trait]
impl ChatClient for MockChatClient {
    async fn send_state(
        &self,
        room_id: &str,
        event_type: &str,
        state_key: &str,
        content: Value,
    ) -> Result<String, ClientError> {
        if let Some(e) = self.next_failure(&format!("send_state {room_id}")) {
            return Err(e);
        }
        self.calls.lock().push(Call::SendState {
            room_id: room_id.to_string(),
            event_type: event_type.to_string(),
            state_key: state_key.to_string(),
            content: content.clone(),
        });
        if event_type == "m.room.server_acl" {
            self.acl_state.lock().insert(room_id.to_string(), content);
        }
        Ok("$sent".to_string())
    }

    async fn get_state_event(
        &self,
        room_id: &str,
        event_type: &str,
        _state_key: &str,
    ) -> Result<Value, ClientError> {
        if event_type == "m.room.server_acl" {
            *self.acl_fetches.lock() += 1;
            return self
                .acl_state
                .lock()
                .get(room_id)
                .cloned()
                .ok_or(ClientError::NotFound);
        }
        Err(ClientError::NotFound)
    }

    async fn get_room_state(&self, _room_id: &str) -> Result<Vec<RoomEvent>, ClientError> {
        Ok(Vec::new())
    }

    async fn get_power_levels(&self, room_id: &str) -> Result<Value, ClientError> {
        self.power_levels
            .lock()
            .get(room_id)
            .cloned()
            .ok_or(ClientError::NotFound)
    }

    async fn ban(&self, room_id: &str, user_id: &str, reason: &str) -> Result<(), ClientError> {
        if let Some(e) = self.next_failure(&format!("ban {room_id}")) {
            return Err(e);
        }
        self.calls.lock().push(Call::Ban {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn kick(&self, room_id: &str, user_id: &str, _reason: &str) -> Result<(), ClientError> {
        self.calls.lock().push(Call::Kick {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
        });
        Ok(())
    }

    async fn unban(&self, room_id: &str, user_id: &str) -> Result<(), ClientError> {
        self.calls.lock().push(Call::Unban {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
        });
        Ok(())
    }

    async fn redact(
        &self,
        room_id: &str,
        event_id: &str,
        _reason: Option<&str>,
    ) -> Result<String, ClientError> {
        if let Some(e) = self.next_failure(&format!("redact {room_id}")) {
            return Err(e);
        }
        self.calls.lock().push(Call::Redact {
            room_id: room_id.to_string(),
            event_id: event_id.to_string(),
        });
        Ok("$redaction".to_string())
    }

    async fn get_joined_members(
        &self,
        room_id: &str,
    ) -> Result<HashMap<String, i64>, ClientError> {
        Ok(self.members.lock().get(room_id).cloned().unwrap_or_default())
    }

    async fn get_recent_messages(
        &self,
        room_id: &str,
        limit: usize,
    ) -> Result<Vec<RoomEvent>, ClientError> {
        let mut events = self
            .recent_messages
            .lock()
            .get(room_id)
            .cloned()
            .unwrap_or_default();
        events.truncate(limit);
        Ok(events)
    }

    async fn send_notice(&self, room_id: &str, body: &str) -> Result<String, ClientError> {
        self.calls.lock().push(Call::Notice {
            room_id: room_id.to_string(),
            body: body.to_string(),
        });
        Ok("$notice".to_string())
    }

    async fn react(
        &self,
        room_id: &str,
        event_id: &str,
        key: &str,
    ) -> Result<String, ClientError> {
        self.calls.lock().push(Call::React {
            room_id: room_id.to_string(),
            event_id: event_id.to_string(),
            key: key.to_string(),
        });
        Ok("$reaction".to_string())
    }

    async fn join_room(&self, room_id_or_alias: &str) -> Result<String, ClientError> {
        self.calls.lock().push(Call::Join {
            room_id: room_id_or_alias.to_string(),
        });
        Ok(room_id_or_alias.to_string())
    }

    async fn joined_rooms(&self) -> Result<Vec<String>, ClientError> {
        Ok(self.members.lock().keys().cloned().collect())
    }

    async fn get_account_data(&self, event_type: &str) -> Result<Option<Value>, ClientError> {
        Ok(self.account_data.lock().get(event_type).cloned())
    }

    async fn put_account_data(
        &self,
        event_type: &str,
        content: Value,
    ) -> Result<(), ClientError> {
        self.calls.lock().push(Call::PutAccountData {
            event_type: event_type.to_string(),
            content: content.clone(),
        });
        self.account_data
            .lock()
            .insert(event_type.to_string(), content);
        Ok(())
    }

    async fn sync_once(&self, _since: Option<&str>) -> Result<SyncBatch, ClientError> {
        Ok(SyncBatch::default())
    }

    async fn poll_reports(
        &self,
        from: i64,
    ) -> Result<(Vec<AbuseReport>, Option<i64>), ClientError> {
        let reports = self.reports.lock();
        let page: Vec<AbuseReport> = reports
            .iter()
            .filter(|r| r.id >= from)
            .cloned()
            .collect();
        let next = page.iter().map(|r| r.id + 1).max();
        Ok((page, next))
    }
}

/// A rule state event the way a policy room would carry it.
pub fn rule_event(kind: &str, state_key: &str, entity: &str, reason: &str) -> RoomEvent {
    let mut event = RoomEvent::state(
        kind,
        state_key,
        serde_json::json!({
            "entity": entity,
            "recommendation": "m.ban",
            "reason": reason,
        }),
    );
    event.event_id = format!("${state_key}:{entity}");
    event
}

/// An empty-content event tombstoning the rule at `state_key`.
pub fn tombstone_event(kind: &str, state_key: &str) -> RoomEvent {
    let mut event = RoomEvent::state(kind, state_key, serde_json::json!({}));
    event.event_id = format!("${state_key}:tombstone");
    event
}
