// src/client/mod.rs

//! The outbound chat-server interface. The core talks to the server only
//! through the [`ChatClient`] trait; the production implementation lives in
//! [`http`], and tests substitute a recording double.

pub mod http;

use crate::core::event::{AbuseReport, InboundEvent, RoomEvent};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

pub use http::HttpChatClient;

/// The typed failure set of every outbound server operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("forbidden")]
    Forbidden,

    #[error("rate limited, retry after {retry_after_ms} ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("not found")]
    NotFound,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("server returned {code}: {message}")]
    Other { code: u16, message: String },
}

impl ClientError {
    /// Transient failures are retried by the scheduler with backoff;
    /// everything else surfaces to the submitter immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::RateLimited { .. } | ClientError::Transport(_) => true,
            ClientError::Other { code, .. } => *code >= 500,
            _ => false,
        }
    }
}

/// A batch of events delivered by one sync round, plus the token to resume
/// from on the next call.
#[derive(Debug, Clone, Default)]
pub struct SyncBatch {
    pub events: Vec<InboundEvent>,
    pub next_token: String,
}

/// The chat-server operations the core requires.
///
/// Mutating calls (`ban`, `kick`, `send_state`, `redact`, ...) are only ever
/// issued from the action scheduler's worker so the global throttle holds.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Sends a state event and returns its event id.
    async fn send_state(
        &self,
        room_id: &str,
        event_type: &str,
        state_key: &str,
        content: Value,
    ) -> Result<String, ClientError>;

    /// Fetches a single state event's content. `NotFound` when the room has
    /// no such event.
    async fn get_state_event(
        &self,
        room_id: &str,
        event_type: &str,
        state_key: &str,
    ) -> Result<Value, ClientError>;

    /// Fetches the full current state of a room.
    async fn get_room_state(&self, room_id: &str) -> Result<Vec<RoomEvent>, ClientError>;

    /// Fetches the `m.room.power_levels` content of a room.
    async fn get_power_levels(&self, room_id: &str) -> Result<Value, ClientError>;

    async fn ban(&self, room_id: &str, user_id: &str, reason: &str) -> Result<(), ClientError>;
    async fn kick(&self, room_id: &str, user_id: &str, reason: &str) -> Result<(), ClientError>;
    async fn unban(&self, room_id: &str, user_id: &str) -> Result<(), ClientError>;

    /// Redacts one event; returns the redaction's own event id.
    async fn redact(
        &self,
        room_id: &str,
        event_id: &str,
        reason: Option<&str>,
    ) -> Result<String, ClientError>;

    /// Joined members of a room, mapped to the join timestamp in ms where the
    /// server exposes one (0 otherwise).
    async fn get_joined_members(&self, room_id: &str)
    -> Result<HashMap<String, i64>, ClientError>;

    /// The most recent timeline events of a room, newest first, bounded by
    /// `limit`. Used by the redaction queue's member scan.
    async fn get_recent_messages(
        &self,
        room_id: &str,
        limit: usize,
    ) -> Result<Vec<RoomEvent>, ClientError>;

    /// Posts a plain-text notice and returns its event id.
    async fn send_notice(&self, room_id: &str, body: &str) -> Result<String, ClientError>;

    /// Annotates an event with a reaction key (✅/❌ command acknowledgement).
    async fn react(&self, room_id: &str, event_id: &str, key: &str)
    -> Result<String, ClientError>;

    /// Joins a room by id or alias; returns the resolved room id.
    async fn join_room(&self, room_id_or_alias: &str) -> Result<String, ClientError>;

    async fn joined_rooms(&self) -> Result<Vec<String>, ClientError>;

    /// Reads an account-data blob; `Ok(None)` when it has never been written.
    async fn get_account_data(&self, event_type: &str) -> Result<Option<Value>, ClientError>;

    /// Writes an account-data blob.
    async fn put_account_data(&self, event_type: &str, content: Value)
    -> Result<(), ClientError>;

    /// Long-polls the server for the next batch of inbound events.
    async fn sync_once(&self, since: Option<&str>) -> Result<SyncBatch, ClientError>;

    /// Polls the abuse-report endpoint from the given pagination offset.
    /// Returns the reports plus the next offset, if there are more.
    async fn poll_reports(
        &self,
        from: i64,
    ) -> Result<(Vec<AbuseReport>, Option<i64>), ClientError>;
}
