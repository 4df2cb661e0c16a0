// src/client/http.rs

//! The production `ChatClient`: a thin `reqwest` wrapper over the
//! Matrix-compatible client-server API, with bearer-token auth and a
//! per-request timeout.

use super::{ChatClient, ClientError, SyncBatch};
use crate::config::Config;
use crate::core::event::{AbuseReport, InboundEvent, RoomEvent};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;
use urlencoding::encode;
use uuid::Uuid;

/// How long the server may hold a sync long-poll open, in milliseconds.
const SYNC_LONG_POLL_MS: u64 = 30_000;

pub struct HttpChatClient {
    http: reqwest::Client,
    base_url: String,
    user_id: String,
    timeout: Duration,
}

impl HttpChatClient {
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        let mut headers = reqwest::header::HeaderMap::new();
        let bearer = format!("Bearer {}", config.access_token);
        let mut auth = reqwest::header::HeaderValue::from_str(&bearer)
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        auth.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.homeserver_url.trim_end_matches('/').to_string(),
            user_id: config.user_id.clone(),
            timeout: Duration::from_secs(config.http_timeout_secs),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/_matrix/client/v3{path}", self.base_url)
    }

    /// Issues a request with the standard per-request timeout.
    async fn request(
        &self,
        method: Method,
        url: String,
        body: Option<Value>,
    ) -> Result<Value, ClientError> {
        self.request_with_timeout(method, url, body, self.timeout)
            .await
    }

    /// Issues a request and maps the response onto the typed failure set.
    async fn request_with_timeout(
        &self,
        method: Method,
        url: String,
        body: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, ClientError> {
        let mut req = self.http.request(method, url).timeout(timeout);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<Value>()
                .await
                .map_err(|e| ClientError::Transport(e.to_string()));
        }

        let body: Value = resp.json().await.unwrap_or(Value::Null);
        Err(map_error(status, &body))
    }
}

/// Maps an HTTP error status plus a standard error body onto `ClientError`.
fn map_error(status: StatusCode, body: &Value) -> ClientError {
    let message = body
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    match status {
        StatusCode::FORBIDDEN => ClientError::Forbidden,
        StatusCode::NOT_FOUND => ClientError::NotFound,
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after_ms = body
                .get("retry_after_ms")
                .and_then(Value::as_u64)
                .unwrap_or(5_000);
            ClientError::RateLimited { retry_after_ms }
        }
        _ => ClientError::Other {
            code: status.as_u16(),
            message,
        },
    }
}

#[derive(Deserialize)]
struct SyncResponse {
    next_batch: String,
    #[serde(default)]
    rooms: SyncRooms,
}

#[derive(Deserialize, Default)]
struct SyncRooms {
    #[serde(default)]
    join: HashMap<String, JoinedRoomUpdate>,
}

#[derive(Deserialize, Default)]
struct JoinedRoomUpdate {
    #[serde(default)]
    state: EventContainer,
    #[serde(default)]
    timeline: EventContainer,
}

#[derive(Deserialize, Default)]
struct EventContainer {
    #[serde(default)]
    events: Vec<Value>,
}

fn parse_events(room_id: &str, raw: Vec<Value>, out: &mut Vec<InboundEvent>) {
    for value in raw {
        match serde_json::from_value::<RoomEvent>(value) {
            Ok(event) => out.push(InboundEvent {
                room_id: room_id.to_string(),
                event,
            }),
            Err(e) => warn!("Dropping undecodable event in {room_id}: {e}"),
        }
    }
}

#[async_trait]
impl ChatClient for HttpChatClient {
    async fn send_state(
        &self,
        room_id: &str,
        event_type: &str,
        state_key: &str,
        content: Value,
    ) -> Result<String, ClientError> {
        let url = self.url(&format!(
            "/rooms/{}/state/{}/{}",
            encode(room_id),
            encode(event_type),
            encode(state_key)
        ));
        let resp = self.request(Method::PUT, url, Some(content)).await?;
        Ok(resp
            .get("event_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    async fn get_state_event(
        &self,
        room_id: &str,
        event_type: &str,
        state_key: &str,
    ) -> Result<Value, ClientError> {
        let url = self.url(&format!(
            "/rooms/{}/state/{}/{}",
            encode(room_id),
            encode(event_type),
            encode(state_key)
        ));
        self.request(Method::GET, url, None).await
    }

    async fn get_room_state(&self, room_id: &str) -> Result<Vec<RoomEvent>, ClientError> {
        let url = self.url(&format!("/rooms/{}/state", encode(room_id)));
        let resp = self.request(Method::GET, url, None).await?;
        let raw: Vec<Value> = serde_json::from_value(resp)
            .map_err(|e| ClientError::Transport(format!("malformed state response: {e}")))?;
        let mut events = Vec::with_capacity(raw.len());
        parse_events(room_id, raw, &mut events);
        Ok(events.into_iter().map(|i| i.event).collect())
    }

    async fn get_power_levels(&self, room_id: &str) -> Result<Value, ClientError> {
        self.get_state_event(room_id, crate::core::event::POWER_LEVELS_EVENT, "")
            .await
    }

    async fn ban(&self, room_id: &str, user_id: &str, reason: &str) -> Result<(), ClientError> {
        let url = self.url(&format!("/rooms/{}/ban", encode(room_id)));
        self.request(
            Method::POST,
            url,
            Some(json!({ "user_id": user_id, "reason": reason })),
        )
        .await?;
        Ok(())
    }

    async fn kick(&self, room_id: &str, user_id: &str, reason: &str) -> Result<(), ClientError> {
        let url = self.url(&format!("/rooms/{}/kick", encode(room_id)));
        self.request(
            Method::POST,
            url,
            Some(json!({ "user_id": user_id, "reason": reason })),
        )
        .await?;
        Ok(())
    }

    async fn unban(&self, room_id: &str, user_id: &str) -> Result<(), ClientError> {
        let url = self.url(&format!("/rooms/{}/unban", encode(room_id)));
        self.request(Method::POST, url, Some(json!({ "user_id": user_id })))
            .await?;
        Ok(())
    }

    async fn redact(
        &self,
        room_id: &str,
        event_id: &str,
        reason: Option<&str>,
    ) -> Result<String, ClientError> {
        let txn = Uuid::new_v4();
        let url = self.url(&format!(
            "/rooms/{}/redact/{}/{txn}",
            encode(room_id),
            encode(event_id)
        ));
        let body = match reason {
            Some(reason) => json!({ "reason": reason }),
            None => json!({}),
        };
        let resp = self.request(Method::PUT, url, Some(body)).await?;
        Ok(resp
            .get("event_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    async fn get_joined_members(
        &self,
        room_id: &str,
    ) -> Result<HashMap<String, i64>, ClientError> {
        let url = self.url(&format!("/rooms/{}/joined_members", encode(room_id)));
        let resp = self.request(Method::GET, url, None).await?;
        let joined = resp
            .get("joined")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        // The joined_members endpoint carries no timestamps; joins observed
        // later through the sync stream refine these entries.
        Ok(joined.keys().map(|user| (user.clone(), 0)).collect())
    }

    async fn get_recent_messages(
        &self,
        room_id: &str,
        limit: usize,
    ) -> Result<Vec<RoomEvent>, ClientError> {
        let url = self.url(&format!(
            "/rooms/{}/messages?dir=b&limit={limit}",
            encode(room_id)
        ));
        let resp = self.request(Method::GET, url, None).await?;
        let raw: Vec<Value> = resp
            .get("chunk")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut events = Vec::with_capacity(raw.len());
        parse_events(room_id, raw, &mut events);
        Ok(events.into_iter().map(|i| i.event).collect())
    }

    async fn send_notice(&self, room_id: &str, body: &str) -> Result<String, ClientError> {
        let txn = Uuid::new_v4();
        let url = self.url(&format!("/rooms/{}/send/m.room.message/{txn}", encode(room_id)));
        let resp = self
            .request(
                Method::PUT,
                url,
                Some(json!({ "msgtype": "m.notice", "body": body })),
            )
            .await?;
        Ok(resp
            .get("event_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    async fn react(
        &self,
        room_id: &str,
        event_id: &str,
        key: &str,
    ) -> Result<String, ClientError> {
        let txn = Uuid::new_v4();
        let url = self.url(&format!("/rooms/{}/send/m.reaction/{txn}", encode(room_id)));
        let resp = self
            .request(
                Method::PUT,
                url,
                Some(json!({
                    "m.relates_to": {
                        "rel_type": "m.annotation",
                        "event_id": event_id,
                        "key": key,
                    }
                })),
            )
            .await?;
        Ok(resp
            .get("event_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    async fn join_room(&self, room_id_or_alias: &str) -> Result<String, ClientError> {
        let url = self.url(&format!("/join/{}", encode(room_id_or_alias)));
        let resp = self.request(Method::POST, url, Some(json!({}))).await?;
        Ok(resp
            .get("room_id")
            .and_then(Value::as_str)
            .unwrap_or(room_id_or_alias)
            .to_string())
    }

    async fn joined_rooms(&self) -> Result<Vec<String>, ClientError> {
        let url = self.url("/joined_rooms");
        let resp = self.request(Method::GET, url, None).await?;
        Ok(resp
            .get("joined_rooms")
            .and_then(Value::as_array)
            .map(|rooms| {
                rooms
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_account_data(&self, event_type: &str) -> Result<Option<Value>, ClientError> {
        let url = self.url(&format!(
            "/user/{}/account_data/{}",
            encode(&self.user_id),
            encode(event_type)
        ));
        match self.request(Method::GET, url, None).await {
            Ok(value) => Ok(Some(value)),
            Err(ClientError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn put_account_data(
        &self,
        event_type: &str,
        content: Value,
    ) -> Result<(), ClientError> {
        let url = self.url(&format!(
            "/user/{}/account_data/{}",
            encode(&self.user_id),
            encode(event_type)
        ));
        self.request(Method::PUT, url, Some(content)).await?;
        Ok(())
    }

    async fn sync_once(&self, since: Option<&str>) -> Result<SyncBatch, ClientError> {
        let mut url = self.url(&format!("/sync?timeout={SYNC_LONG_POLL_MS}"));
        if let Some(since) = since {
            url.push_str(&format!("&since={}", encode(since)));
        }
        // The long-poll is allowed to hold the connection open well past the
        // standard per-request timeout.
        let resp = self
            .request_with_timeout(
                Method::GET,
                url,
                None,
                self.timeout + Duration::from_millis(SYNC_LONG_POLL_MS),
            )
            .await?;
        let sync: SyncResponse = serde_json::from_value(resp)
            .map_err(|e| ClientError::Transport(format!("malformed sync response: {e}")))?;

        let mut events = Vec::new();
        for (room_id, update) in sync.rooms.join {
            // State resolution happens server-side; within a room the state
            // block precedes the timeline in stream order.
            parse_events(&room_id, update.state.events, &mut events);
            parse_events(&room_id, update.timeline.events, &mut events);
        }
        Ok(SyncBatch {
            events,
            next_token: sync.next_batch,
        })
    }

    async fn poll_reports(
        &self,
        from: i64,
    ) -> Result<(Vec<AbuseReport>, Option<i64>), ClientError> {
        let url = format!(
            "{}/_synapse/admin/v1/event_reports?from={from}&dir=f",
            self.base_url
        );
        let resp = self.request(Method::GET, url, None).await?;
        let reports: Vec<AbuseReport> = resp
            .get("event_reports")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| ClientError::Transport(format!("malformed report response: {e}")))?
            .unwrap_or_default();
        let next = resp.get("next_token").and_then(Value::as_i64);
        Ok((reports, next))
    }
}
