// src/core/actions.rs

//! The tagged sum of server-side mutations. Every write the daemon performs
//! is expressed as an `Action` value and executed at a single dispatch point
//! on the scheduler's worker, never inline in a reconciler.

use crate::client::{ChatClient, ClientError};
use serde_json::Value;

#[derive(Debug, Clone)]
pub enum Action {
    Ban {
        room_id: String,
        user_id: String,
        reason: String,
    },
    Kick {
        room_id: String,
        user_id: String,
        reason: String,
    },
    Unban {
        room_id: String,
        user_id: String,
    },
    SetRoomState {
        room_id: String,
        event_type: String,
        state_key: String,
        content: Value,
    },
    Redact {
        room_id: String,
        event_id: String,
        reason: Option<String>,
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
}

impl Action {
    /// The room this action mutates.
    pub fn room_id(&self) -> &str {
        match self {
            Action::Ban { room_id, .. }
            | Action::Kick { room_id, .. }
            | Action::Unban { room_id, .. }
            | Action::SetRoomState { room_id, .. }
            | Action::Redact { room_id, .. }
            | Action::Notice { room_id, .. }
            | Action::React { room_id, .. } => room_id,
        }
    }

    /// A stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Ban { .. } => "ban",
            Action::Kick { .. } => "kick",
            Action::Unban { .. } => "unban",
            Action::SetRoomState { .. } => "set_state",
            Action::Redact { .. } => "redact",
            Action::Notice { .. } => "notice",
            Action::React { .. } => "react",
        }
    }

    /// Executes the action against the server. Handlers target state that is
    /// read-modify-write on the server side, so re-execution after a
    /// transient failure is safe.
    pub async fn execute(&self, client: &dyn ChatClient) -> Result<(), ClientError> {
        match self {
            Action::Ban {
                room_id,
                user_id,
                reason,
            } => client.ban(room_id, user_id, reason).await,
            Action::Kick {
                room_id,
                user_id,
                reason,
            } => client.kick(room_id, user_id, reason).await,
            Action::Unban { room_id, user_id } => client.unban(room_id, user_id).await,
            Action::SetRoomState {
                room_id,
                event_type,
                state_key,
                content,
            } => client
                .send_state(room_id, event_type, state_key, content.clone())
                .await
                .map(drop),
            Action::Redact {
                room_id,
                event_id,
                reason,
            } => client
                .redact(room_id, event_id, reason.as_deref())
                .await
                .map(drop),
            Action::Notice { room_id, body } => {
                client.send_notice(room_id, body).await.map(drop)
            }
            Action::React {
                room_id,
                event_id,
                key,
            } => client.react(room_id, event_id, key).await.map(drop),
        }
    }
}
