// src/core/commands.rs

//! The built-in management-room listener. It services the handful of
//! commands the core owns (`sync`, `verify`, `rules`) through the
//! `Moderator` entry points and acknowledges each outcome with a ✅/❌
//! reaction; everything else on the channel is left to the richer command
//! frontend.

use crate::core::actions::Action;
use crate::core::event::{InboundEvent, MESSAGE_EVENT};
use crate::core::moderator::Moderator;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

/// The first word of a message that addresses the daemon.
pub const COMMAND_PREFIX: &str = "!palisade";

const ACK_OK: &str = "✅";
const ACK_FAILED: &str = "❌";

/// The outcome of a serviced command: an optional reply body, or a failure
/// description. Either way the command event gets its reaction.
type Outcome = Result<Option<String>, String>;

pub struct CommandListener {
    moderator: Arc<Moderator>,
    rx: mpsc::Receiver<InboundEvent>,
}

impl CommandListener {
    pub fn new(moderator: Arc<Moderator>, rx: mpsc::Receiver<InboundEvent>) -> Self {
        Self { moderator, rx }
    }

    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        debug!("Management-room command listener started.");
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("Command listener shutting down.");
                    return;
                }
                maybe = self.rx.recv() => match maybe {
                    Some(inbound) => self.handle(inbound).await,
                    None => return,
                },
            }
        }
    }

    async fn handle(&self, inbound: InboundEvent) {
        let event = inbound.event;
        if event.kind != MESSAGE_EVENT || event.sender == self.moderator.config.user_id {
            return;
        }
        let Some(body) = event.content.get("body").and_then(Value::as_str) else {
            return;
        };
        let mut words = body.split_whitespace();
        if words.next() != Some(COMMAND_PREFIX) {
            return;
        }

        let outcome: Outcome = match words.next() {
            Some("sync") => {
                self.moderator.sync_now().await;
                Ok(None)
            }
            Some("verify") => {
                let deficits = self.moderator.verify_permissions().await;
                if deficits == 0 {
                    Ok(None)
                } else {
                    Err(format!("{deficits} rooms failed the permission check"))
                }
            }
            Some("rules") => Ok(Some(self.moderator.dump_rules())),
            other => {
                // Unknown words belong to the command frontend, not the core.
                debug!("Leaving command {:?} to the command subsystem", other);
                return;
            }
        };
        info!("Serviced management command '{body}'");

        let scheduler = &self.moderator.scheduler;
        let management_room = inbound.room_id;
        let (key, reply) = match outcome {
            Ok(reply) => (ACK_OK, reply),
            Err(failure) => (ACK_FAILED, Some(failure)),
        };
        if let Some(body) = reply {
            scheduler
                .submit_and_forget(Action::Notice {
                    room_id: management_room.clone(),
                    body,
                })
                .await;
        }
        if !event.event_id.is_empty() {
            scheduler
                .submit_and_forget(Action::React {
                    room_id: management_room,
                    event_id: event.event_id,
                    key: key.to_string(),
                })
                .await;
        }
    }
}
