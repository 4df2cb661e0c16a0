// src/core/reconcile/acl.rs

//! The room ACL reconciler. For every protected room, the
//! `m.room.server_acl` state event must deny exactly the server globs drawn
//! from the active server-ban rules, lexicographically ordered, with
//! `allow = ["*"]` and the daemon's own server never denied.

use crate::client::{ChatClient, ClientError};
use crate::core::actions::Action;
use crate::core::event::SERVER_ACL_EVENT;
use crate::core::matcher::Glob;
use crate::core::policy::PolicyManager;
use crate::core::protect::ProtectedRooms;
use crate::core::reporter::{ErrorAggregator, ErrorKind};
use crate::core::scheduler::{ActionError, ActionScheduler};
use crc::{CRC_32_ISO_HDLC, Crc};
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Servers cap state events at 64 KiB of canonical JSON. An ACL is a single
/// event and cannot be split, so exceeding this is fatal for the room.
pub const MAX_STATE_EVENT_BYTES: usize = 65_536;

const ACL_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub struct AclReconciler {
    client: Arc<dyn ChatClient>,
    scheduler: ActionScheduler,
    policies: Arc<PolicyManager>,
    protected: Arc<ProtectedRooms>,
    reporter: Arc<ErrorAggregator>,
    own_server: String,
}

impl AclReconciler {
    pub fn new(
        client: Arc<dyn ChatClient>,
        scheduler: ActionScheduler,
        policies: Arc<PolicyManager>,
        protected: Arc<ProtectedRooms>,
        reporter: Arc<ErrorAggregator>,
        own_server: &str,
    ) -> Self {
        Self {
            client,
            scheduler,
            policies,
            protected,
            reporter,
            own_server: own_server.to_lowercase(),
        }
    }

    /// The desired deny set: every active server-ban glob, minus any pattern
    /// that would match the daemon's own server, sorted lexicographically.
    pub fn desired_deny(&self) -> Vec<String> {
        self.policies
            .server_ban_patterns()
            .into_iter()
            .filter(|pattern| {
                if Glob::compile(pattern).matches(&self.own_server) {
                    warn!(
                        "Dropping deny pattern '{pattern}': it matches our own server {}",
                        self.own_server
                    );
                    false
                } else {
                    true
                }
            })
            .collect()
    }

    /// Reconciles every protected room against the current rules. Failures
    /// are recorded per room; the pass itself never fails.
    pub async fn reconcile_all(&self) {
        let deny = self.desired_deny();
        for room_id in self.protected.room_ids() {
            self.reconcile_room_with(&room_id, &deny).await;
        }
    }

    pub async fn reconcile_room(&self, room_id: &str) {
        let deny = self.desired_deny();
        self.reconcile_room_with(room_id, &deny).await;
    }

    async fn reconcile_room_with(&self, room_id: &str, deny: &[String]) {
        let content = json!({
            "allow": ["*"],
            "deny": deny,
        });

        // ACLs are a single state event; an oversized one cannot be applied
        // and partitioning the deny set is not an option.
        let serialized = content.to_string();
        if serialized.len() > MAX_STATE_EVENT_BYTES {
            self.reporter.record(
                room_id,
                ErrorKind::Fatal,
                format!(
                    "computed server ACL is {} bytes, over the {MAX_STATE_EVENT_BYTES} byte event limit",
                    serialized.len()
                ),
            );
            return;
        }

        // The room was reconciled to exactly this content before and no ACL
        // change has been observed since; skip the read round trip entirely.
        let checksum = ACL_CRC.checksum(serialized.as_bytes());
        if self.protected.acl_checksum(room_id) == Some(checksum) {
            debug!("Server ACL for {room_id} already reconciled; skipping.");
            return;
        }

        // Order-insensitive comparison against the room's current ACL.
        match self.fetch_current_acl(room_id).await {
            Ok(Some((current_deny, current_allow))) => {
                let desired_deny: BTreeSet<String> = deny.iter().cloned().collect();
                let desired_allow: BTreeSet<String> = BTreeSet::from(["*".to_string()]);
                if current_deny == desired_deny && current_allow == desired_allow {
                    debug!("Server ACL for {room_id} is already in sync.");
                    self.protected.set_acl_checksum(room_id, checksum);
                    return;
                }
            }
            Ok(None) => {
                // No ACL state yet; an empty desired set needs no event.
                if deny.is_empty() {
                    return;
                }
            }
            Err(e) => {
                // Reading failed; fall through and try the write anyway, the
                // send path will classify the failure.
                debug!("Could not read current ACL of {room_id}: {e}");
            }
        }

        let rx = self
            .scheduler
            .submit(Action::SetRoomState {
                room_id: room_id.to_string(),
                event_type: SERVER_ACL_EVENT.to_string(),
                state_key: String::new(),
                content,
            })
            .await;

        match rx.await {
            Ok(Ok(())) => {
                self.protected.set_acl_checksum(room_id, checksum);
                debug!("Applied server ACL to {room_id} ({} deny entries)", deny.len());
            }
            Ok(Err(e)) => self.record_send_failure(room_id, e),
            Err(_) => {} // worker dropped the slot: shutting down
        }
    }

    async fn fetch_current_acl(
        &self,
        room_id: &str,
    ) -> Result<Option<(BTreeSet<String>, BTreeSet<String>)>, ClientError> {
        match self
            .client
            .get_state_event(room_id, SERVER_ACL_EVENT, "")
            .await
        {
            Ok(content) => Ok(Some((
                string_set(content.get("deny")),
                string_set(content.get("allow")),
            ))),
            Err(ClientError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn record_send_failure(&self, room_id: &str, error: ActionError) {
        match error {
            ActionError::Cancelled => {}
            ActionError::Failed(ClientError::Forbidden)
            | ActionError::RetriesExhausted(ClientError::Forbidden) => {
                self.reporter.record(
                    room_id,
                    ErrorKind::Permission,
                    "not allowed to send m.room.server_acl".to_string(),
                );
            }
            other => {
                self.reporter.record(
                    room_id,
                    ErrorKind::Transient,
                    format!("could not apply server ACL: {other}"),
                );
            }
        }
    }
}

/// Lowercased set view of a JSON string array; tolerates missing fields.
fn string_set(value: Option<&Value>) -> BTreeSet<String> {
    value
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_lowercase)
                .collect()
        })
        .unwrap_or_default()
}
