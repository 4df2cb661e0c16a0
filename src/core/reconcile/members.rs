// src/core/reconcile/members.rs

//! The member-ban reconciler. Evaluates protected-room members against the
//! active user-ban rules, on individual membership events and on full
//! sweeps. Bans are enqueued before any follow-up redaction of the same
//! user, and the daemon never unbans automatically.

use crate::client::ClientError;
use crate::core::actions::Action;
use crate::core::policy::{PolicyManager, PolicyRule};
use crate::core::protect::ProtectedRooms;
use crate::core::protections::{Protections, REDACT_ON_BAN};
use crate::core::redaction::RedactionQueue;
use crate::core::reporter::{ErrorAggregator, ErrorKind};
use crate::core::scheduler::{ActionError, ActionScheduler};
use std::sync::Arc;
use tracing::{debug, info};

pub struct MemberBanReconciler {
    scheduler: ActionScheduler,
    policies: Arc<PolicyManager>,
    protected: Arc<ProtectedRooms>,
    redactions: RedactionQueue,
    protections: Arc<Protections>,
    reporter: Arc<ErrorAggregator>,
    /// How many recent events to scan when redacting a banned user.
    redaction_limit: usize,
}

impl MemberBanReconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scheduler: ActionScheduler,
        policies: Arc<PolicyManager>,
        protected: Arc<ProtectedRooms>,
        redactions: RedactionQueue,
        protections: Arc<Protections>,
        reporter: Arc<ErrorAggregator>,
        redaction_limit: usize,
    ) -> Self {
        Self {
            scheduler,
            policies,
            protected,
            redactions,
            protections,
            reporter,
            redaction_limit,
        }
    }

    /// Sweeps every protected room's member snapshot once. Run on startup
    /// and whenever a change delta touches user rules.
    pub async fn sweep_all(&self) {
        for room_id in self.protected.room_ids() {
            self.sweep_room(&room_id).await;
        }
    }

    pub async fn sweep_room(&self, room_id: &str) {
        let Some(members) = self.protected.members_snapshot(room_id) else {
            return;
        };
        let rules = self.policies.user_ban_rules();
        if rules.is_empty() {
            return;
        }
        let mut banned = 0usize;
        for user_id in members.keys() {
            if self.check_member_with(room_id, user_id, &rules).await {
                banned += 1;
            }
        }
        if banned > 0 {
            info!("Membership sweep of {room_id} banned {banned} members.");
        }
    }

    /// Evaluates one member after a membership event. Only joined or invited
    /// members are ban targets, which is exactly the set the snapshot holds.
    pub async fn on_membership(&self, room_id: &str, user_id: &str, membership: &str) {
        if !matches!(membership, "join" | "invite") {
            return;
        }
        let rules = self.policies.user_ban_rules();
        if rules.is_empty() {
            return;
        }
        self.check_member_with(room_id, user_id, &rules).await;
    }

    /// Returns true when a ban was enqueued for this member. Ties between
    /// matching rules break by policy-list insertion order: the first match
    /// supplies the reason.
    async fn check_member_with(
        &self,
        room_id: &str,
        user_id: &str,
        rules: &[Arc<PolicyRule>],
    ) -> bool {
        let matching: Vec<&Arc<PolicyRule>> =
            rules.iter().filter(|rule| rule.matches(user_id)).collect();
        let Some(first) = matching.first() else {
            return false;
        };

        debug!(
            "Banning {user_id} in {room_id}: matched '{}' ({})",
            first.pattern, first.reason
        );
        let rx = self
            .scheduler
            .submit(Action::Ban {
                room_id: room_id.to_string(),
                user_id: user_id.to_string(),
                reason: first.reason.clone(),
            })
            .await;

        match rx.await {
            Ok(Ok(())) => {
                if self.protections.is_enabled(REDACT_ON_BAN) {
                    // The ban has already landed; redactions follow it.
                    self.redactions
                        .enqueue_user_in_room(room_id, user_id, self.redaction_limit)
                        .await;
                }
                true
            }
            Ok(Err(e)) => {
                self.record_ban_failure(room_id, user_id, &matching, e);
                false
            }
            Err(_) => false, // shutting down
        }
    }

    /// A failed ban is reported with every rule that wanted the member gone.
    fn record_ban_failure(
        &self,
        room_id: &str,
        user_id: &str,
        matching: &[&Arc<PolicyRule>],
        error: ActionError,
    ) {
        let patterns: Vec<&str> = matching.iter().map(|r| r.pattern.as_str()).collect();
        let (kind, detail) = match &error {
            ActionError::Cancelled => return,
            ActionError::Failed(ClientError::Forbidden)
            | ActionError::RetriesExhausted(ClientError::Forbidden) => {
                (ErrorKind::Permission, "not allowed to ban".to_string())
            }
            other => (ErrorKind::Transient, other.to_string()),
        };
        self.reporter.record(
            room_id,
            kind,
            format!(
                "failed to ban {user_id} (rules: {}): {detail}",
                patterns.join(", ")
            ),
        );
    }
}
