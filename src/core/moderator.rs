// src/core/moderator.rs

//! The central `Moderator` struct, holding all shared daemon-wide state and
//! the entry points the command and report subsystems call into.

use crate::client::ChatClient;
use crate::config::Config;
use crate::core::account::{self, ProtectedRoomsBlob, WatchedLists};
use crate::core::errors::PalisadeError;
use crate::core::event::InboundEvent;
use crate::core::metrics;
use crate::core::permissions::PermissionVerifier;
use crate::core::policy::PolicyManager;
use crate::core::protect::ProtectedRooms;
use crate::core::protections::Protections;
use crate::core::reconcile::{AclReconciler, MemberBanReconciler, ReconcileDriver};
use crate::core::redaction::{RedactionQueue, RedactionWorker};
use crate::core::reporter::ErrorAggregator;
use crate::core::scheduler::{ActionScheduler, SchedulerWorker};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// The capacity of the inbound event channel between the sync loop and the
/// event router.
pub const INBOUND_CHANNEL_CAPACITY: usize = 8192;

/// The capacity of the channel carrying management-room events to the
/// command subsystem.
const COMMAND_CHANNEL_CAPACITY: usize = 256;

/// Contains all initialized components required to spawn the daemon's
/// background tasks. This struct is created once during initialization and
/// then consumed by the spawner.
pub struct ModeratorInit {
    /// The scheduler's single cooperative worker.
    pub scheduler_worker: SchedulerWorker,
    /// The redaction queue's worker.
    pub redaction_worker: RedactionWorker,
    /// The driver that turns rule deltas into reconcile passes.
    pub reconcile_driver: ReconcileDriver,
    /// Feeds the event router; the sync loop holds the sender.
    pub inbound_tx: mpsc::Sender<InboundEvent>,
    pub inbound_rx: mpsc::Receiver<InboundEvent>,
    /// Management-room events, for the out-of-scope command subsystem.
    pub command_tx: mpsc::Sender<InboundEvent>,
    pub command_rx: mpsc::Receiver<InboundEvent>,
}

/// The central struct holding all shared, daemon-wide state. Wrapped in an
/// `Arc` and passed to every task, providing a single source of truth.
pub struct Moderator {
    pub config: Config,
    pub client: Arc<dyn ChatClient>,
    pub policies: Arc<PolicyManager>,
    pub protected: Arc<ProtectedRooms>,
    pub protections: Arc<Protections>,
    pub scheduler: ActionScheduler,
    pub redactions: RedactionQueue,
    pub reporter: Arc<ErrorAggregator>,
    pub acl: Arc<AclReconciler>,
    pub members: Arc<MemberBanReconciler>,
    pub permissions: Arc<PermissionVerifier>,
}

impl Moderator {
    /// Wires up every core component. Nothing runs until the spawner puts
    /// the workers from `ModeratorInit` on the event loop.
    pub fn new(config: Config, client: Arc<dyn ChatClient>) -> (Arc<Self>, ModeratorInit) {
        let policies = Arc::new(PolicyManager::new());
        let protected = Arc::new(ProtectedRooms::new());
        let protections = Arc::new(Protections::new(config.protections.clone()));
        let reporter = Arc::new(ErrorAggregator::new());

        let (scheduler, scheduler_worker) = ActionScheduler::new(
            Arc::clone(&client),
            Duration::from_millis(config.background_delay_ms),
        );
        let (redactions, redaction_worker) = RedactionQueue::new(
            Arc::clone(&client),
            scheduler.clone(),
            config.redaction.clone(),
        );

        let acl = Arc::new(AclReconciler::new(
            Arc::clone(&client),
            scheduler.clone(),
            Arc::clone(&policies),
            Arc::clone(&protected),
            Arc::clone(&reporter),
            &config.own_server,
        ));
        let members = Arc::new(MemberBanReconciler::new(
            scheduler.clone(),
            Arc::clone(&policies),
            Arc::clone(&protected),
            redactions.clone(),
            Arc::clone(&protections),
            Arc::clone(&reporter),
            config.redaction.max_redaction_check_members,
        ));
        let permissions = Arc::new(PermissionVerifier::new(
            Arc::clone(&client),
            Arc::clone(&protected),
            Arc::clone(&reporter),
            &config.user_id,
        ));

        let reconcile_driver = ReconcileDriver {
            acl: Arc::clone(&acl),
            members: Arc::clone(&members),
            policies: Arc::clone(&policies),
            reporter: Arc::clone(&reporter),
            scheduler: scheduler.clone(),
            management_room: config.management_room.clone(),
        };

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

        let moderator = Arc::new(Self {
            config,
            client,
            policies,
            protected,
            protections,
            scheduler,
            redactions,
            reporter,
            acl,
            members,
            permissions,
        });

        (
            moderator,
            ModeratorInit {
                scheduler_worker,
                redaction_worker,
                reconcile_driver,
                inbound_tx,
                inbound_rx,
                command_tx,
                command_rx,
            },
        )
    }

    // --- Command-subsystem entry points ---

    /// Protects a room: joins the set, fetches its members, reconciles it,
    /// and persists the explicit protect list. Idempotent.
    pub async fn add_protected_room(&self, room_id: &str) -> Result<(), PalisadeError> {
        if !self.protected.add(room_id) {
            return Ok(());
        }
        info!("Now protecting {room_id}");
        self.refresh_members(room_id).await;
        self.acl.reconcile_room(room_id).await;
        self.members.sweep_room(room_id).await;
        self.persist_protected_rooms().await
    }

    /// Stops protecting a room. Idempotent; existing bans are left in place.
    pub async fn remove_protected_room(&self, room_id: &str) -> Result<(), PalisadeError> {
        if !self.protected.remove(room_id) {
            return Ok(());
        }
        info!("No longer protecting {room_id}");
        self.persist_protected_rooms().await
    }

    pub fn is_protected(&self, room_id: &str) -> bool {
        self.protected.is_protected(room_id)
    }

    /// Joins and watches a policy room, then persists the watch list.
    pub async fn watch_list(&self, room_ref: &str) -> Result<String, PalisadeError> {
        let room_id = self.client.join_room(room_ref).await?;
        if self.policies.watch(&room_id) {
            self.ingest_list_state(&room_id).await?;
            metrics::WATCHED_LISTS.set(self.policies.list_count() as f64);
        }
        self.persist_watched_lists().await?;
        Ok(room_id)
    }

    /// Detaches a policy list and persists the watch list. The rules it
    /// contributed stop applying on the next reconcile pass.
    pub async fn unwatch_list(&self, room_id: &str) -> Result<(), PalisadeError> {
        if !self.policies.unwatch(room_id) {
            return Err(PalisadeError::NotWatched(room_id.to_string()));
        }
        metrics::WATCHED_LISTS.set(self.policies.list_count() as f64);
        self.persist_watched_lists().await
    }

    pub fn list_by_shortcode(&self, code: &str) -> Option<String> {
        self.policies.list_by_shortcode(code)
    }

    /// A human-readable dump of every materialized rule, grouped by list.
    pub fn dump_rules(&self) -> String {
        let rules = self.policies.all_rules();
        if rules.is_empty() {
            return "No rules are currently loaded.".to_string();
        }
        let mut out = format!("{} rules across {} lists:", rules.len(), self.policies.list_count());
        let mut current_list = None;
        for rule in rules {
            if current_list.as_deref() != Some(rule.room_id.as_str()) {
                let shortcode = self
                    .policies
                    .shortcode_of(&rule.room_id)
                    .map(|code| format!(" ({code})"))
                    .unwrap_or_default();
                let _ = write!(out, "\n{}{}:", rule.room_id, shortcode);
                current_list = Some(rule.room_id.clone());
            }
            let _ = write!(
                out,
                "\n  [{}] {}: {}",
                rule.kind, rule.pattern, rule.reason
            );
        }
        out
    }

    /// Runs a full reconcile pass immediately.
    pub async fn sync_now(&self) {
        self.acl.reconcile_all().await;
        self.members.sweep_all().await;
        if let Some(report) = self.reporter.drain() {
            self.scheduler
                .submit_and_forget(crate::core::actions::Action::Notice {
                    room_id: self.config.management_room.clone(),
                    body: report.render(),
                })
                .await;
        }
        metrics::ACTIVE_RULES.set(self.policies.rule_count() as f64);
    }

    /// Verifies power levels in every protected room; returns the number of
    /// rooms with deficits.
    pub async fn verify_permissions(&self) -> usize {
        self.permissions.verify_all().await
    }

    pub fn enable_protection(&self, name: &str) -> Result<(), PalisadeError> {
        self.protections.enable(name)
    }

    pub fn disable_protection(&self, name: &str) -> Result<(), PalisadeError> {
        self.protections.disable(name)
    }

    /// Queues a redaction job for a user's recent messages in one room.
    pub async fn redact_user_in_room(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> Result<(), PalisadeError> {
        if !self.protected.is_protected(room_id) {
            return Err(PalisadeError::NotProtected(room_id.to_string()));
        }
        self.redactions
            .enqueue_user_in_room(
                room_id,
                user_id,
                self.config.redaction.max_redaction_check_members,
            )
            .await;
        Ok(())
    }

    // --- Internal plumbing shared with startup ---

    /// Pulls a policy room's full state through the manager, materializing
    /// its rules. Used when a list is first watched and on startup.
    pub async fn ingest_list_state(&self, room_id: &str) -> Result<(), PalisadeError> {
        let state = self.client.get_room_state(room_id).await?;
        self.policies.apply_room_events(room_id, &state);
        metrics::ACTIVE_RULES.set(self.policies.rule_count() as f64);
        Ok(())
    }

    /// Replaces a protected room's member snapshot with a fresh fetch.
    pub async fn refresh_members(&self, room_id: &str) {
        match self.client.get_joined_members(room_id).await {
            Ok(members) => self.protected.set_members(room_id, members),
            Err(e) => warn!("Could not fetch members of {room_id}: {e}"),
        }
    }

    async fn persist_protected_rooms(&self) -> Result<(), PalisadeError> {
        let mut rooms = self.protected.room_ids();
        rooms.sort();
        account::store_protected_rooms(self.client.as_ref(), &ProtectedRoomsBlob { rooms }).await
    }

    async fn persist_watched_lists(&self) -> Result<(), PalisadeError> {
        let references = self.policies.watched_rooms();
        account::store_watched_lists(self.client.as_ref(), &WatchedLists { references }).await
    }
}
