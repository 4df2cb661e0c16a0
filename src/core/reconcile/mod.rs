// src/core/reconcile/mod.rs

//! The protected-rooms reconcilers and the driver task that runs them
//! whenever the policy manager publishes a change delta.

pub mod acl;
pub mod members;

pub use acl::AclReconciler;
pub use members::MemberBanReconciler;

use crate::core::actions::Action;
use crate::core::policy::{EntityKind, PolicyManager};
use crate::core::reporter::ErrorAggregator;
use crate::core::scheduler::ActionScheduler;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Subscribes to the policy manager's delta bus and turns deltas into
/// reconcile passes: server-rule changes drive the ACL reconciler, user-rule
/// changes drive the member reconciler. Each pass ends by flushing the error
/// aggregator into the management room.
pub struct ReconcileDriver {
    pub acl: Arc<AclReconciler>,
    pub members: Arc<MemberBanReconciler>,
    pub policies: Arc<PolicyManager>,
    pub reporter: Arc<ErrorAggregator>,
    pub scheduler: ActionScheduler,
    pub management_room: String,
}

impl ReconcileDriver {
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut deltas = self.policies.subscribe();
        debug!("Reconcile driver started.");
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("Reconcile driver shutting down.");
                    return;
                }
                delta = deltas.recv() => match delta {
                    Ok(delta) => {
                        if delta.touches(EntityKind::Server) {
                            self.acl.reconcile_all().await;
                        }
                        if delta.touches(EntityKind::User) {
                            self.members.sweep_all().await;
                        }
                        self.flush_report().await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Missed deltas are indistinguishable from arbitrary
                        // rule churn; run both passes.
                        warn!("Reconcile driver lagged {skipped} deltas; full sweep.");
                        self.acl.reconcile_all().await;
                        self.members.sweep_all().await;
                        self.flush_report().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                },
            }
        }
    }

    /// Runs both reconcilers unconditionally, then flushes. Used by startup
    /// and the `sync_now` command.
    pub async fn full_pass(&self) {
        self.acl.reconcile_all().await;
        self.members.sweep_all().await;
        self.flush_report().await;
    }

    async fn flush_report(&self) {
        if let Some(report) = self.reporter.drain() {
            self.scheduler
                .submit_and_forget(Action::Notice {
                    room_id: self.management_room.clone(),
                    body: report.render(),
                })
                .await;
        }
    }
}
