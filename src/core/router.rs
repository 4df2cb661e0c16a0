// src/core/router.rs

//! The event router: drains the single inbound `(room, event)` channel and
//! fans events out to the policy lists, the protected-room set, and the
//! management-room command channel. Inbound handling never fails; malformed
//! events are logged at warn level and dropped.

use crate::core::event::InboundEvent;
use crate::core::metrics;
use crate::core::policy::PolicyManager;
use crate::core::protect::ProtectedRooms;
use crate::core::reconcile::MemberBanReconciler;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace, warn};

pub struct EventRouter {
    policies: Arc<PolicyManager>,
    protected: Arc<ProtectedRooms>,
    members: Arc<MemberBanReconciler>,
    /// Forwarded to the out-of-scope command subsystem.
    command_tx: mpsc::Sender<InboundEvent>,
    management_room: String,
    rx: mpsc::Receiver<InboundEvent>,
}

impl EventRouter {
    pub fn new(
        policies: Arc<PolicyManager>,
        protected: Arc<ProtectedRooms>,
        members: Arc<MemberBanReconciler>,
        command_tx: mpsc::Sender<InboundEvent>,
        management_room: &str,
        rx: mpsc::Receiver<InboundEvent>,
    ) -> Self {
        Self {
            policies,
            protected,
            members,
            command_tx,
            management_room: management_room.to_string(),
            rx,
        }
    }

    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        debug!("Event router started.");
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("Event router shutting down.");
                    return;
                }
                maybe = self.rx.recv() => match maybe {
                    Some(inbound) => self.dispatch(inbound).await,
                    None => return,
                },
            }
        }
    }

    async fn dispatch(&self, inbound: InboundEvent) {
        metrics::EVENTS_ROUTED_TOTAL.inc();
        let InboundEvent { room_id, event } = inbound;
        trace!("Routing {} event in {room_id}", event.kind);

        if room_id == self.management_room {
            // The command subsystem owns management-room traffic.
            if let Err(e) = self.command_tx.try_send(InboundEvent {
                room_id: room_id.clone(),
                event,
            }) {
                warn!("Command channel is not keeping up; dropping event: {e}");
            }
            return;
        }

        if self.policies.is_watched(&room_id) {
            if event.is_state() {
                self.policies
                    .apply_room_events(&room_id, std::slice::from_ref(&event));
            }
            return;
        }

        if self.protected.is_protected(&room_id) {
            self.protected.handle_event(&room_id, &event);
            if let (Some(membership), Some(user_id)) =
                (event.membership(), event.state_key.as_deref())
            {
                self.members
                    .on_membership(&room_id, user_id, membership)
                    .await;
            }
        }
    }
}
