// src/core/redaction.rs

//! The redaction queue: per-room batched removal of a user's recent
//! messages. Jobs are independent per room, but every redaction is still a
//! scheduler submission, so the global throttle holds across rooms.

use crate::client::ChatClient;
use crate::config::RedactionConfig;
use crate::core::actions::Action;
use crate::core::event::RoomEvent;
use crate::core::scheduler::ActionScheduler;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

const JOB_QUEUE_CAPACITY: usize = 256;

/// One unit of redaction work: scrub `user_id`'s recent messages in
/// `room_id`, scanning at most `limit` events.
#[derive(Debug, Clone)]
pub struct RedactionJob {
    pub room_id: String,
    pub user_id: String,
    pub limit: usize,
}

/// The submission handle for redaction jobs.
#[derive(Clone)]
pub struct RedactionQueue {
    tx: mpsc::Sender<RedactionJob>,
}

impl RedactionQueue {
    pub fn new(
        client: Arc<dyn ChatClient>,
        scheduler: ActionScheduler,
        config: RedactionConfig,
    ) -> (Self, RedactionWorker) {
        let (tx, rx) = mpsc::channel(JOB_QUEUE_CAPACITY);
        (
            Self { tx },
            RedactionWorker {
                client,
                scheduler,
                config,
                rx,
            },
        )
    }

    /// Enqueues a scan-and-redact job for one user in one room.
    pub async fn enqueue_user_in_room(&self, room_id: &str, user_id: &str, limit: usize) {
        let job = RedactionJob {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            limit,
        };
        if self.tx.send(job).await.is_err() {
            debug!("Dropping redaction job submitted after shutdown");
        }
    }
}

/// Processes redaction jobs one at a time: scan the room's recent history,
/// pick out the target user's messages, and dispatch redactions in bounded
/// batches with a linger between them.
pub struct RedactionWorker {
    client: Arc<dyn ChatClient>,
    scheduler: ActionScheduler,
    config: RedactionConfig,
    rx: mpsc::Receiver<RedactionJob>,
}

impl RedactionWorker {
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        debug!("Redaction queue started.");
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("Redaction queue shutting down.");
                    return;
                }
                maybe = self.rx.recv() => match maybe {
                    Some(job) => self.process_job(job).await,
                    None => return,
                },
            }
        }
    }

    async fn process_job(&self, job: RedactionJob) {
        let scan_limit = job.limit.min(self.config.max_redaction_check_members);
        let recent = match self.client.get_recent_messages(&job.room_id, scan_limit).await {
            Ok(events) => events,
            Err(e) => {
                warn!(
                    "Could not scan {} for messages from {}: {e}",
                    job.room_id, job.user_id
                );
                return;
            }
        };

        let targets: Vec<&RoomEvent> = recent
            .iter()
            .filter(|event| !event.is_state() && event.sender == job.user_id)
            .collect();
        if targets.is_empty() {
            return;
        }
        info!(
            "Redacting {} recent events from {} in {}",
            targets.len(),
            job.user_id,
            job.room_id
        );

        let linger = Duration::from_millis(self.config.redaction_batch_linger_millis);
        for (i, batch) in targets.chunks(self.config.max_redaction_events).enumerate() {
            if i > 0 {
                tokio::time::sleep(linger).await;
            }
            let mut results = Vec::with_capacity(batch.len());
            for event in batch {
                let rx = self
                    .scheduler
                    .submit(Action::Redact {
                        room_id: job.room_id.clone(),
                        event_id: event.event_id.clone(),
                        reason: None,
                    })
                    .await;
                results.push((event.event_id.clone(), rx));
            }
            for (event_id, rx) in results {
                match rx.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("Failed to redact {event_id} in {}: {e}", job.room_id),
                    Err(_) => return, // scheduler dropped the slot: shutting down
                }
            }
        }
    }
}
