// src/core/scheduler.rs

//! The rate-limited action scheduler: a bounded FIFO of server mutations
//! executed by one cooperative worker, with a minimum inter-task delay to
//! respect server rate limits, exponential-backoff retries for transient
//! failures, and a drain-with-cancelled shutdown path.

use crate::client::{ChatClient, ClientError};
use crate::core::actions::Action;
use crate::core::metrics;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Submissions beyond this bound apply backpressure to the submitter.
const QUEUE_CAPACITY: usize = 4096;

/// A task is retried this many times on transient failure before the error
/// surfaces to the submitter.
const MAX_RETRIES: u32 = 5;

/// The outcome delivered through a submission's result slot.
pub type ActionResult = Result<(), ActionError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// The scheduler shut down before the task ran.
    #[error("cancelled by shutdown")]
    Cancelled,

    /// A transient failure persisted through every retry.
    #[error("retries exhausted: {0}")]
    RetriesExhausted(ClientError),

    /// A permanent failure; the scheduler does not retry these.
    #[error(transparent)]
    Failed(ClientError),
}

struct Submission {
    action: Action,
    done: Option<oneshot::Sender<ActionResult>>,
}

struct QueuedTask {
    action: Action,
    done: Option<oneshot::Sender<ActionResult>>,
    attempts: u32,
    not_before: Instant,
}

impl QueuedTask {
    fn resolve(mut self, result: ActionResult) {
        if let Some(done) = self.done.take() {
            // The submitter may have stopped caring; that is fine.
            let _ = done.send(result);
        }
    }
}

/// The submission handle. Cloneable; all clones feed the same worker.
#[derive(Clone)]
pub struct ActionScheduler {
    tx: mpsc::Sender<Submission>,
}

impl ActionScheduler {
    /// Creates the scheduler handle and its worker. The worker must be
    /// spawned with [`SchedulerWorker::run`] before submissions complete.
    pub fn new(client: Arc<dyn ChatClient>, min_delay: Duration) -> (Self, SchedulerWorker) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        (
            Self { tx },
            SchedulerWorker {
                client,
                rx,
                min_delay,
                pending: VecDeque::new(),
            },
        )
    }

    /// Submits an action and returns its result slot. Awaits queue capacity
    /// when the FIFO is full (backpressure).
    pub async fn submit(&self, action: Action) -> oneshot::Receiver<ActionResult> {
        let (done_tx, done_rx) = oneshot::channel();
        let submission = Submission {
            action,
            done: Some(done_tx),
        };
        if let Err(e) = self.tx.send(submission).await {
            // Worker is gone (shutdown); resolve the slot as cancelled.
            e.0.resolve_cancelled();
        }
        done_rx
    }

    /// Submits an action whose outcome nobody waits on. Errors are still
    /// logged by the worker.
    pub async fn submit_and_forget(&self, action: Action) {
        let submission = Submission { action, done: None };
        if self.tx.send(submission).await.is_err() {
            debug!("Dropping action submitted after scheduler shutdown");
        }
    }
}

impl Submission {
    fn resolve_cancelled(mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(Err(ActionError::Cancelled));
        }
    }
}

/// The single cooperative worker owning the task queue. Tasks execute in
/// FIFO submission order; between the completion of one task and the start
/// of the next the worker waits at least `min_delay`.
pub struct SchedulerWorker {
    client: Arc<dyn ChatClient>,
    rx: mpsc::Receiver<Submission>,
    min_delay: Duration,
    pending: VecDeque<QueuedTask>,
}

impl SchedulerWorker {
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        debug!(
            "Action scheduler started (throttle {} ms)",
            self.min_delay.as_millis()
        );
        // The earliest instant the next task may start; enforces the
        // inter-task delay across retries and fresh submissions alike.
        let mut next_start = Instant::now();

        loop {
            // Pull every submission that is already waiting so queue order
            // matches arrival order before we pick the next task.
            while let Ok(submission) = self.rx.try_recv() {
                self.pending.push_back(Self::queued(submission));
            }

            if self.pending.is_empty() {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    maybe = self.rx.recv() => match maybe {
                        Some(submission) => self.pending.push_back(Self::queued(submission)),
                        None => break,
                    },
                }
            }
            let Some(task) = self.pending.pop_front() else {
                continue;
            };

            // Honor both the global throttle and the task's own backoff.
            let start_at = next_start.max(task.not_before);
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    self.pending.push_front(task);
                    break;
                }
                _ = tokio::time::sleep_until(start_at) => {}
            }

            // In-flight tasks complete even if shutdown arrives meanwhile.
            self.execute(task, &mut next_start).await;
        }

        self.drain();
    }

    fn queued(submission: Submission) -> QueuedTask {
        QueuedTask {
            action: submission.action,
            done: submission.done,
            attempts: 0,
            not_before: Instant::now(),
        }
    }

    async fn execute(&mut self, mut task: QueuedTask, next_start: &mut Instant) {
        let kind = task.action.kind();
        let result = task.action.execute(self.client.as_ref()).await;
        *next_start = Instant::now() + self.min_delay;

        match result {
            Ok(()) => {
                metrics::ACTIONS_EXECUTED_TOTAL.with_label_values(&[kind]).inc();
                task.resolve(Ok(()));
            }
            Err(e) if e.is_transient() => {
                task.attempts += 1;
                if task.attempts > MAX_RETRIES {
                    warn!(
                        "Action {kind} on {} failed after {MAX_RETRIES} retries: {e}",
                        task.action.room_id()
                    );
                    metrics::ACTION_FAILURES_TOTAL.with_label_values(&[kind]).inc();
                    task.resolve(Err(ActionError::RetriesExhausted(e)));
                    return;
                }
                let backoff = Self::backoff(task.attempts, &e);
                debug!(
                    "Action {kind} on {} hit a transient failure ({e}); retry {} in {:?}",
                    task.action.room_id(),
                    task.attempts,
                    backoff
                );
                metrics::ACTION_RETRIES_TOTAL.inc();
                task.not_before = Instant::now() + backoff;
                self.pending.push_back(task);
            }
            Err(e) => {
                warn!("Action {kind} on {} failed: {e}", task.action.room_id());
                metrics::ACTION_FAILURES_TOTAL.with_label_values(&[kind]).inc();
                task.resolve(Err(ActionError::Failed(e)));
            }
        }
    }

    /// Exponential backoff (2^n seconds) with a little jitter; a server-sent
    /// retry-after takes precedence when it is longer.
    fn backoff(attempt: u32, error: &ClientError) -> Duration {
        let base = Duration::from_secs(1 << attempt.min(6));
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
        let backoff = base + jitter;
        if let ClientError::RateLimited { retry_after_ms } = error {
            backoff.max(Duration::from_millis(*retry_after_ms))
        } else {
            backoff
        }
    }

    /// Resolves every pending task with a cancelled result. Called once the
    /// worker leaves its loop.
    fn drain(&mut self) {
        self.rx.close();
        let mut cancelled = 0usize;
        while let Some(task) = self.pending.pop_front() {
            task.resolve(Err(ActionError::Cancelled));
            cancelled += 1;
        }
        while let Ok(submission) = self.rx.try_recv() {
            submission.resolve_cancelled();
            cancelled += 1;
        }
        if cancelled > 0 {
            info!("Action scheduler drained {cancelled} pending tasks on shutdown.");
        } else {
            debug!("Action scheduler stopped with an empty queue.");
        }
    }
}
