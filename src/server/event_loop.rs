// src/server/event_loop.rs

//! Contains the main sync loop feeding the event router, and graceful
//! shutdown handling.

use super::context::DaemonContext;
use std::time::Duration;
use tracing::{error, info, warn};

// Platform-specific signal handling imports
#[cfg(windows)]
use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// How long a failed sync round backs off before the next attempt.
const SYNC_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// The deadline for background tasks to drain after shutdown is signalled.
const SHUTDOWN_DRAIN_DEADLINE: Duration = Duration::from_secs(10);

/// Waits for a shutdown signal based on the operating system.
/// On Unix, it listens for SIGINT and SIGTERM.
/// On Windows, it listens for Ctrl+C.
async fn await_shutdown_signal() {
    #[cfg(unix)]
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to create SIGINT stream");
    #[cfg(unix)]
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to create SIGTERM stream");

    #[cfg(windows)]
    let mut ctrl_c = signal::ctrl_c().expect("Failed to create Ctrl+C stream");

    tokio::select! {
        _ = async { #[cfg(unix)] { sigint.recv().await; info!("SIGINT received, initiating graceful shutdown."); } } => {},
        _ = async { #[cfg(unix)] { sigterm.recv().await; info!("SIGTERM received, initiating graceful shutdown."); } } => {},
        _ = async { #[cfg(windows)] { ctrl_c.await; info!("Ctrl-C received, initiating graceful shutdown."); } } => {},
    }
}

/// The main loop: long-polls the server for events, forwards them to the
/// router, and handles graceful shutdown.
pub async fn run(mut ctx: DaemonContext) {
    let inbound_tx = ctx
        .inbound_tx
        .take()
        .expect("spawner must run before the event loop");
    let client = ctx.moderator.client.clone();
    let mut since: Option<String> = None;

    loop {
        tokio::select! {
            biased; // Prioritize shutdown signals over sync rounds.

            _ = await_shutdown_signal() => {
                break;
            },

            // Monitor background tasks for unexpected termination.
            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => info!("A background task has completed."),
                    Ok(Err(e)) => { error!("CRITICAL: Background task failed: {}. Shutting down.", e); break; }
                    Err(e) => { error!("CRITICAL: Background task panicked: {e:?}. Shutting down."); break; }
                }
            },

            batch = client.sync_once(since.as_deref()) => {
                match batch {
                    Ok(batch) => {
                        since = Some(batch.next_token);
                        for inbound in batch.events {
                            // Backpressure: the router drains this channel on
                            // the event loop; a full channel slows the sync.
                            if inbound_tx.send(inbound).await.is_err() {
                                warn!("Event router is gone; stopping the sync loop.");
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Sync round failed: {e}; retrying in {SYNC_ERROR_BACKOFF:?}.");
                        tokio::time::sleep(SYNC_ERROR_BACKOFF).await;
                    }
                }
            },
        }
    }

    shutdown(ctx).await;
}

/// Signals every background task, then awaits the drain with a deadline.
/// The scheduler resolves still-pending submissions as cancelled.
async fn shutdown(mut ctx: DaemonContext) {
    info!("Shutting down; draining background tasks.");
    let _ = ctx.shutdown_tx.send(());

    let drain = async {
        while let Some(res) = ctx.background_tasks.join_next().await {
            if let Err(e) = res {
                warn!("Background task ended abnormally during shutdown: {e:?}");
            }
        }
    };
    if tokio::time::timeout(SHUTDOWN_DRAIN_DEADLINE, drain).await.is_err() {
        warn!(
            "Background tasks did not drain within {SHUTDOWN_DRAIN_DEADLINE:?}; aborting the rest."
        );
        ctx.background_tasks.abort_all();
    }
    info!("Shutdown complete.");
}
