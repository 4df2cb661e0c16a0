// src/server/spawner.rs

//! Spawns all of the daemon's long-running background tasks.

use super::context::DaemonContext;
use super::metrics_server;
use crate::core::commands::CommandListener;
use crate::core::moderator::ModeratorInit;
use crate::core::reports::ReportPoller;
use crate::core::router::EventRouter;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

/// Spawns all critical background tasks into the context's JoinSet.
pub async fn spawn_all(ctx: &mut DaemonContext) -> Result<()> {
    let moderator = &ctx.moderator;
    let shutdown_tx = &ctx.shutdown_tx;
    let background_tasks = &mut ctx.background_tasks;

    // The init struct is consumed here; leave a husk with fresh (unused)
    // channels behind so the context stays intact.
    let (inbound_tx, inbound_rx) = mpsc::channel(1);
    let (command_tx, command_rx) = mpsc::channel(1);
    let init = std::mem::replace(
        &mut ctx.init,
        ModeratorInit {
            scheduler_worker: crate::core::scheduler::ActionScheduler::new(
                Arc::clone(&moderator.client),
                Duration::from_millis(moderator.config.background_delay_ms),
            )
            .1,
            redaction_worker: crate::core::redaction::RedactionQueue::new(
                Arc::clone(&moderator.client),
                moderator.scheduler.clone(),
                moderator.config.redaction.clone(),
            )
            .1,
            reconcile_driver: crate::core::reconcile::ReconcileDriver {
                acl: Arc::clone(&moderator.acl),
                members: Arc::clone(&moderator.members),
                policies: Arc::clone(&moderator.policies),
                reporter: Arc::clone(&moderator.reporter),
                scheduler: moderator.scheduler.clone(),
                management_room: moderator.config.management_room.clone(),
            },
            inbound_tx,
            inbound_rx,
            command_tx,
            command_rx,
        },
    );

    // --- Metrics server ---
    if moderator.config.metrics.enabled {
        let metrics_moderator = Arc::clone(moderator);
        let shutdown_rx_metrics = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            metrics_server::run_metrics_server(metrics_moderator, shutdown_rx_metrics).await;
            Ok(())
        });
    } else {
        info!("Prometheus metrics server is disabled in the configuration.");
    }

    // --- Action scheduler ---
    let shutdown_rx_sched = shutdown_tx.subscribe();
    let scheduler_worker = init.scheduler_worker;
    background_tasks.spawn(async move {
        scheduler_worker.run(shutdown_rx_sched).await;
        Ok(())
    });

    // --- Redaction queue ---
    let shutdown_rx_redact = shutdown_tx.subscribe();
    let redaction_worker = init.redaction_worker;
    background_tasks.spawn(async move {
        redaction_worker.run(shutdown_rx_redact).await;
        Ok(())
    });

    // --- Reconcile driver ---
    let shutdown_rx_driver = shutdown_tx.subscribe();
    let reconcile_driver = init.reconcile_driver;
    background_tasks.spawn(async move {
        reconcile_driver.run(shutdown_rx_driver).await;
        Ok(())
    });

    // --- Event router ---
    let router = EventRouter::new(
        Arc::clone(&moderator.policies),
        Arc::clone(&moderator.protected),
        Arc::clone(&moderator.members),
        init.command_tx,
        &moderator.config.management_room,
        init.inbound_rx,
    );
    let shutdown_rx_router = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        router.run(shutdown_rx_router).await;
        Ok(())
    });

    // --- Management-room command listener ---
    let listener = CommandListener::new(Arc::clone(moderator), init.command_rx);
    let shutdown_rx_commands = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        listener.run(shutdown_rx_commands).await;
        Ok(())
    });

    // --- Abuse-report poller ---
    let poller = ReportPoller::new(
        Arc::clone(&moderator.client),
        moderator.scheduler.clone(),
        &moderator.config.management_room,
        Duration::from_secs(moderator.config.report_poll_interval_secs),
    );
    let shutdown_rx_reports = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        poller.run(shutdown_rx_reports).await;
        Ok(())
    });

    ctx.inbound_tx = Some(init.inbound_tx);
    Ok(())
}
