// src/server/mod.rs

use crate::config::Config;
use crate::core::actions::Action;
use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, reload};

mod context;
mod event_loop;
mod initialization;
mod metrics_server;
mod spawner;

pub use context::DaemonContext;

/// The main daemon startup function, orchestrating all setup phases.
pub async fn run(
    config: Config,
    log_reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
) -> Result<()> {
    // 1. Initialize core state, restore persisted lists and rooms.
    let mut ctx = initialization::setup(config, log_reload_handle).await?;

    // 2. Spawn all background tasks (scheduler, router, reconcilers, ...).
    spawner::spawn_all(&mut ctx).await?;

    // 3. Startup checks and the initial full sweep run before the daemon
    //    starts consuming the live event stream.
    startup_pass(&ctx).await;

    // 4. Start the main sync loop. This runs until shutdown.
    event_loop::run(ctx).await;

    Ok(())
}

async fn startup_pass(ctx: &DaemonContext) {
    let moderator = &ctx.moderator;

    if moderator.config.verify_permissions_on_startup {
        let deficits = moderator.verify_permissions().await;
        if deficits > 0 {
            info!("Permission verification found deficits in {deficits} rooms.");
        }
    }

    if moderator.config.sync_on_startup {
        moderator.sync_now().await;
        info!("Initial reconcile pass complete.");
    }

    moderator
        .scheduler
        .submit_and_forget(Action::Notice {
            room_id: moderator.config.management_room.clone(),
            body: format!(
                "Palisade is up. Watching {} lists, protecting {} rooms.",
                moderator.policies.list_count(),
                moderator.protected.len()
            ),
        })
        .await;
}
