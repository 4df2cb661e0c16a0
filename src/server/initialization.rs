// src/server/initialization.rs

//! Handles the complete daemon initialization process: building the HTTP
//! client, restoring persisted state from the server, and materializing the
//! watched policy lists and protected rooms.

use super::context::DaemonContext;
use crate::client::HttpChatClient;
use crate::config::Config;
use crate::core::account;
use crate::core::metrics;
use crate::core::moderator::Moderator;
use anyhow::{Context as _, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, reload};

/// Initializes all daemon components before starting the event loop.
pub async fn setup(
    config: Config,
    log_reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
) -> Result<DaemonContext> {
    log_startup_info(&config);
    let (shutdown_tx, _) = broadcast::channel(1);

    let client =
        Arc::new(HttpChatClient::new(&config).context("Failed to build the homeserver client")?);
    let (moderator, init) = Moderator::new(config, client);
    info!("Core state initialized.");

    join_management_room(&moderator).await?;
    restore_watched_lists(&moderator).await?;
    restore_protected_rooms(&moderator).await?;

    metrics::WATCHED_LISTS.set(moderator.policies.list_count() as f64);
    info!(
        "Watching {} policy lists ({} rules), protecting {} rooms.",
        moderator.policies.list_count(),
        moderator.policies.rule_count(),
        moderator.protected.len()
    );

    Ok(DaemonContext {
        moderator,
        init,
        inbound_tx: None,
        shutdown_tx,
        background_tasks: JoinSet::new(),
        log_reload_handle,
    })
}

async fn join_management_room(moderator: &Moderator) -> Result<()> {
    moderator
        .client
        .join_room(&moderator.config.management_room)
        .await
        .with_context(|| {
            format!(
                "Failed to join the management room {}",
                moderator.config.management_room
            )
        })?;
    Ok(())
}

/// Joins and materializes every policy room named by the persisted
/// `watched_lists` blob. A list that cannot be joined is skipped with a
/// warning rather than failing startup.
async fn restore_watched_lists(moderator: &Moderator) -> Result<()> {
    let watched = account::load_watched_lists(moderator.client.as_ref())
        .await
        .context("Failed to load the watched_lists account data")?;

    for reference in &watched.references {
        let room_id = match moderator.client.join_room(reference).await {
            Ok(room_id) => room_id,
            Err(e) => {
                warn!("Could not join policy room {reference}: {e}");
                continue;
            }
        };
        if moderator.policies.watch(&room_id)
            && let Err(e) = moderator.ingest_list_state(&room_id).await
        {
            warn!("Could not materialize policy room {room_id}: {e}");
        }
    }
    Ok(())
}

/// Builds the protected-room set from the persisted blob, the configured
/// rooms, and (optionally) every joined room.
async fn restore_protected_rooms(moderator: &Moderator) -> Result<()> {
    let blob = account::load_protected_rooms(moderator.client.as_ref())
        .await
        .context("Failed to load the protected_rooms account data")?;

    let mut rooms: BTreeSet<String> = blob.rooms.into_iter().collect();
    rooms.extend(moderator.config.protected_rooms.iter().cloned());

    if moderator.config.protect_all_joined_rooms {
        match moderator.client.joined_rooms().await {
            Ok(joined) => rooms.extend(joined),
            Err(e) => warn!("Could not enumerate joined rooms: {e}"),
        }
    }

    // Policy rooms and the management room are never protected implicitly.
    rooms.remove(&moderator.config.management_room);
    for watched in moderator.policies.watched_rooms() {
        rooms.remove(&watched);
    }

    for room_id in rooms {
        if moderator.protected.add(&room_id) {
            moderator.refresh_members(&room_id).await;
        }
    }
    Ok(())
}

/// Logs key configuration parameters at startup.
fn log_startup_info(config: &Config) {
    info!(
        "Acting as {} on {}; management room {}.",
        config.user_id, config.homeserver_url, config.management_room
    );
    if config.protect_all_joined_rooms {
        info!("protect_all_joined_rooms is enabled; all joined rooms will be protected.");
    }
}
