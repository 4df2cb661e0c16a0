// src/server/context.rs

//! The assembled daemon: shared state, worker channels, and shutdown plumbing,
//! handed from initialization to the spawner and then to the event loop.

use crate::core::event::InboundEvent;
use crate::core::moderator::{Moderator, ModeratorInit};
use anyhow::Error;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing_subscriber::{filter::EnvFilter, reload};

pub struct DaemonContext {
    pub moderator: Arc<Moderator>,
    /// Worker halves, consumed by the spawner.
    pub init: ModeratorInit,
    /// The sync loop's half of the inbound channel; set by the spawner.
    pub inbound_tx: Option<mpsc::Sender<InboundEvent>>,
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<Result<(), Error>>,
    /// Lets the (out-of-scope) command subsystem change the log level at
    /// runtime.
    pub log_reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
}
