// src/server/metrics_server.rs

use crate::core::metrics::{self, gather_metrics};
use crate::core::moderator::Moderator;
use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Handles HTTP requests to the /metrics endpoint.
///
/// It updates dynamic gauges before gathering all registered metrics
/// and encoding them in the Prometheus text format.
async fn metrics_handler(moderator: Arc<Moderator>) -> impl IntoResponse {
    // Update gauges that change with daemon state before gathering.
    metrics::PROTECTED_ROOMS.set(moderator.protected.len() as f64);
    metrics::ACTIVE_RULES.set(moderator.policies.rule_count() as f64);
    metrics::WATCHED_LISTS.set(moderator.policies.list_count() as f64);

    let body = gather_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}

/// Runs a simple HTTP server to expose Prometheus metrics on /metrics.
pub async fn run_metrics_server(
    moderator: Arc<Moderator>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let port = moderator.config.metrics.port;
    let app = Router::new().route("/metrics", get(move || metrics_handler(moderator.clone())));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(
        "Prometheus metrics server listening on http://{}/metrics",
        addr
    );

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind metrics server on port {}: {}", port, e);
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.recv().await.ok();
            info!("Metrics server shutting down.");
        })
        .await
    {
        error!("Metrics server error: {e}");
    }
}
