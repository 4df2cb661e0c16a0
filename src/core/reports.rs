// src/core/reports.rs

//! The abuse-report poller: a periodic task fetching new reports from the
//! server and surfacing them in the management room. The pagination cursor
//! is persisted as account data so restarts resume where they left off.
//! The timer is one-shot and re-armed on completion, so a slow server never
//! causes overlapping polls.

use crate::client::ChatClient;
use crate::core::account::{self, ReportCursor};
use crate::core::actions::Action;
use crate::core::event::AbuseReport;
use crate::core::metrics;
use crate::core::scheduler::ActionScheduler;
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

pub struct ReportPoller {
    client: Arc<dyn ChatClient>,
    scheduler: ActionScheduler,
    management_room: String,
    interval: Duration,
}

impl ReportPoller {
    pub fn new(
        client: Arc<dyn ChatClient>,
        scheduler: ActionScheduler,
        management_room: &str,
        interval: Duration,
    ) -> Self {
        Self {
            client,
            scheduler,
            management_room: management_room.to_string(),
            interval,
        }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut cursor = match account::load_report_cursor(self.client.as_ref()).await {
            Ok(cursor) => cursor,
            Err(e) => {
                warn!("Could not load the report cursor, starting from 0: {e}");
                ReportCursor::default()
            }
        };
        debug!("Report poller started at offset {}.", cursor.from);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("Report poller shutting down.");
                    return;
                }
                _ = tokio::time::sleep(self.interval) => {
                    self.poll_once(&mut cursor).await;
                }
            }
        }
    }

    async fn poll_once(&self, cursor: &mut ReportCursor) {
        let (reports, next) = match self.client.poll_reports(cursor.from).await {
            Ok(page) => page,
            Err(e) => {
                warn!("Report poll failed: {e}");
                return;
            }
        };
        if reports.is_empty() {
            return;
        }
        metrics::REPORTS_FETCHED_TOTAL.inc_by(reports.len() as f64);

        for report in &reports {
            self.scheduler
                .submit_and_forget(Action::Notice {
                    room_id: self.management_room.clone(),
                    body: render_report(report),
                })
                .await;
        }

        // Advance past everything we have seen; the admin API's next_token
        // is authoritative when present.
        cursor.from = next.unwrap_or(cursor.from + reports.len() as i64);
        if let Err(e) = account::store_report_cursor(self.client.as_ref(), *cursor).await {
            warn!("Could not persist the report cursor: {e}");
        }
    }
}

fn render_report(report: &AbuseReport) -> String {
    let when = Utc
        .timestamp_millis_opt(report.received_ts)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "unknown time".to_string());
    format!(
        "🚩 Report {} in {} ({when}): {} reported {}: {}",
        report.id,
        report.room_id,
        report.user_id,
        report.event_id.as_deref().unwrap_or("<room>"),
        report.reason.as_deref().unwrap_or("no reason given"),
    )
}
