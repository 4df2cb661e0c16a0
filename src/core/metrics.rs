// src/core/metrics.rs

//! Defines and registers Prometheus metrics for daemon monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only
//! once globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, TextEncoder, register_counter, register_counter_vec,
    register_gauge,
};

lazy_static! {
    // --- Gauges ---
    /// The number of rooms currently protected.
    pub static ref PROTECTED_ROOMS: Gauge =
        register_gauge!("palisade_protected_rooms", "Number of currently protected rooms.").unwrap();
    /// The number of ban rules currently materialized across all policy lists.
    pub static ref ACTIVE_RULES: Gauge =
        register_gauge!("palisade_active_rules", "Number of materialized policy rules.").unwrap();
    /// The number of watched policy rooms.
    pub static ref WATCHED_LISTS: Gauge =
        register_gauge!("palisade_watched_lists", "Number of watched policy rooms.").unwrap();

    // --- Counters ---
    /// The total number of inbound events dispatched by the router.
    pub static ref EVENTS_ROUTED_TOTAL: Counter =
        register_counter!("palisade_events_routed_total", "Total number of inbound events routed.").unwrap();
    /// The total number of scheduler actions executed successfully, by kind.
    pub static ref ACTIONS_EXECUTED_TOTAL: CounterVec =
        register_counter_vec!("palisade_actions_executed_total", "Total number of actions executed, labeled by kind.", &["kind"]).unwrap();
    /// The total number of scheduler actions that failed permanently, by kind.
    pub static ref ACTION_FAILURES_TOTAL: CounterVec =
        register_counter_vec!("palisade_action_failures_total", "Total number of actions that failed permanently, labeled by kind.", &["kind"]).unwrap();
    /// The total number of transient-failure retries across all actions.
    pub static ref ACTION_RETRIES_TOTAL: Counter =
        register_counter!("palisade_action_retries_total", "Total number of action retries after transient failures.").unwrap();
    /// The total number of abuse reports fetched from the server.
    pub static ref REPORTS_FETCHED_TOTAL: Counter =
        register_counter!("palisade_reports_fetched_total", "Total number of abuse reports fetched.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap_or_default()
}
