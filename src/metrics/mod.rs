//! Metrics module
//!
//! Prometheus counters and histograms for sessions, relayed parts and
//! notification delivery. Exposed by [`server::MetricsEndpoint`].

pub mod server;

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_int_gauge, Counter,
    CounterVec, Histogram, IntGauge,
};

lazy_static! {
    // Session metrics
    pub static ref SESSIONS_TOTAL: CounterVec = register_counter_vec!(
        "sluice_sessions_total",
        "Total upload sessions by outcome",
        &["status"]
    ).unwrap();

    pub static ref SESSIONS_ACTIVE: IntGauge = register_int_gauge!(
        "sluice_sessions_active",
        "Upload sessions currently receiving or awaiting relays"
    ).unwrap();

    // Part metrics
    pub static ref PARTS_TOTAL: CounterVec = register_counter_vec!(
        "sluice_parts_total",
        "Total file parts by terminal status",
        &["status"]
    ).unwrap();

    pub static ref BYTES_STORED_TOTAL: Counter = register_counter!(
        "sluice_bytes_stored_total",
        "Total bytes written by successful relays"
    ).unwrap();

    pub static ref RELAY_DURATION: Histogram = register_histogram!(
        "sluice_relay_duration_seconds",
        "Duration of successful relays in seconds",
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 60.0]
    ).unwrap();

    // Notification metrics
    pub static ref NOTIFICATIONS_TOTAL: CounterVec = register_counter_vec!(
        "sluice_notifications_total",
        "Notification deliveries by outcome",
        &["outcome"]  // "sent", "failed" or "dropped"
    ).unwrap();
}

/// Record a part that reached `Succeeded`
pub fn record_part_success(bytes: u64, duration_secs: f64) {
    PARTS_TOTAL.with_label_values(&["succeeded"]).inc();
    BYTES_STORED_TOTAL.inc_by(bytes as f64);
    RELAY_DURATION.observe(duration_secs);
}

/// Record a failed part, labelled with the failure kind
pub fn record_part_failure(kind: &str) {
    PARTS_TOTAL.with_label_values(&[kind]).inc();
}

/// Record a finished session
pub fn record_session(success: bool) {
    let status = if success { "success" } else { "failure" };
    SESSIONS_TOTAL.with_label_values(&[status]).inc();
}

/// Track a session entering or leaving the active set
pub fn session_started() {
    SESSIONS_ACTIVE.inc();
}

pub fn session_finished() {
    SESSIONS_ACTIVE.dec();
}

/// Record a notification delivery outcome
pub fn record_notification(outcome: &str) {
    NOTIFICATIONS_TOTAL.with_label_values(&[outcome]).inc();
}
