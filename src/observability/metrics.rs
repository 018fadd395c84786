//! Metrics collection and exposition.
//!
//! # Metrics
//! - `relay_sessions_total` (counter): finished sessions by upstream, outcome
//! - `relay_session_duration_seconds` (histogram): session lifetime
//! - `relay_upstream_errors_total` (counter): connect/auth/transmit failures
//! - `relay_dedup_suppressed_total` (counter): suppressed duplicate requests
//! - `relay_dedup_entries` (gauge): live fingerprints
//! - `relay_admission_available` (gauge): free admission permits
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed (tests stay silent)
//! - Prometheus exporter runs on its own listener

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and start its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a finished relay session.
pub fn record_session(upstream: &str, outcome: &'static str, elapsed: Duration) {
    let labels = [
        ("upstream", upstream.to_string()),
        ("outcome", outcome.to_string()),
    ];
    metrics::counter!("relay_sessions_total", &labels).increment(1);
    metrics::histogram!("relay_session_duration_seconds", &labels)
        .record(elapsed.as_secs_f64());
}

/// Record a connection-level upstream failure.
pub fn record_upstream_error(upstream: &str, kind: &'static str) {
    metrics::counter!(
        "relay_upstream_errors_total",
        "upstream" => upstream.to_string(),
        "kind" => kind
    )
    .increment(1);
}

/// Record a suppressed duplicate.
pub fn record_suppressed() {
    metrics::counter!("relay_dedup_suppressed_total").increment(1);
}

/// Record the dedup table size.
pub fn record_dedup_entries(size: usize) {
    metrics::gauge!("relay_dedup_entries").set(size as f64);
}

/// Record free admission permits.
pub fn record_admission_available(available: usize) {
    metrics::gauge!("relay_admission_available").set(available as f64);
}
