//! Metrics collection and export for Beacon.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "beacon_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "beacon_connections_active";
    pub const HANDSHAKE_FAILURES_TOTAL: &str = "beacon_handshake_failures_total";
    pub const MESSAGES_RELAYED_TOTAL: &str = "beacon_messages_relayed_total";
    pub const RELAY_DELIVERIES_TOTAL: &str = "beacon_relay_deliveries_total";
    pub const TYPING_SIGNALS_TOTAL: &str = "beacon_typing_signals_total";
    pub const PRESENCE_TRANSITIONS_TOTAL: &str = "beacon_presence_transitions_total";
    pub const ONLINE_USERS: &str = "beacon_online_users";
    pub const ERRORS_TOTAL: &str = "beacon_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(
        names::HANDSHAKE_FAILURES_TOTAL,
        "Handshakes rejected before a connection existed"
    );
    metrics::describe_counter!(
        names::MESSAGES_RELAYED_TOTAL,
        "Persisted messages accepted for relay"
    );
    metrics::describe_counter!(
        names::RELAY_DELIVERIES_TOTAL,
        "Per-connection deliveries of relayed messages"
    );
    metrics::describe_counter!(names::TYPING_SIGNALS_TOTAL, "Typing start/stop signals relayed");
    metrics::describe_counter!(
        names::PRESENCE_TRANSITIONS_TOTAL,
        "Online/offline boundary transitions"
    );
    metrics::describe_gauge!(names::ONLINE_USERS, "Current number of online users");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a rejected handshake.
pub fn record_handshake_failure(reason: &str) {
    counter!(names::HANDSHAKE_FAILURES_TOTAL, "reason" => reason.to_string()).increment(1);
}

/// Record one relayed message and how many connections it reached.
pub fn record_relay(deliveries: usize) {
    counter!(names::MESSAGES_RELAYED_TOTAL).increment(1);
    counter!(names::RELAY_DELIVERIES_TOTAL).increment(deliveries as u64);
}

/// Record a relayed typing signal.
pub fn record_typing_signal(kind: &str) {
    counter!(names::TYPING_SIGNALS_TOTAL, "kind" => kind.to_string()).increment(1);
}

/// Record an online/offline boundary transition.
pub fn record_presence_transition(direction: &str) {
    counter!(names::PRESENCE_TRANSITIONS_TOTAL, "direction" => direction.to_string()).increment(1);
}

/// Update the online user gauge.
pub fn set_online_users(count: usize) {
    gauge!(names::ONLINE_USERS).set(count as f64);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
