//! Metrics collection and export for Relay.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use relay_core::{GatewayStats, Outcome};
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "relay_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "relay_connections_active";
    pub const ONLINE_USERS: &str = "relay_online_users";
    pub const FRAMES_TOTAL: &str = "relay_frames_total";
    pub const FRAMES_BYTES: &str = "relay_frames_bytes";
    pub const MESSAGES_RELAYED: &str = "relay_messages_relayed_total";
    pub const EVENTS_DROPPED: &str = "relay_events_dropped_total";
    pub const LATENCY_SECONDS: &str = "relay_latency_seconds";
    pub const ERRORS_TOTAL: &str = "relay_errors_total";
    pub const AUTH_REQUESTS: &str = "relay_auth_requests_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of realtime connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of realtime connections"
    );
    metrics::describe_gauge!(names::ONLINE_USERS, "Users in the presence registry");
    metrics::describe_counter!(names::FRAMES_TOTAL, "Frames processed, by direction and event");
    metrics::describe_counter!(names::FRAMES_BYTES, "Bytes of frames processed, by direction");
    metrics::describe_counter!(
        names::MESSAGES_RELAYED,
        "Messages handed to a receiver's connection"
    );
    metrics::describe_counter!(names::EVENTS_DROPPED, "Events dropped, by reason");
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Inbound message processing latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Transport and codec errors");
    metrics::describe_counter!(names::AUTH_REQUESTS, "Auth requests, by route and status");

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

/// Record a frame.
pub fn record_frame(bytes: usize, direction: &'static str, event: &'static str) {
    counter!(names::FRAMES_TOTAL, "direction" => direction, "event" => event).increment(1);
    counter!(names::FRAMES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record what the gateway did with an event.
pub fn record_outcome(outcome: &Outcome) {
    match outcome {
        Outcome::Delivered { .. } => counter!(names::MESSAGES_RELAYED).increment(1),
        Outcome::Dropped(reason) => {
            counter!(names::EVENTS_DROPPED, "reason" => reason.kind()).increment(1);
        }
        Outcome::Identified(_) | Outcome::Closed { .. } => {}
    }
}

/// Update the online user gauge.
pub fn set_online_users(stats: GatewayStats) {
    gauge!(names::ONLINE_USERS).set(stats.online_users as f64);
}

/// Record message latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Record an auth request.
pub fn record_auth(route: &'static str, status: u16) {
    counter!(names::AUTH_REQUESTS, "route" => route, "status" => status.to_string()).increment(1);
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
