//! Metrics collection and export for the Bayeux server.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use bayeux_core::EngineStats;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const MESSAGES_TOTAL: &str = "bayeux_messages_total";
    pub const HANDSHAKES_TOTAL: &str = "bayeux_handshakes_total";
    pub const ERRORS_TOTAL: &str = "bayeux_errors_total";
    pub const CLIENTS_ACTIVE: &str = "bayeux_clients_active";
    pub const PATTERNS_ACTIVE: &str = "bayeux_patterns_active";
    pub const SUBSCRIPTIONS_ACTIVE: &str = "bayeux_subscriptions_active";
    pub const LATENCY_SECONDS: &str = "bayeux_request_seconds";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::MESSAGES_TOTAL,
        "Total number of inbound messages by channel kind"
    );
    metrics::describe_counter!(names::HANDSHAKES_TOTAL, "Total number of successful handshakes");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of error responses by code");
    metrics::describe_gauge!(names::CLIENTS_ACTIVE, "Current number of handshaken clients");
    metrics::describe_gauge!(
        names::PATTERNS_ACTIVE,
        "Current number of subscribed channel patterns"
    );
    metrics::describe_gauge!(
        names::SUBSCRIPTIONS_ACTIVE,
        "Current number of client subscriptions"
    );
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Request processing time in seconds, including long-poll holds"
    );

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

/// Record an inbound message.
pub fn record_message(kind: &'static str) {
    counter!(names::MESSAGES_TOTAL, "kind" => kind).increment(1);
}

/// Record a successful handshake.
pub fn record_handshake() {
    counter!(names::HANDSHAKES_TOTAL).increment(1);
}

/// Record an error response.
pub fn record_error(code: &str) {
    counter!(names::ERRORS_TOTAL, "code" => code.to_string()).increment(1);
}

/// Record request latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Update engine gauges.
pub fn set_engine_stats(stats: EngineStats) {
    gauge!(names::CLIENTS_ACTIVE).set(stats.client_count as f64);
    gauge!(names::PATTERNS_ACTIVE).set(stats.pattern_count as f64);
    gauge!(names::SUBSCRIPTIONS_ACTIVE).set(stats.subscription_count as f64);
}
