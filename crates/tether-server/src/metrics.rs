//! Metrics collection and export for Tether.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tether_core::{Inbound, Outbound};
use tracing::info;

/// Metric names.
pub mod names {
    pub const SESSIONS_TOTAL: &str = "tether_sessions_total";
    pub const SESSIONS_ACTIVE: &str = "tether_sessions_active";
    pub const MESSAGES_TOTAL: &str = "tether_messages_total";
    pub const MESSAGES_BYTES: &str = "tether_messages_bytes";
    pub const PUSH_REPLIES_TOTAL: &str = "tether_push_replies_total";
    pub const SESSION_SECONDS: &str = "tether_session_seconds";
    pub const ERRORS_TOTAL: &str = "tether_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::SESSIONS_TOTAL,
        "Total number of consumer sessions since server start"
    );
    metrics::describe_gauge!(
        names::SESSIONS_ACTIVE,
        "Current number of consumer sessions"
    );
    metrics::describe_counter!(
        names::MESSAGES_TOTAL,
        "Boundary messages by direction and type"
    );
    metrics::describe_counter!(names::MESSAGES_BYTES, "Boundary message bytes by direction");
    metrics::describe_counter!(
        names::PUSH_REPLIES_TOTAL,
        "Push replies delivered, by outcome and push type"
    );
    metrics::describe_histogram!(names::SESSION_SECONDS, "Consumer session duration in seconds");
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

/// Record a command read from a consumer.
pub fn record_inbound(message: &Inbound, bytes: usize) {
    counter!(names::MESSAGES_TOTAL, "direction" => "inbound", "type" => message.name()).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => "inbound").increment(bytes as u64);
}

/// Record a message written to a consumer.
pub fn record_outbound(message: &Outbound, bytes: usize) {
    counter!(names::MESSAGES_TOTAL, "direction" => "outbound", "type" => message.name()).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => "outbound").increment(bytes as u64);

    if let Outbound::PushReply(reply) = message {
        counter!(
            names::PUSH_REPLIES_TOTAL,
            "outcome" => reply.event_name.as_str(),
            "push_type" => reply.push_type.as_str()
        )
        .increment(1);
    }
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records the end of a session on drop.
pub struct SessionMetricsGuard {
    started: std::time::Instant,
}

impl SessionMetricsGuard {
    /// Create a new metrics guard, recording a session start.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::SESSIONS_TOTAL).increment(1);
        gauge!(names::SESSIONS_ACTIVE).increment(1.0);
        Self {
            started: std::time::Instant::now(),
        }
    }
}

impl Default for SessionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SessionMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::SESSIONS_ACTIVE).decrement(1.0);
        histogram!(names::SESSION_SECONDS).record(self.started.elapsed().as_secs_f64());
    }
}
