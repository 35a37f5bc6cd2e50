//! Metrics collection and Prometheus exporter for sslwrap.
//!
//! Secure connections report counts, handshake latency, bytes moved and
//! errors by type. Recording is a no-op until an exporter is installed.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Initialize Prometheus metrics exporter.
///
/// Starts an HTTP server on the given address to expose metrics.
/// Returns an error message if binding fails.
pub fn init_prometheus(listen: &str) -> Result<(), String> {
    let addr: SocketAddr = listen
        .parse()
        .map_err(|e| format!("invalid metrics listen address: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install prometheus exporter: {}", e))?;

    Ok(())
}

// ============================================================================
// Metric Names
// ============================================================================

/// Total number of secure connections opened, by role.
pub const CONNECTIONS_TOTAL: &str = "sslwrap_connections_total";
/// Number of currently open secure connections.
pub const CONNECTIONS_ACTIVE: &str = "sslwrap_connections_active";
/// Total ciphertext bytes read from transports.
pub const BYTES_RECEIVED_TOTAL: &str = "sslwrap_bytes_received_total";
/// Total ciphertext bytes written to transports.
pub const BYTES_SENT_TOTAL: &str = "sslwrap_bytes_sent_total";
/// Connection duration histogram (seconds).
pub const CONNECTION_DURATION_SECONDS: &str = "sslwrap_connection_duration_seconds";
/// Total number of errors by type.
pub const ERRORS_TOTAL: &str = "sslwrap_errors_total";
/// TLS handshake duration histogram (seconds).
pub const TLS_HANDSHAKE_DURATION_SECONDS: &str = "sslwrap_tls_handshake_duration_seconds";
/// Connections dropped before their handshake completed.
pub const HANDSHAKES_FAILED_TOTAL: &str = "sslwrap_handshakes_failed_total";
/// Engine tasks run off the connection task.
pub const ENGINE_TASKS_TOTAL: &str = "sslwrap_engine_tasks_total";

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record a new connection (role: "server" or "client").
#[inline]
pub fn record_connection_opened(role: &'static str) {
    counter!(CONNECTIONS_TOTAL, "role" => role).increment(1);
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a connection closed.
#[inline]
pub fn record_connection_closed(duration_secs: f64) {
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(CONNECTION_DURATION_SECONDS).record(duration_secs);
}

#[inline]
pub fn record_bytes_received(bytes: u64) {
    counter!(BYTES_RECEIVED_TOTAL).increment(bytes);
}

#[inline]
pub fn record_bytes_sent(bytes: u64) {
    counter!(BYTES_SENT_TOTAL).increment(bytes);
}

/// Record an error by type.
#[inline]
pub fn record_error(error_type: &'static str) {
    counter!(ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Record TLS handshake duration.
#[inline]
pub fn record_tls_handshake_duration(duration_secs: f64) {
    histogram!(TLS_HANDSHAKE_DURATION_SECONDS).record(duration_secs);
}

/// Record a connection that closed before its handshake completed
/// (reason: "timeout", "error", "closed").
#[inline]
pub fn record_handshake_failed(reason: &'static str) {
    counter!(HANDSHAKES_FAILED_TOTAL, "reason" => reason).increment(1);
}

#[inline]
pub fn record_engine_task() {
    counter!(ENGINE_TASKS_TOTAL).increment(1);
}

// ============================================================================
// Error Type Constants (re-exported from sslwrap-core)
// ============================================================================

pub use sslwrap_core::{
    ERROR_CONFIG, ERROR_ENGINE_CONTRACT, ERROR_INPUT, ERROR_IO, ERROR_PROTOCOL, ERROR_RESOLVE,
    ERROR_SETUP, ERROR_TIMEOUT, ERROR_TLS_HANDSHAKE,
};
