//! Metrics collection and exposition.
//!
//! # Metrics
//! - `relay_requests_total` (counter): forwarded requests by method
//! - `relay_responses_total` (counter): relayed responses by status
//! - `relay_upstream_latency_seconds` (histogram): time to response head
//! - `relay_upgrades_total` (counter): upgrade handshakes forwarded
//! - `relay_errors_total` (counter): failures by phase
//! - `relay_active_connections` (gauge): live connection pairs
//! - `relay_tunnel_bytes_total` (counter): tunnel bytes by direction
//!
//! Without an installed recorder every call here is a no-op.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::error::Phase;

/// Install the Prometheus recorder and its scrape endpoint.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(method: &str) {
    counter!("relay_requests_total", "method" => method.to_string()).increment(1);
}

pub fn record_response(status: u16, elapsed: Duration) {
    counter!("relay_responses_total", "status" => status.to_string()).increment(1);
    histogram!("relay_upstream_latency_seconds").record(elapsed.as_secs_f64());
}

pub fn record_upgrade() {
    counter!("relay_upgrades_total").increment(1);
}

pub fn record_error(phase: Phase) {
    counter!("relay_errors_total", "phase" => phase.as_str()).increment(1);
}

pub fn record_tunnel_bytes(sent: u64, received: u64) {
    counter!("relay_tunnel_bytes_total", "direction" => "upstream").increment(sent);
    counter!("relay_tunnel_bytes_total", "direction" => "client").increment(received);
}

pub fn connection_opened() {
    gauge!("relay_active_connections").increment(1.0);
}

pub fn connection_closed() {
    gauge!("relay_active_connections").decrement(1.0);
}
