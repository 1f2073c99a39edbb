//! Relay event hooks.
//!
//! The relay reports what happens to each connection pair through the
//! [`Observer`] trait. Observers only watch: nothing they do changes how bytes
//! are forwarded.

use std::net::SocketAddr;
use std::time::Duration;

use hyper::{Method, StatusCode};

use crate::error::RelayError;
use crate::net::connection::ConnectionId;
use crate::net::tunnel::TunnelStats;
use crate::observability::metrics;

/// Receives connection pair lifecycle events.
pub trait Observer: Send + Sync + 'static {
    /// A client connection was accepted.
    fn on_connection_accepted(&self, _id: ConnectionId, _peer: SocketAddr) {}

    /// A plain HTTP request arrived and is about to be forwarded.
    fn on_request_received(&self, id: ConnectionId, method: &Method, path: &str);

    /// The upstream answered and its response is streaming back.
    fn on_response_relayed(&self, _id: ConnectionId, _status: StatusCode, _elapsed: Duration) {}

    /// An upgrade handshake arrived and is about to be forwarded.
    fn on_upgrade(&self, _id: ConnectionId, _path: &str) {}

    /// An upgraded tunnel finished.
    fn on_tunnel_closed(&self, _id: ConnectionId, _stats: TunnelStats) {}

    /// The connection pair is gone: both sides are closed.
    fn on_connection_closed(&self, id: ConnectionId, lifetime: Duration);

    /// Forwarding failed for this pair.
    fn on_error(&self, id: ConnectionId, error: &RelayError);
}

/// Default observer: structured log lines plus metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn on_connection_accepted(&self, id: ConnectionId, peer: SocketAddr) {
        metrics::connection_opened();
        tracing::debug!(connection_id = %id, peer_addr = %peer, "Client connected");
    }

    fn on_request_received(&self, id: ConnectionId, method: &Method, path: &str) {
        metrics::record_request(method.as_str());
        tracing::info!(connection_id = %id, method = %method, path = %path, "Received request");
    }

    fn on_response_relayed(&self, id: ConnectionId, status: StatusCode, elapsed: Duration) {
        metrics::record_response(status.as_u16(), elapsed);
        tracing::debug!(
            connection_id = %id,
            status = status.as_u16(),
            latency_ms = elapsed.as_millis() as u64,
            "Relaying response"
        );
    }

    fn on_upgrade(&self, id: ConnectionId, path: &str) {
        metrics::record_upgrade();
        tracing::info!(connection_id = %id, path = %path, "Received upgrade request");
    }

    fn on_tunnel_closed(&self, id: ConnectionId, stats: TunnelStats) {
        metrics::record_tunnel_bytes(stats.sent, stats.received);
        tracing::debug!(
            connection_id = %id,
            sent = stats.sent,
            received = stats.received,
            "Tunnel closed"
        );
    }

    fn on_connection_closed(&self, id: ConnectionId, lifetime: Duration) {
        metrics::connection_closed();
        tracing::info!(
            connection_id = %id,
            lifetime_ms = lifetime.as_millis() as u64,
            "Client disconnected"
        );
    }

    fn on_error(&self, id: ConnectionId, error: &RelayError) {
        let phase = error.phase();
        metrics::record_error(phase);
        match phase {
            crate::error::Phase::Streaming => {
                tracing::warn!(connection_id = %id, phase = %phase, error = %error, "Proxy error")
            }
            _ => tracing::error!(connection_id = %id, phase = %phase, error = %error, "Proxy error"),
        }
    }
}
