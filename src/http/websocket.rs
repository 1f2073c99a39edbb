//! Upgrade (WebSocket) forwarding.
//!
//! # Data Flow
//! ```text
//! Client ── handshake ──→ Relay ── same handshake ──→ Upstream
//! Client ←── 101 ─────── Relay ←── 101 ────────────── Upstream
//! Client ←──── raw bytes ────→ tunnel ←──── raw bytes ────→ Upstream
//! ```
//!
//! # Design Decisions
//! - The handshake travels over the pair's own upstream link
//! - Frames are never decoded; the tunnel copies bytes
//! - A refused upgrade is relayed like any other response

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use tokio::sync::broadcast;

use crate::error::RelayError;
use crate::http::proxy::{failure_response, request_target};
use crate::http::server::RelayState;
use crate::net::{splice, Pair, TunnelEnd};

pub(crate) async fn forward_upgrade(
    state: RelayState,
    pair: Arc<Pair>,
    mut request: Request<Body>,
) -> Response {
    let observer = Arc::clone(pair.observer());
    observer.on_upgrade(pair.id(), request_target(&request));

    let inbound = hyper::upgrade::on(&mut request);
    let result = pair.upstream().lock().await.upgrade(request).await;

    let mut response = match result {
        Ok(response) => response,
        Err(error) => {
            observer.on_error(pair.id(), &error);
            return failure_response(&error);
        }
    };

    if response.status() == StatusCode::SWITCHING_PROTOCOLS {
        let outbound = hyper::upgrade::on(&mut response);
        pair.mark_upgraded();
        tokio::spawn(run_tunnel(
            Arc::clone(&pair),
            inbound,
            outbound,
            state.idle_timeout,
            state.shutdown.subscribe(),
        ));
    } else {
        tracing::debug!(
            connection_id = %pair.id(),
            status = response.status().as_u16(),
            "Upstream declined upgrade"
        );
    }

    let (parts, body) = response.into_parts();
    Response::from_parts(parts, Body::new(body))
}

/// Wait for both sides to finish switching protocols, then splice them.
async fn run_tunnel(
    pair: Arc<Pair>,
    inbound: OnUpgrade,
    outbound: OnUpgrade,
    idle_timeout: Duration,
    shutdown: broadcast::Receiver<()>,
) {
    let id = pair.id();
    let observer = pair.observer();

    let (client, upstream) = match tokio::try_join!(inbound, outbound) {
        Ok(sockets) => sockets,
        Err(e) => {
            observer.on_error(id, &RelayError::Upgrade(e));
            return;
        }
    };
    tracing::debug!(connection_id = %id, "Tunnel established");

    let (result, stats) =
        splice(TokioIo::new(client), TokioIo::new(upstream), idle_timeout, shutdown).await;
    observer.on_tunnel_closed(id, stats);

    match result {
        Ok(TunnelEnd::Closed) => {}
        Ok(TunnelEnd::Shutdown) => {
            tracing::debug!(connection_id = %id, "Tunnel closed for shutdown");
        }
        Err(e) => observer.on_error(id, &e),
    }
}
