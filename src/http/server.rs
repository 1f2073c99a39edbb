//! Relay server setup and lifecycle.
//!
//! # Responsibilities
//! - Own the bound listener
//! - Run the accept loop, one task per inbound connection
//! - Serve each connection as HTTP/1.1 with upgrades enabled
//! - Close the inbound side when its upstream closes
//! - Stop accepting, drain and tear down on shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use tower::ServiceExt;
use tower_http::trace::TraceLayer;

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::http::proxy::relay_handler;
use crate::lifecycle::Shutdown;
use crate::net::{ConnectionTracker, Listener, Pair, UpstreamTarget};
use crate::observability::{LogObserver, Observer};

/// Pause after a failed `accept()` so a persistent error (e.g. EMFILE) does
/// not spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// State injected into the relay handler.
#[derive(Clone)]
pub(crate) struct RelayState {
    pub(crate) idle_timeout: Duration,
    pub(crate) shutdown: Shutdown,
}

/// A bound relay, ready to start.
pub struct Relay {
    listener: Listener,
    local_addr: SocketAddr,
    config: RelayConfig,
    observer: Arc<dyn Observer>,
    tracker: ConnectionTracker,
    shutdown: Shutdown,
}

impl Relay {
    /// Bind the inbound listener. Nothing is accepted until [`Relay::start`].
    pub async fn bind(config: RelayConfig) -> Result<Self, RelayError> {
        let listener = Listener::bind(&config.listener).await?;
        let local_addr = listener.local_addr().map_err(|source| RelayError::Bind {
            address: config.listener.bind_address.clone(),
            source,
        })?;

        Ok(Self {
            listener,
            local_addr,
            config,
            observer: Arc::new(LogObserver),
            tracker: ConnectionTracker::new(),
            shutdown: Shutdown::new(),
        })
    }

    /// Replace the default [`LogObserver`].
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Spawn the accept loop and return a handle to stop it.
    pub fn start(self) -> RelayHandle {
        // Subscribe before spawning so an immediate stop is never missed.
        let stop = self.shutdown.subscribe();
        let local_addr = self.local_addr;
        let shutdown = self.shutdown.clone();
        let tracker = self.tracker.clone();
        let task = tokio::spawn(self.serve(stop));

        RelayHandle {
            local_addr,
            shutdown,
            tracker,
            task,
        }
    }

    async fn serve(self, mut stop: broadcast::Receiver<()>) {
        let Relay {
            listener,
            local_addr,
            config,
            observer,
            tracker,
            shutdown,
        } = self;

        let target = Arc::new(UpstreamTarget::new(
            config.upstream.address.clone(),
            config.timeouts.connect(),
        ));
        let idle_timeout = config.timeouts.idle();
        let app = build_router(RelayState {
            idle_timeout,
            shutdown: shutdown.clone(),
        });

        tracing::info!(
            address = %local_addr,
            upstream = %target.address(),
            "Relay accepting connections"
        );

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let (pair, upstream_closed) =
                            Pair::new(tracker.track(), peer, Arc::clone(&target), Arc::clone(&observer));
                        connections.spawn(serve_connection(
                            stream,
                            pair,
                            upstream_closed,
                            app.clone(),
                            idle_timeout,
                            shutdown.subscribe(),
                        ));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                _ = stop.recv() => break,
            }
        }

        drop(listener);
        tracing::info!(active = tracker.active_count(), "Stopped accepting, draining connections");

        match tokio::time::timeout(config.timeouts.drain(), tracker.wait_idle()).await {
            Ok(()) => tracing::info!("All connections drained"),
            Err(_) => {
                tracing::warn!(
                    remaining = tracker.active_count(),
                    "Drain deadline reached, dropping connections"
                );
                connections.shutdown().await;
            }
        }

        tracing::info!("Relay stopped");
    }
}

/// Handle to a running relay.
#[derive(Debug)]
pub struct RelayHandle {
    local_addr: SocketAddr,
    shutdown: Shutdown,
    tracker: ConnectionTracker,
    task: JoinHandle<()>,
}

impl RelayHandle {
    /// The address the relay accepts connections on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Live connection pairs, tunnels included.
    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Stop accepting, drain in-flight connections and wait for the relay to
    /// finish.
    pub async fn stop(self) -> Result<(), RelayError> {
        self.shutdown.trigger();
        self.task.await?;
        Ok(())
    }
}

/// Build the Axum router: every method and path goes to the relay handler.
fn build_router(state: RelayState) -> Router {
    Router::new()
        .fallback(relay_handler)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve one inbound connection until it, or its upstream, closes.
async fn serve_connection(
    stream: TcpStream,
    pair: Arc<Pair>,
    mut upstream_closed: watch::Receiver<bool>,
    app: Router,
    idle_timeout: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let id = pair.id();
    let service_pair = Arc::clone(&pair);
    let service = service_fn(move |mut request: Request<Incoming>| {
        request.extensions_mut().insert(Arc::clone(&service_pair));
        app.clone().oneshot(request)
    });

    let connection = http1::Builder::new()
        .preserve_header_case(true)
        // The upstream's response head is relayed as is; hyper must not add a Date.
        .auto_date_header(false)
        .timer(TokioTimer::new())
        .header_read_timeout(idle_timeout)
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades();
    tokio::pin!(connection);

    let mut closing = false;
    let mut watch_upstream = true;
    let result = loop {
        tokio::select! {
            result = connection.as_mut() => break result,
            _ = shutdown.recv(), if !closing => {
                closing = true;
                connection.as_mut().graceful_shutdown();
            }
            changed = upstream_closed.changed(), if watch_upstream && !closing => match changed {
                Ok(()) if *upstream_closed.borrow() => {
                    tracing::debug!(connection_id = %id, "Upstream closed, closing client connection");
                    closing = true;
                    connection.as_mut().graceful_shutdown();
                }
                Ok(()) => {}
                Err(_) => watch_upstream = false,
            },
        }
    };

    match result {
        Err(e) => pair.observer().on_error(id, &RelayError::Inbound(e)),
        Ok(()) if pair.is_upgraded() => {
            tracing::debug!(connection_id = %id, peer_addr = %pair.peer(), "Client connection handed to tunnel");
        }
        Ok(()) => {}
    }
}
