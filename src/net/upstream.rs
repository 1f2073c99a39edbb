//! Outbound side of a connection pair.
//!
//! # Responsibilities
//! - Open the TCP connection to the fixed upstream, with a deadline
//! - Run the HTTP/1.1 client handshake and drive the connection
//! - Tell the inbound side when the upstream goes away
//!
//! # Design Decisions
//! - One link per inbound connection; it is never shared with another pair
//! - The connection is opened on first use and reused while it stays open
//! - Dropping the link aborts its connection, unless the connection was
//!   handed off to an upgrade

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::AbortHandle;

use crate::error::RelayError;
use crate::net::connection::ConnectionId;

/// The fixed address every pair connects to.
#[derive(Debug, Clone)]
pub struct UpstreamTarget {
    address: String,
    connect_timeout: Duration,
}

impl UpstreamTarget {
    pub fn new(address: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Open a TCP connection to the upstream.
    pub async fn connect(&self) -> Result<TcpStream, RelayError> {
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(self.address.as_str()))
            .await
        {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(upstream = %self.address, error = %e, "Failed to set TCP_NODELAY");
                }
                Ok(stream)
            }
            Ok(Err(source)) => Err(RelayError::Connect {
                address: self.address.clone(),
                source,
            }),
            Err(_) => Err(RelayError::ConnectTimeout {
                address: self.address.clone(),
                after: self.connect_timeout,
            }),
        }
    }
}

/// A live HTTP/1.1 client connection and the task driving it.
struct Driven {
    sender: http1::SendRequest<Body>,
    driver: AbortHandle,
    /// Set while the connection is being handed to an upgrade, so its end is
    /// not reported as the upstream closing on us.
    detached: Arc<AtomicBool>,
}

/// The upstream half of one connection pair.
pub struct UpstreamLink {
    id: ConnectionId,
    target: Arc<UpstreamTarget>,
    current: Option<Driven>,
    closed: Arc<watch::Sender<bool>>,
}

impl UpstreamLink {
    /// Create an unconnected link.
    ///
    /// The receiver flips to `true` when an established upstream connection
    /// ends on its own.
    pub fn new(id: ConnectionId, target: Arc<UpstreamTarget>) -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        let link = Self {
            id,
            target,
            current: None,
            closed: Arc::new(tx),
        };
        (link, rx)
    }

    /// Whether an upstream connection is currently open.
    pub fn is_connected(&self) -> bool {
        self.current
            .as_ref()
            .map(|driven| !driven.sender.is_closed())
            .unwrap_or(false)
    }

    /// Forward a plain request and wait for the response head.
    pub async fn send(&mut self, request: Request<Body>) -> Result<Response<Incoming>, RelayError> {
        let driven = self.ready().await?;
        driven
            .sender
            .send_request(request)
            .await
            .map_err(RelayError::Forward)
    }

    /// Forward an upgrade handshake.
    ///
    /// On `101 Switching Protocols` the connection leaves this link: the
    /// caller takes the upgraded socket from the response. Any other answer
    /// leaves the connection in place for further requests.
    pub async fn upgrade(&mut self, request: Request<Body>) -> Result<Response<Incoming>, RelayError> {
        let driven = self.ready().await?;
        let detached = Arc::clone(&driven.detached);
        detached.store(true, Ordering::Release);

        let result = driven
            .sender
            .send_request(request)
            .await
            .map_err(RelayError::Upgrade);

        match &result {
            Ok(response) if response.status() == StatusCode::SWITCHING_PROTOCOLS => {
                // Leave the driver running; it hands the socket to the upgrade.
                self.current = None;
            }
            _ => detached.store(false, Ordering::Release),
        }
        result
    }

    async fn ready(&mut self) -> Result<&mut Driven, RelayError> {
        let driven = match self.current.take() {
            Some(driven) if !driven.sender.is_closed() => driven,
            stale => {
                if let Some(driven) = stale {
                    driven.abort();
                }
                self.connect().await?
            }
        };

        let driven = self.current.insert(driven);
        driven.sender.ready().await.map_err(RelayError::Forward)?;
        Ok(driven)
    }

    async fn connect(&self) -> Result<Driven, RelayError> {
        let stream = self.target.connect().await?;

        let (sender, connection) = http1::Builder::new()
            .preserve_header_case(true)
            .handshake::<_, Body>(TokioIo::new(stream))
            .await
            .map_err(RelayError::Handshake)?;

        let detached = Arc::new(AtomicBool::new(false));
        let id = self.id;
        let closed = Arc::clone(&self.closed);
        let flag = Arc::clone(&detached);

        let handle = tokio::spawn(async move {
            if let Err(e) = connection.with_upgrades().await {
                tracing::debug!(connection_id = %id, error = %e, "Upstream connection ended with error");
            }
            if !flag.load(Ordering::Acquire) {
                tracing::debug!(connection_id = %id, "Upstream connection closed");
                closed.send_replace(true);
            }
        });

        tracing::debug!(
            connection_id = %id,
            upstream = %self.target.address(),
            "Upstream connection established"
        );

        Ok(Driven {
            sender,
            driver: handle.abort_handle(),
            detached,
        })
    }
}

impl Driven {
    fn abort(&self) {
        if !self.detached.load(Ordering::Acquire) {
            self.driver.abort();
        }
    }
}

impl Drop for UpstreamLink {
    fn drop(&mut self) {
        if let Some(driven) = self.current.take() {
            driven.abort();
        }
    }
}

impl std::fmt::Debug for UpstreamLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamLink")
            .field("id", &self.id)
            .field("target", &self.target.address())
            .field("connected", &self.is_connected())
            .finish()
    }
}
