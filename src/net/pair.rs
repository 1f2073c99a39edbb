//! The connection pair: one inbound connection and its upstream link.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{watch, Mutex};

use crate::net::connection::{ConnectionGuard, ConnectionId};
use crate::net::upstream::{UpstreamLink, UpstreamTarget};
use crate::observability::Observer;

/// State shared by everything working on behalf of one inbound connection.
///
/// The inbound connection task, each in-flight request and, after an upgrade,
/// the tunnel task hold an `Arc<Pair>`. When the last one lets go the pair is
/// reported closed, its upstream link is torn down and the live count drops.
pub struct Pair {
    // Field order matters: the link is torn down before the live count drops.
    upstream: Mutex<UpstreamLink>,
    guard: ConnectionGuard,
    peer: SocketAddr,
    opened: Instant,
    upgraded: AtomicBool,
    observer: Arc<dyn Observer>,
}

impl Pair {
    /// Create a pair for a freshly accepted connection.
    ///
    /// Also returns the receiver that flips when the upstream side closes.
    pub fn new(
        guard: ConnectionGuard,
        peer: SocketAddr,
        target: Arc<UpstreamTarget>,
        observer: Arc<dyn Observer>,
    ) -> (Arc<Self>, watch::Receiver<bool>) {
        let (link, upstream_closed) = UpstreamLink::new(guard.id(), target);
        observer.on_connection_accepted(guard.id(), peer);

        let pair = Arc::new(Self {
            upstream: Mutex::new(link),
            guard,
            peer,
            opened: Instant::now(),
            upgraded: AtomicBool::new(false),
            observer,
        });
        (pair, upstream_closed)
    }

    pub fn id(&self) -> ConnectionId {
        self.guard.id()
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// The upstream half. Requests of one inbound connection take turns.
    pub fn upstream(&self) -> &Mutex<UpstreamLink> {
        &self.upstream
    }

    pub fn observer(&self) -> &Arc<dyn Observer> {
        &self.observer
    }

    /// Record that the inbound socket now belongs to a tunnel.
    pub fn mark_upgraded(&self) {
        self.upgraded.store(true, Ordering::Release);
    }

    pub fn is_upgraded(&self) -> bool {
        self.upgraded.load(Ordering::Acquire)
    }
}

impl Drop for Pair {
    fn drop(&mut self) {
        self.observer
            .on_connection_closed(self.guard.id(), self.opened.elapsed());
    }
}

impl std::fmt::Debug for Pair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pair")
            .field("id", &self.guard.id())
            .field("peer", &self.peer)
            .field("upgraded", &self.is_upgraded())
            .finish()
    }
}
