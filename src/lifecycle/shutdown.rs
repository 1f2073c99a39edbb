//! Stop signal shared by the accept loop, connections and tunnels.

use tokio::sync::broadcast;

/// Fan-out stop signal.
///
/// Every clone sends on the same channel. The accept loop, each inbound
/// connection and each tunnel hold their own receiver, taken before they
/// start, so a stop sent at any point reaches all of them.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        // One slot is enough: the signal is sent once and carries no data.
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// A receiver that resolves once [`Shutdown::trigger`] is called.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Signal every current receiver. Receivers created afterwards miss it.
    pub fn trigger(&self) {
        // No receivers simply means nothing is running yet.
        let _ = self.tx.send(());
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
