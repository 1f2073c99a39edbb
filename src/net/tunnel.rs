//! Full-duplex byte relay for upgraded connections.
//!
//! # Data Flow
//! ```text
//! Client ←──── raw bytes ────→ Relay ←──── raw bytes ────→ Upstream
//! ```
//!
//! # Design Decisions
//! - Bytes are copied opaquely; WebSocket frames are never parsed
//! - EOF on one side shuts down the write half of the other side
//! - The tunnel ends when both directions finish, on the first I/O error,
//!   after the idle timeout, or on relay shutdown

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;

use crate::error::RelayError;

const BUFFER_SIZE: usize = 16 * 1024;

/// Bytes moved through a tunnel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TunnelStats {
    /// Client to upstream.
    pub sent: u64,
    /// Upstream to client.
    pub received: u64,
}

/// How a tunnel came to an end without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelEnd {
    /// Both sides closed.
    Closed,
    /// The relay is shutting down.
    Shutdown,
}

#[derive(Debug)]
struct Activity {
    started: Instant,
    last_millis: AtomicU64,
    sent: AtomicU64,
    received: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            last_millis: AtomicU64::new(0),
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let now = self.started.elapsed().as_millis() as u64;
        self.last_millis.store(now, Ordering::Relaxed);
    }

    fn stats(&self) -> TunnelStats {
        TunnelStats {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
        }
    }

    /// Resolves once nothing has moved for `limit`.
    async fn idle_for(&self, limit: Duration) {
        loop {
            let last = Duration::from_millis(self.last_millis.load(Ordering::Relaxed));
            let quiet = self.started.elapsed().saturating_sub(last);
            if quiet >= limit {
                return;
            }
            tokio::time::sleep(limit - quiet).await;
        }
    }
}

async fn pump<R, W>(
    reader: &mut R,
    writer: &mut W,
    counter: &AtomicU64,
    activity: &Activity,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            writer.shutdown().await?;
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        counter.fetch_add(n as u64, Ordering::Relaxed);
        activity.touch();
    }
}

/// Relay bytes between `inbound` and `outbound` until the tunnel ends.
///
/// Returns how the tunnel ended and how many bytes moved each way. Both
/// streams are dropped before this returns.
pub async fn splice<A, B>(
    inbound: A,
    outbound: B,
    idle_timeout: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> (Result<TunnelEnd, RelayError>, TunnelStats)
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let activity = Activity::new();
    let (mut client_read, mut client_write) = tokio::io::split(inbound);
    let (mut upstream_read, mut upstream_write) = tokio::io::split(outbound);

    let forward = pump(&mut client_read, &mut upstream_write, &activity.sent, &activity);
    let backward = pump(&mut upstream_read, &mut client_write, &activity.received, &activity);

    let result = tokio::select! {
        res = async { tokio::try_join!(forward, backward) } => match res {
            Ok(_) => Ok(TunnelEnd::Closed),
            Err(e) => Err(RelayError::Stream(e)),
        },
        _ = activity.idle_for(idle_timeout) => Err(RelayError::Idle(idle_timeout)),
        _ = shutdown.recv() => Ok(TunnelEnd::Shutdown),
    };

    (result, activity.stats())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn relays_both_directions_in_order() {
        let (mut client, relay_in) = duplex(64);
        let (relay_out, mut server) = duplex(64);
        let (_tx, rx) = broadcast::channel(1);

        let tunnel = tokio::spawn(splice(relay_in, relay_out, Duration::from_secs(5), rx));

        client.write_all(b"first ").await.unwrap();
        client.write_all(b"second").await.unwrap();
        let mut buf = [0u8; 12];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"first second");

        server.write_all(b"reply").await.unwrap();
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"reply");

        // Client hangs up: the server sees EOF, closes too, the tunnel ends.
        drop(client);
        let mut rest = Vec::new();
        server.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        drop(server);

        let (result, stats) = tunnel.await.unwrap();
        assert_eq!(result.unwrap(), TunnelEnd::Closed);
        assert_eq!(stats, TunnelStats { sent: 12, received: 5 });
    }

    #[tokio::test]
    async fn idle_tunnel_times_out() {
        let (_client, relay_in) = duplex(64);
        let (relay_out, _server) = duplex(64);
        let (_tx, rx) = broadcast::channel(1);

        let (result, stats) = tokio::time::timeout(
            Duration::from_secs(2),
            splice(relay_in, relay_out, Duration::from_millis(100), rx),
        )
        .await
        .expect("idle timeout should fire");

        assert!(matches!(result, Err(RelayError::Idle(_))));
        assert_eq!(stats, TunnelStats::default());
    }

    #[tokio::test]
    async fn shutdown_ends_tunnel() {
        let (_client, relay_in) = duplex(64);
        let (relay_out, _server) = duplex(64);
        let (tx, rx) = broadcast::channel(1);

        let tunnel = tokio::spawn(splice(relay_in, relay_out, Duration::from_secs(30), rx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(()).unwrap();

        let (result, _) = tokio::time::timeout(Duration::from_secs(1), tunnel)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.unwrap(), TunnelEnd::Shutdown);
    }
}
