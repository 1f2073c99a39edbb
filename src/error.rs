//! Relay error taxonomy.

use std::time::Duration;

/// Where in a connection pair's life a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Binding or accepting on the inbound port.
    Listen,
    /// Opening the TCP connection to the upstream.
    Connect,
    /// HTTP/1.1 or upgrade handshake with the upstream.
    Handshake,
    /// Relaying a request, response or tunnel after the handshake.
    Streaming,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Listen => "listen",
            Phase::Connect => "connect",
            Phase::Handshake => "handshake",
            Phase::Streaming => "streaming",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced while relaying.
///
/// Every variant is terminal for the connection pair it happened on and never
/// for the relay itself.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to connect to upstream {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connecting to upstream {address} timed out after {after:?}")]
    ConnectTimeout { address: String, after: Duration },

    #[error("upstream handshake failed: {0}")]
    Handshake(#[source] hyper::Error),

    #[error("upstream exchange failed: {0}")]
    Forward(#[source] hyper::Error),

    #[error("protocol upgrade failed: {0}")]
    Upgrade(#[source] hyper::Error),

    #[error("inbound connection failed: {0}")]
    Inbound(#[source] hyper::Error),

    #[error("tunnel I/O failed: {0}")]
    Stream(#[source] std::io::Error),

    #[error("tunnel idle for {0:?}")]
    Idle(Duration),

    #[error("relay task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl RelayError {
    /// The phase this error belongs to.
    pub fn phase(&self) -> Phase {
        match self {
            RelayError::Bind { .. } | RelayError::Task(_) => Phase::Listen,
            RelayError::Connect { .. } | RelayError::ConnectTimeout { .. } => Phase::Connect,
            RelayError::Handshake(_) | RelayError::Upgrade(_) => Phase::Handshake,
            RelayError::Forward(_)
            | RelayError::Inbound(_)
            | RelayError::Stream(_)
            | RelayError::Idle(_) => Phase::Streaming,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_failures_map_to_connect_phase() {
        let refused = RelayError::Connect {
            address: "127.0.0.1:1".into(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        };
        let timed_out = RelayError::ConnectTimeout {
            address: "10.0.0.1:80".into(),
            after: Duration::from_secs(5),
        };
        assert_eq!(refused.phase(), Phase::Connect);
        assert_eq!(timed_out.phase(), Phase::Connect);
        assert!(refused.to_string().contains("127.0.0.1:1"));
    }

    #[test]
    fn tunnel_failures_map_to_streaming_phase() {
        let reset = RelayError::Stream(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert_eq!(reset.phase(), Phase::Streaming);
        assert_eq!(RelayError::Idle(Duration::from_secs(1)).phase(), Phase::Streaming);
        assert_eq!(Phase::Streaming.to_string(), "streaming");
    }
}
