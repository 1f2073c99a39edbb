//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop)
//!     → connection.rs (id, live count)
//!     → pair.rs (inbound connection + upstream link, shared lifetime)
//!     → Hand off to HTTP layer
//!
//! Outbound:
//!     upstream.rs (connect, HTTP/1.1 client handshake, close signal)
//!     tunnel.rs (raw byte splice after an upgrade)
//! ```

pub mod connection;
pub mod listener;
pub mod pair;
pub mod tunnel;
pub mod upstream;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::Listener;
pub use pair::Pair;
pub use tunnel::{splice, TunnelEnd, TunnelStats};
pub use upstream::{UpstreamLink, UpstreamTarget};
