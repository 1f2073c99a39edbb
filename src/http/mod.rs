//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper HTTP/1.1 with upgrades, Axum router, lifecycle)
//!     → proxy.rs (classify; plain requests forwarded verbatim)
//!     → websocket.rs (upgrade handshakes forwarded, then tunnelled)
//!     → Upstream
//! ```

pub mod proxy;
pub mod server;
pub mod websocket;

pub use proxy::is_upgrade_request;
pub use server::{Relay, RelayHandle};
