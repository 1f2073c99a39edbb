//! Transparent HTTP and WebSocket forwarding relay.
//!
//! Every connection accepted on the listen port is paired with one
//! connection to a single fixed upstream, and traffic flows through
//! unmodified in both directions.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::RelayConfig;
pub use error::{Phase, RelayError};
pub use http::{Relay, RelayHandle};
pub use lifecycle::Shutdown;
pub use observability::{LogObserver, Observer};
