//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Relay events (accept, request, response, upgrade, close, error)
//!     → observer.rs (Observer trait, LogObserver default)
//!         → logging.rs (structured log lines)
//!         → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (text or JSON lines)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Observers never influence forwarding
//! - Connection ID flows through every event
//! - Metrics are cheap no-ops until a recorder is installed

pub mod logging;
pub mod metrics;
pub mod observer;

pub use observer::{LogObserver, Observer};
