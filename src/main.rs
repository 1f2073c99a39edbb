//! forward-relay
//!
//! Accepts HTTP and WebSocket connections on one port and forwards them,
//! unmodified, to a single fixed upstream.
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌──────────────────────────────────────────────┐
//!                       │                    RELAY                      │
//!     Client            │  ┌──────────┐   ┌──────────┐   ┌──────────┐  │
//!     ──────────────────┼─▶│   net    │──▶│   http   │──▶│ upstream │──┼──▶ Upstream
//!                       │  │ listener │   │  server  │   │   link   │  │
//!     ◀─────────────────┼──│          │◀──│ (hyper)  │◀──│          │◀─┼───
//!                       │  └──────────┘   └────┬─────┘   └──────────┘  │
//!                       │                      │ 101                    │
//!                       │                      ▼                        │
//!                       │               ┌────────────┐                  │
//!                       │               │   tunnel   │ raw bytes        │
//!                       │               └────────────┘                  │
//!                       │  config · observability · lifecycle           │
//!                       └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use forward_relay::config::{load_config, validate_config, ConfigError, RelayConfig};
use forward_relay::lifecycle::shutdown_signal;
use forward_relay::observability::{logging, metrics};
use forward_relay::Relay;

#[derive(Parser)]
#[command(name = "forward-relay")]
#[command(about = "Forward HTTP and WebSocket traffic to a fixed upstream", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file.
    #[arg(short, long)]
    listen: Option<String>,

    /// Upstream host:port, overrides the config file.
    #[arg(short, long)]
    upstream: Option<String>,
}

fn resolve_config(cli: Cli) -> Result<RelayConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => RelayConfig::default(),
    };

    if let Some(listen) = cli.listen {
        config.listener.bind_address = listen;
    }
    if let Some(upstream) = cli.upstream {
        config.upstream.address = upstream;
    }

    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = resolve_config(Cli::parse())?;

    logging::init_logging(&config.observability);

    tracing::info!("forward-relay v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.address,
        connect_timeout_secs = config.timeouts.connect_secs,
        idle_timeout_secs = config.timeouts.idle_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let relay = Relay::bind(config).await?;
    let handle = relay.start();

    shutdown_signal().await;
    handle.stop().await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
