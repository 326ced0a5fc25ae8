//! # Tether Server
//!
//! Hosts one channel bridge per consumer session behind a local WebSocket
//! endpoint. Consumers speak JSON boundary messages; each bridge speaks the
//! channel protocol to the upstream server the consumer connects it to.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! tether
//!
//! # Run with a specific config file
//! TETHER_CONFIG=/path/to/tether.toml tether
//!
//! # Run with environment variables
//! TETHER_PORT=8080 TETHER_BRIDGE__PUSH_TIMEOUT_MS=5000 tether
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tether=debug,tether_transport=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    tracing::info!("Starting Tether server on {}:{}", config.host, config.port);

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
