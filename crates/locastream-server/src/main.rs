//! # locastream
//!
//! Realtime location streaming server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! locastream
//!
//! # Run with environment variables
//! LOCASTREAM_PORT=8080 LOCASTREAM_HOST=0.0.0.0 locastream
//!
//! # Override any setting, e.g. stop echoing samples to their producer
//! LOCASTREAM__HUB__ECHO_TO_SENDER=false locastream
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "locastream=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!(
        "Starting locastream server on {}:{}",
        config.host,
        config.port
    );

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
