//! # Beacon Server
//!
//! Realtime messaging and presence server for the education platform.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! beacon
//!
//! # Run with environment variables
//! BEACON_PORT=8080 BEACON_HOST=0.0.0.0 beacon
//!
//! # Or drop a beacon.toml next to the binary
//! ```

mod auth;
mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beacon=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Beacon server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Sessions are announced by the auth service over /internal/sessions;
    // an optional file preload covers development setups.
    let sessions = Arc::new(auth::SessionTable::new());
    if let Ok(path) = std::env::var("BEACON_SESSIONS_FILE") {
        let count = sessions.preload_from_file(&path)?;
        tracing::info!("Preloaded {} sessions from {}", count, path);
    }

    // Start the server
    handlers::run_server(config, sessions).await?;

    Ok(())
}
