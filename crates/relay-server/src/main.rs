//! # Relay Server
//!
//! Presence registry and realtime message relay.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! JWT_SECRET_KEY=change-me relay
//!
//! # Run with custom config
//! relay --config /path/to/relay.toml
//!
//! # Run with environment variables
//! RELAY_PORT=8080 RELAY_HOST=0.0.0.0 CLIENT_URL=http://localhost:3000 relay
//! ```

use anyhow::{bail, Result};
use relay_server::{metrics, run_server, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "relay=debug,relay_core=debug,relay_server=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match config_path(std::env::args().skip(1))? {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };

    tracing::info!("Starting relay server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    run_server(config).await?;

    Ok(())
}

/// Extract the `--config <path>` argument, if any.
fn config_path(mut args: impl Iterator<Item = String>) -> Result<Option<String>> {
    let mut path = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => match args.next() {
                Some(value) => path = Some(value),
                None => bail!("--config requires a path"),
            },
            other => {
                if let Some(value) = other.strip_prefix("--config=") {
                    path = Some(value.to_string());
                } else {
                    bail!("Unknown argument: {other}");
                }
            }
        }
    }
    Ok(path)
}
