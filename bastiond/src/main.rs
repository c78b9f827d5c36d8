//! Bastion Daemon
//!
//! Runtime orchestrator for sizing, protection, and the API server.
//!
//! # Usage
//!
//! ```bash
//! # Dry run against the stub exchange
//! BASTION_ENV=test cargo run -p bastiond
//!
//! # Binance testnet
//! BINANCE_API_KEY=... BINANCE_API_SECRET=... BINANCE_TESTNET=true cargo run -p bastiond
//! ```
//!
//! # Environment Variables
//!
//! - `BASTION_ENV`: Environment (test, development, production)
//! - `BASTION_API_HOST` / `BASTION_API_PORT`: API bind address
//! - `BASTION_SYMBOLS`: Comma-separated pairs (default: BTCUSDT)
//! - `BASTION_STATE_PATH`: State document path (default: data/state.json)
//! - `BASTION_LOG_FORMAT`: `text` or `json`
//! - `RUST_LOG`: Log filter

use bastiond::{Config, Daemon, LogFormat};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first: it decides the log format
    let config = Config::from_env()?;

    let filter = EnvFilter::from_default_env().add_directive("bastiond=info".parse()?);
    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::registry().with(fmt::layer()).with(filter).init(),
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        api_host = %config.api.host,
        api_port = config.api.port,
        "Bastion daemon"
    );

    Daemon::from_config(config)?.run().await?;

    Ok(())
}
