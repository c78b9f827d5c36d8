//! Bastion Daemon Library
//!
//! Runtime orchestrator for the position protection and sizing engine.
//!
//! # Architecture
//!
//! ```text
//! API (intents) → Signal Queue → Lifecycle Controller → Exchange
//!                                       │
//!                              Sizing / Protection
//!                                       │
//!                                  State Book → state.json
//! ```
//!
//! # Components
//!
//! - **Daemon**: tick loop, startup reconciliation, shutdown
//! - **Lifecycle Controller**: Flat → Entering → Holding → Exiting per symbol
//! - **API**: HTTP endpoints for status and intents
//! - **Config**: Environment-based configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use bastiond::{Config, Daemon};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     Daemon::from_config(config)?.run().await?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod daemon;
pub mod error;
pub mod lifecycle;

// Re-exports for convenience
pub use config::{ApiConfig, Config, EngineConfig, Environment, ExchangeConfig, LogFormat, StoreConfig};
pub use daemon::Daemon;
pub use error::{DaemonError, DaemonResult};
pub use lifecycle::{CycleOutcome, LifecycleController, LifecycleSettings, ReconcileReport};
