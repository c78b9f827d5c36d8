//! Bastion Exchange Connectors
//!
//! Adapters for exchange APIs.
//! Normalizes exchange-specific types to the execution layer's port types.

#![warn(clippy::all)]

// Public modules
pub mod binance_rest;

// Re-exports
pub use binance_rest::{BinanceRestError, BinanceSpotClient};
