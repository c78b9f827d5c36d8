//! Bastion Execution Layer
//!
//! Exchange-facing side of the engine: ports, retries and the protection
//! order manager.
//!
//! # Architecture
//!
//! ```text
//! Engine plan → ProtectionManager → RetryPolicy → ExchangePort
//!                      ↓
//!                  AlertSink
//! ```
//!
//! # Components
//!
//! - **Ports**: Traits for the exchange, alert sink and signal source
//! - **Retry**: Timeouts, exponential backoff, unknown-outcome reconciliation
//! - **Protection**: Cleanup-then-place fallback chain for stop orders
//! - **Stub**: In-memory exchange for tests and dry runs
//!
//! # Example
//!
//! ```rust,ignore
//! use bastion_exec::{ProtectionManager, RetryPolicy, StubExchange, TracingAlerts};
//! use std::sync::Arc;
//!
//! let exchange = Arc::new(StubExchange::new());
//! let manager = ProtectionManager::new(
//!     exchange,
//!     Arc::new(TracingAlerts),
//!     ProtectionPolicy::default(),
//!     RetryPolicy::default(),
//! );
//!
//! let report = manager.protect(&position, current_price).await;
//! ```

#![warn(clippy::all)]

pub mod alerts;
pub mod error;
pub mod ports;
pub mod protection;
pub mod retry;
pub mod signals;
pub mod stub;

// Re-exports for convenience
pub use alerts::{FanoutAlerts, RecordingAlerts, TracingAlerts, DEFAULT_ALERT_HISTORY};
pub use error::{ExecError, ExecResult};
pub use ports::{
    new_client_order_id, AccountBalances, Alert, AlertKind, AlertSeverity, AlertSink, Balance,
    ExchangeOrder, ExchangePort, OrderAmount, OrderRequest, OrderStatus, OrderType, SignalSource,
    Ticker,
};
pub use protection::{
    CleanupReport, PlacedProtection, ProtectionManager, ProtectionReport, PROTECTION_TAG,
};
pub use retry::RetryPolicy;
pub use signals::QueuedSignals;
pub use stub::StubExchange;
