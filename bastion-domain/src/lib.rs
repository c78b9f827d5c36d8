//! Bastion Domain Layer
//!
//! Pure domain logic with zero I/O dependencies.
//! Contains entities, value objects, and statistics rules.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Public modules
pub mod entities;
pub mod statistics;
pub mod value_objects;

// Re-export commonly used types
pub use entities::{
    AttemptOutcome, ExitReason, LifecyclePhase, Position, ProtectionAttempt, ProtectionKind,
    TradeId, TradeIntent,
};
pub use statistics::{TradeOutcome, TradingStatistics};
pub use value_objects::{DomainError, OrderSide, Price, Quantity, Symbol};
