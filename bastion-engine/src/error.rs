//! Engine error types.

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors produced by the pure decision layer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Policy tables or percentages are inconsistent
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    /// Order value falls under the exchange minimum
    #[error("Notional {notional} below minimum {minimum}")]
    BelowMinNotional {
        /// Computed order value
        notional: Decimal,
        /// Configured minimum
        minimum: Decimal,
    },

    /// A stop at this level would fire immediately
    #[error("Stop {stop} is not below market {market}")]
    StopWouldTrigger {
        /// Planned stop price
        stop: Decimal,
        /// Current market price
        market: Decimal,
    },

    /// Domain error
    #[error("Domain error: {0}")]
    Domain(#[from] bastion_domain::DomainError),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
