//! Daemon error types.

use bastion_domain::{DomainError, Symbol};
use bastion_engine::EngineError;
use bastion_exec::ExecError;
use bastion_store::StoreError;
use rust_decimal::Decimal;
use thiserror::Error;

/// Daemon-level errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Domain error
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Engine error
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Execution error
    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Symbol is not in the configured trading universe
    #[error("Symbol not configured: {0}")]
    UnknownSymbol(String),

    /// Entry order returned without any executed quantity
    #[error("Entry for {symbol} did not fill")]
    EntryNotFilled { symbol: Symbol },

    /// Exit left base on the account; the position stays tracked
    #[error("Exit of {symbol} incomplete, {remaining} still held")]
    ExitIncomplete { symbol: Symbol, remaining: Decimal },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
