//! Storage layer errors

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Document written by a newer schema
    #[error("Unsupported state version {found} (supported: {supported})")]
    UnsupportedVersion {
        /// Version found on disk
        found: u32,
        /// Highest version this build reads
        supported: u32,
    },

    /// Document on disk could not be read
    #[error("Corrupt state file {path}: {reason}")]
    Corrupt {
        /// File that failed to parse
        path: PathBuf,
        /// Parser message
        reason: String,
    },

    /// Invalid state transition
    #[error("Invalid state transition: {message}")]
    InvalidState {
        /// Description of the invalid transition
        message: String,
    },

    /// Domain error passthrough
    #[error("Domain error: {0}")]
    Domain(#[from] bastion_domain::DomainError),
}

impl StoreError {
    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;
