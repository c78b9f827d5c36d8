//! Execution layer error types.

use thiserror::Error;

/// Errors that can occur during execution operations.
#[derive(Debug, Clone, Error)]
pub enum ExecError {
    /// Transport failure before a response arrived
    #[error("Network error: {0}")]
    Network(String),

    /// Call did not complete within the configured bound
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Exchange asked us to slow down
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Exchange-side 5xx
    #[error("Server error {status}: {message}")]
    Server {
        /// HTTP status
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// Exchange refused the parameters (order type, filters, notional)
    #[error("Order rejected ({code}): {message}")]
    Rejected {
        /// Exchange error code
        code: i64,
        /// Exchange error message
        message: String,
    },

    /// Any other error reported by the exchange
    #[error("Remote error ({code}): {message}")]
    Remote {
        /// Exchange error code
        code: i64,
        /// Exchange error message
        message: String,
    },

    /// Order or resource does not exist on the exchange
    #[error("Not found: {0}")]
    NotFound(String),

    /// Order placement timed out and reconciliation could not resolve it
    #[error("Unknown outcome for order {client_order_id}")]
    UnknownOutcome {
        /// Client order id used for the placement
        client_order_id: String,
    },

    /// Response could not be interpreted
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Domain error
    #[error("Domain error: {0}")]
    Domain(#[from] bastion_domain::DomainError),

    /// Engine error
    #[error("Engine error: {0}")]
    Engine(#[from] bastion_engine::EngineError),
}

impl ExecError {
    /// Map an exchange `{code, message}` pair to the matching variant.
    pub fn from_remote(code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            // TOO_MANY_REQUESTS, TOO_MANY_ORDERS
            -1003 | -1015 => ExecError::RateLimited(message),
            // UNKNOWN, DISCONNECTED, TIMEOUT, timestamp outside recvWindow
            -1000 | -1001 | -1007 | -1021 => ExecError::Remote { code, message },
            // NO_SUCH_ORDER
            -2013 => ExecError::NotFound(message),
            // CANCEL_REJECTED with unknown order
            -2011 if message.to_lowercase().contains("unknown order") => {
                ExecError::NotFound(message)
            },
            // filter failures, bad parameters, NEW_ORDER_REJECTED
            -1013 | -2010 | -1199..=-1100 => ExecError::Rejected { code, message },
            _ => ExecError::Remote { code, message },
        }
    }

    /// Check if the failure is worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            ExecError::Network(_) | ExecError::Timeout(_) | ExecError::RateLimited(_) => true,
            ExecError::Server { .. } => true,
            ExecError::Remote { code, .. } => matches!(code, -1000 | -1001 | -1007 | -1021),
            _ => false,
        }
    }

    /// Check if the exchange refused the parameters.
    ///
    /// A rejection advances the protection fallback chain.
    pub fn is_rejection(&self) -> bool {
        matches!(self, ExecError::Rejected { .. })
    }
}

/// Result type for execution operations.
pub type ExecResult<T> = Result<T, ExecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_code_mapping() {
        assert!(matches!(ExecError::from_remote(-1003, "slow down"), ExecError::RateLimited(_)));
        assert!(ExecError::from_remote(-2010, "Stop price would trigger").is_rejection());
        assert!(ExecError::from_remote(-1013, "Filter failure: NOTIONAL").is_rejection());
        assert!(ExecError::from_remote(-1116, "Invalid orderType").is_rejection());
        assert!(matches!(ExecError::from_remote(-2013, "Order does not exist"), ExecError::NotFound(_)));
        assert!(matches!(
            ExecError::from_remote(-2011, "Unknown order sent."),
            ExecError::NotFound(_)
        ));
    }

    #[test]
    fn test_transient_classification() {
        assert!(ExecError::Network("reset".into()).is_transient());
        assert!(ExecError::Timeout("10s".into()).is_transient());
        assert!(ExecError::from_remote(-1003, "slow down").is_transient());
        assert!(ExecError::from_remote(-1001, "disconnected").is_transient());
        assert!(ExecError::Server {
            status: 503,
            message: "unavailable".into()
        }
        .is_transient());

        assert!(!ExecError::from_remote(-2010, "rejected").is_transient());
        assert!(!ExecError::from_remote(-2015, "Invalid API-key").is_transient());
        assert!(!ExecError::NotFound("x".into()).is_transient());
    }
}
