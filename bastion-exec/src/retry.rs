//! Bounded retries for exchange calls.
//!
//! Every call gets a timeout. Transient failures are retried with
//! exponential backoff (base, 2×base, 4×base, ...) up to a fixed number
//! of attempts. Order placement is special: a failed or timed-out
//! placement is looked up by client order id before it is retried, so a
//! request the exchange already accepted is never sent twice.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{ExecError, ExecResult};
use crate::ports::{ExchangeOrder, ExchangePort, OrderRequest};

/// Retry/backoff/timeout limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Bound on a single exchange call
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(8),
            call_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Policy without delays, for tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            call_timeout: Duration::from_secs(5),
        }
    }

    /// Backoff before `attempt` (1-based). No delay before the first.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let shift = (attempt - 2).min(16);
        self.base_delay.saturating_mul(1u32 << shift).min(self.max_delay)
    }

    /// Run one call bounded by `call_timeout`.
    pub async fn bounded<T, Fut>(&self, operation: &str, call: Fut) -> ExecResult<T>
    where
        Fut: Future<Output = ExecResult<T>>,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ExecError::Timeout(format!(
                "{} exceeded {:?}",
                operation, self.call_timeout
            ))),
        }
    }

    /// Run a read-only or idempotent call, retrying transient failures.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> ExecResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ExecResult<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let delay = self.delay_for(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match self.bounded(operation, call()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(operation, attempt, error = %e, "Transient failure, retrying");
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Place an order, resolving unknown outcomes by client order id.
    ///
    /// Returns `ExecError::UnknownOutcome` when every attempt failed
    /// transiently and the order could not be found or ruled out.
    pub async fn submit(
        &self,
        exchange: &dyn ExchangePort,
        request: &OrderRequest,
    ) -> ExecResult<ExchangeOrder> {
        let attempts = self.max_attempts.max(1);
        let cid = request.client_order_id.as_str();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let delay = self.delay_for(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let error = match self.bounded("create_order", exchange.create_order(request)).await {
                Ok(order) => return Ok(order),
                Err(e) if e.is_transient() => e,
                Err(e) => return Err(e),
            };

            warn!(
                client_order_id = cid,
                attempt,
                error = %error,
                "Order placement outcome unknown, reconciling"
            );

            let lookup = self
                .bounded("fetch_order", exchange.fetch_order(&request.symbol, cid))
                .await;
            match lookup {
                Ok(Some(order)) => {
                    debug!(client_order_id = cid, order_id = %order.order_id, "Order found after failure");
                    return Ok(order);
                },
                Ok(None) if attempt < attempts => {
                    debug!(client_order_id = cid, "Order not on exchange, resubmitting");
                },
                Ok(None) => return Err(error),
                Err(e) if attempt < attempts => {
                    warn!(client_order_id = cid, error = %e, "Reconciliation read failed");
                },
                Err(_) => {
                    return Err(ExecError::UnknownOutcome {
                        client_order_id: cid.to_string(),
                    })
                },
            }
        }
    }
}
