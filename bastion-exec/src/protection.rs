//! Protection Order Manager
//!
//! Keeps exactly one downside-protection order on the exchange for an open
//! position.
//!
//! # Protocol
//!
//! ```text
//! protect(position, price):
//!   1. cleanup  - cancel every open protection order for the symbol
//!                 (read failure → skip placement, report unprotected)
//!   2. place    - walk the fallback chain, first accepted candidate wins
//!   3. exhausted → one critical alert
//! ```
//!
//! Every call is a full cleanup-and-replace, so repeating it cannot leave
//! more than one protection order behind.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use bastion_domain::{AttemptOutcome, Position, Price, ProtectionAttempt, ProtectionKind, Symbol};
use bastion_engine::{plan_candidate, EngineError, ProtectionPolicy};

use crate::error::ExecResult;
use crate::ports::{
    new_client_order_id, Alert, AlertKind, AlertSink, ExchangeOrder, ExchangePort, OrderRequest,
};
use crate::retry::RetryPolicy;

/// Client order id prefix marking protection orders
pub const PROTECTION_TAG: &str = "bsp";

/// Outcome of the cleanup step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Protection orders found open
    pub found: usize,
    pub cancelled: Vec<String>,
    pub failed: Vec<String>,
}

/// The order that now protects the position
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlacedProtection {
    pub order_id: String,
    pub client_order_id: String,
    pub kind: ProtectionKind,
    pub stop_price: Price,
}

/// Result of one `protect` call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProtectionReport {
    pub symbol: Symbol,
    /// `None` when the open-order read failed and nothing was placed
    pub cleanup: Option<CleanupReport>,
    pub attempts: Vec<ProtectionAttempt>,
    pub placed: Option<PlacedProtection>,
}

impl ProtectionReport {
    pub fn is_protected(&self) -> bool {
        self.placed.is_some()
    }
}

/// Protection Order Manager
pub struct ProtectionManager {
    exchange: Arc<dyn ExchangePort>,
    alerts: Arc<dyn AlertSink>,
    policy: ProtectionPolicy,
    retry: RetryPolicy,
}

impl ProtectionManager {
    pub fn new(
        exchange: Arc<dyn ExchangePort>,
        alerts: Arc<dyn AlertSink>,
        policy: ProtectionPolicy,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            exchange,
            alerts,
            policy,
            retry,
        }
    }

    pub fn policy(&self) -> &ProtectionPolicy {
        &self.policy
    }

    /// Check if an open order counts as protection.
    ///
    /// Tagged orders and any stop-type order both count, so orders placed
    /// by an earlier process or by hand are cleaned up too.
    pub fn is_protection_order(order: &ExchangeOrder) -> bool {
        order.client_order_id.starts_with(PROTECTION_TAG) || order.order_type.is_stop()
    }

    /// Open protection orders for a symbol
    pub async fn protection_orders(&self, symbol: &Symbol) -> ExecResult<Vec<ExchangeOrder>> {
        let exchange = &self.exchange;
        let orders = self
            .retry
            .run("fetch_open_orders", move || exchange.fetch_open_orders(symbol))
            .await?;
        Ok(orders.into_iter().filter(Self::is_protection_order).collect())
    }

    /// Cancel every open protection order for `symbol`.
    ///
    /// Individual cancel failures are logged and reported, not returned.
    pub async fn cleanup(&self, symbol: &Symbol) -> ExecResult<CleanupReport> {
        let orders = self.protection_orders(symbol).await?;
        Ok(self.cancel_each(symbol, orders).await)
    }

    /// Cancel every open order for `symbol`, protection or not.
    pub async fn cancel_all(&self, symbol: &Symbol) -> ExecResult<CleanupReport> {
        let exchange = &self.exchange;
        let orders = self
            .retry
            .run("fetch_open_orders", move || exchange.fetch_open_orders(symbol))
            .await?;
        Ok(self.cancel_each(symbol, orders).await)
    }

    async fn cancel_each(&self, symbol: &Symbol, orders: Vec<ExchangeOrder>) -> CleanupReport {
        let mut report = CleanupReport {
            found: orders.len(),
            ..CleanupReport::default()
        };

        for order in orders {
            let exchange = &self.exchange;
            let order_id = order.order_id.as_str();
            match self
                .retry
                .run("cancel_order", move || exchange.cancel_order(symbol, order_id))
                .await
            {
                Ok(()) => report.cancelled.push(order.order_id),
                Err(e) => {
                    warn!(
                        symbol = %symbol.as_pair(),
                        order_id = %order.order_id,
                        error = %e,
                        "Failed to cancel order"
                    );
                    report.failed.push(order.order_id);
                },
            }
        }
        report
    }

    /// Clean up and place fresh protection for `position`.
    pub async fn protect(&self, position: &Position, current_price: Price) -> ProtectionReport {
        let symbol = &position.symbol;
        let mut report = ProtectionReport {
            symbol: symbol.clone(),
            cleanup: None,
            attempts: Vec::new(),
            placed: None,
        };

        match self.cleanup(symbol).await {
            Ok(cleanup) => report.cleanup = Some(cleanup),
            Err(e) => {
                error!(
                    symbol = %symbol.as_pair(),
                    error = %e,
                    "Cannot read open orders, skipping protection placement"
                );
                return report;
            },
        }

        for &kind in &self.policy.fallback_order {
            let attempt = self.try_candidate(kind, position, current_price).await;
            let placed = match (&attempt.outcome, attempt.stop_price) {
                (AttemptOutcome::Accepted { order_id }, Some(stop_price)) => Some(PlacedProtection {
                    order_id: order_id.clone(),
                    client_order_id: attempt.client_order_id.clone().unwrap_or_default(),
                    kind,
                    stop_price,
                }),
                _ => None,
            };
            report.attempts.push(attempt);

            if let Some(placed) = placed {
                info!(
                    symbol = %symbol.as_pair(),
                    %kind,
                    order_id = %placed.order_id,
                    stop_price = %placed.stop_price,
                    "Protection placed"
                );
                report.placed = Some(placed);
                break;
            }
        }

        if report.placed.is_none() {
            let summary = report
                .attempts
                .iter()
                .map(|a| format!("{}: {:?}", a.kind, a.outcome))
                .collect::<Vec<_>>()
                .join("; ");
            error!(symbol = %symbol.as_pair(), %summary, "All protection candidates failed");
            self.alerts
                .alert(Alert::critical(
                    AlertKind::UnprotectedPosition,
                    symbol,
                    format!("position of {} left unprotected ({})", position.quantity, summary),
                ))
                .await;
        }

        report
    }

    async fn try_candidate(
        &self,
        kind: ProtectionKind,
        position: &Position,
        current_price: Price,
    ) -> ProtectionAttempt {
        let plan = match plan_candidate(kind, position, current_price, &self.policy) {
            Ok(plan) => plan,
            Err(e) => {
                let outcome = match e {
                    EngineError::BelowMinNotional { .. } | EngineError::StopWouldTrigger { .. } => {
                        AttemptOutcome::Rejected {
                            reason: e.to_string(),
                        }
                    },
                    _ => AttemptOutcome::Error {
                        reason: e.to_string(),
                    },
                };
                warn!(symbol = %position.symbol.as_pair(), %kind, error = %e, "Candidate rejected locally");
                return ProtectionAttempt {
                    kind,
                    client_order_id: None,
                    stop_price: None,
                    limit_price: None,
                    trailing_delta_bips: None,
                    outcome,
                    attempted_at: Utc::now(),
                };
            },
        };

        let client_order_id = new_client_order_id(PROTECTION_TAG);
        let request = OrderRequest::protection(position.symbol.clone(), &plan, client_order_id.clone());

        let outcome = match self.retry.submit(self.exchange.as_ref(), &request).await {
            Ok(order) => AttemptOutcome::Accepted {
                order_id: order.order_id,
            },
            Err(e) if e.is_rejection() => {
                warn!(symbol = %position.symbol.as_pair(), %kind, error = %e, "Candidate rejected by exchange");
                AttemptOutcome::Rejected {
                    reason: e.to_string(),
                }
            },
            Err(e) => {
                warn!(symbol = %position.symbol.as_pair(), %kind, error = %e, "Candidate failed");
                AttemptOutcome::Error {
                    reason: e.to_string(),
                }
            },
        };

        ProtectionAttempt {
            kind,
            client_order_id: Some(client_order_id),
            stop_price: Some(plan.stop_price),
            limit_price: plan.limit_price,
            trailing_delta_bips: plan.trailing_delta_bips,
            outcome,
            attempted_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::RecordingAlerts;
    use crate::stub::StubExchange;
    use bastion_domain::Quantity;
    use rust_decimal_macros::dec;

    struct Fixture {
        exchange: Arc<StubExchange>,
        alerts: Arc<RecordingAlerts>,
        manager: ProtectionManager,
        position: Position,
    }

    fn fixture() -> Fixture {
        let exchange = Arc::new(StubExchange::new());
        exchange.set_price("SOLUSDT", dec!(150));
        exchange.set_balance("SOL", dec!(0.1));
        let alerts = Arc::new(RecordingAlerts::new());
        let manager = ProtectionManager::new(
            exchange.clone(),
            alerts.clone(),
            ProtectionPolicy::default(),
            RetryPolicy::immediate(2),
        );
        let position = Position::open(
            Symbol::from_pair("SOLUSDT").unwrap(),
            Quantity::new(dec!(0.1)).unwrap(),
            Price::new(dec!(150)).unwrap(),
            Price::new(dec!(147)).unwrap(),
            None,
        );
        Fixture {
            exchange,
            alerts,
            manager,
            position,
        }
    }

    fn price(value: rust_decimal::Decimal) -> Price {
        Price::new(value).unwrap()
    }

    #[tokio::test]
    async fn test_first_candidate_wins() {
        let f = fixture();

        let report = f.manager.protect(&f.position, price(dec!(150))).await;

        assert!(report.is_protected());
        assert_eq!(report.attempts.len(), 1);
        let placed = report.placed.unwrap();
        assert_eq!(placed.kind, ProtectionKind::TrailingStopMarket);
        assert!(placed.client_order_id.starts_with(PROTECTION_TAG));
        assert_eq!(f.exchange.open_orders("SOLUSDT").len(), 1);
        assert!(f.alerts.alerts().is_empty());
    }

    #[tokio::test]
    async fn test_protect_twice_leaves_one_order() {
        let f = fixture();

        let first = f.manager.protect(&f.position, price(dec!(150))).await;
        let second = f.manager.protect(&f.position, price(dec!(152))).await;

        assert!(first.is_protected());
        assert!(second.is_protected());
        assert_eq!(second.cleanup.unwrap().cancelled.len(), 1);
        let open = f.exchange.open_orders("SOLUSDT");
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].order_id, second.placed.unwrap().order_id);
    }

    #[tokio::test]
    async fn test_fallback_to_stop_market() {
        let f = fixture();
        f.exchange.reject_kind(ProtectionKind::TrailingStopMarket);

        let report = f.manager.protect(&f.position, price(dec!(150))).await;

        assert_eq!(report.attempts.len(), 2);
        assert!(matches!(report.attempts[0].outcome, AttemptOutcome::Rejected { .. }));
        assert_eq!(report.attempts[0].trailing_delta_bips, Some(150));
        assert_eq!(report.attempts[1].kind, ProtectionKind::StopMarket);
        assert!(report.attempts[1].trailing_delta_bips.is_none());
        assert_eq!(report.placed.unwrap().kind, ProtectionKind::StopMarket);
    }

    #[tokio::test]
    async fn test_all_rejected_alerts_once() {
        let f = fixture();
        for kind in ProtectionKind::DEFAULT_ORDER {
            f.exchange.reject_kind(kind);
        }

        let report = f.manager.protect(&f.position, price(dec!(150))).await;

        assert!(!report.is_protected());
        assert_eq!(report.attempts.len(), 3);
        assert_eq!(f.alerts.count(AlertKind::UnprotectedPosition), 1);
        assert!(f.exchange.open_orders("SOLUSDT").is_empty());
    }

    #[tokio::test]
    async fn test_read_failure_skips_placement() {
        let f = fixture();
        f.exchange.set_fail_open_orders(true);

        let report = f.manager.protect(&f.position, price(dec!(150))).await;

        assert!(report.cleanup.is_none());
        assert!(report.attempts.is_empty());
        assert_eq!(f.exchange.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_removes_untagged_stop_orders() {
        let f = fixture();
        f.exchange.set_balance("SOL", dec!(0.2));
        let manual = OrderRequest {
            symbol: f.position.symbol.clone(),
            side: bastion_domain::OrderSide::Sell,
            order_type: crate::ports::OrderType::StopMarket {
                stop_price: price(dec!(140)),
            },
            amount: crate::ports::OrderAmount::Base(f.position.quantity),
            client_order_id: "manual-stop".into(),
        };
        f.exchange.create_order(&manual).await.unwrap();

        let report = f.manager.protect(&f.position, price(dec!(150))).await;

        assert_eq!(report.cleanup.unwrap().found, 1);
        let open = f.exchange.open_orders("SOLUSDT");
        assert_eq!(open.len(), 1);
        assert!(open[0].client_order_id.starts_with(PROTECTION_TAG));
    }

    #[tokio::test]
    async fn test_cancel_failure_is_not_fatal() {
        let f = fixture();
        f.exchange.set_balance("SOL", dec!(0.2));
        f.manager.protect(&f.position, price(dec!(150))).await;
        f.exchange.fail_next_cancel();

        let report = f.manager.protect(&f.position, price(dec!(150))).await;

        // retry policy absorbs the single network failure
        assert_eq!(report.cleanup.as_ref().unwrap().cancelled.len(), 1);
        assert!(report.is_protected());
    }

    #[tokio::test]
    async fn test_below_min_notional_never_sent() {
        let f = fixture();
        let small = Position::open(
            f.position.symbol.clone(),
            Quantity::new(dec!(0.01)).unwrap(),
            price(dec!(150)),
            price(dec!(147)),
            None,
        );

        let report = f.manager.protect(&small, price(dec!(150))).await;

        assert!(!report.is_protected());
        assert_eq!(f.exchange.create_calls(), 0);
        assert_eq!(f.alerts.count(AlertKind::UnprotectedPosition), 1);
    }
}
