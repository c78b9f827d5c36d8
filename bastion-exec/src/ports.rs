//! Execution layer port definitions.
//!
//! Ports define the interfaces for external collaborators (exchange, alerts,
//! signals). Adapters implement these ports for specific services (Binance
//! spot, stub, tracing, etc.).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use bastion_domain::{OrderSide, Price, ProtectionKind, Quantity, Symbol, TradeIntent};
use bastion_engine::ProtectionPlan;

use crate::error::ExecResult;

// =============================================================================
// Exchange Port
// =============================================================================

/// Port for spot exchange operations.
///
/// Implementations:
/// - `StubExchange` - For testing (in-memory order book and balances)
/// - `BinanceSpotClient` - Real Binance spot REST API
///
/// Every remote failure surfaces as an `ExecError` carrying the
/// exchange's `{code, message}` where one exists.
#[async_trait]
pub trait ExchangePort: Send + Sync {
    /// Free and locked balances for every asset held.
    async fn fetch_balance(&self) -> ExecResult<AccountBalances>;

    /// Last traded price for a symbol.
    async fn fetch_ticker(&self, symbol: &Symbol) -> ExecResult<Ticker>;

    /// All open orders for a symbol.
    async fn fetch_open_orders(&self, symbol: &Symbol) -> ExecResult<Vec<ExchangeOrder>>;

    /// Place an order.
    ///
    /// The request's `client_order_id` makes the placement idempotent
    /// and lets a timed-out placement be looked up afterwards.
    async fn create_order(&self, request: &OrderRequest) -> ExecResult<ExchangeOrder>;

    /// Cancel an open order by exchange id.
    async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> ExecResult<()>;

    /// Look up an order by client order id. `Ok(None)` when it never reached the book.
    async fn fetch_order(
        &self,
        symbol: &Symbol,
        client_order_id: &str,
    ) -> ExecResult<Option<ExchangeOrder>>;
}

/// Generate a client order id: `prefix` + 32 hex chars of a v7 UUID.
///
/// Binance caps client ids at 36 characters, so prefixes stay short.
pub fn new_client_order_id(prefix: &str) -> String {
    format!("{}{}", prefix, Uuid::now_v7().simple())
}

// =============================================================================
// Orders
// =============================================================================

/// Spot order type with its type-specific parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit { limit_price: Price },
    StopMarket { stop_price: Price },
    StopLimit { stop_price: Price, limit_price: Price },
    TrailingStopMarket { trailing_delta_bips: u32 },
    /// Any type this engine never places (take-profit, OCO legs, ...)
    Other,
}

impl OrderType {
    /// Check if this is a stop-type order
    pub fn is_stop(&self) -> bool {
        matches!(
            self,
            OrderType::StopMarket { .. }
                | OrderType::StopLimit { .. }
                | OrderType::TrailingStopMarket { .. }
        )
    }

    /// Protection kind this order type implements, if any
    pub fn protection_kind(&self) -> Option<ProtectionKind> {
        match self {
            OrderType::StopMarket { .. } => Some(ProtectionKind::StopMarket),
            OrderType::StopLimit { .. } => Some(ProtectionKind::StopLimit),
            OrderType::TrailingStopMarket { .. } => Some(ProtectionKind::TrailingStopMarket),
            _ => None,
        }
    }

    /// Trigger price, when the type carries one
    pub fn stop_price(&self) -> Option<Price> {
        match self {
            OrderType::StopMarket { stop_price } | OrderType::StopLimit { stop_price, .. } => {
                Some(*stop_price)
            },
            _ => None,
        }
    }
}

/// How much to trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderAmount {
    /// Base asset quantity
    Base(Quantity),
    /// Quote amount to spend (market buys only)
    Quote(Decimal),
}

/// Order placement request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub amount: OrderAmount,
    pub client_order_id: String,
}

impl OrderRequest {
    /// Market buy spending `notional` of the quote asset
    pub fn market_buy_quote(symbol: Symbol, notional: Decimal, client_order_id: String) -> Self {
        Self {
            symbol,
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            amount: OrderAmount::Quote(notional),
            client_order_id,
        }
    }

    /// Market sell of `quantity` base asset
    pub fn market_sell(symbol: Symbol, quantity: Quantity, client_order_id: String) -> Self {
        Self {
            symbol,
            side: OrderSide::Sell,
            order_type: OrderType::Market,
            amount: OrderAmount::Base(quantity),
            client_order_id,
        }
    }

    /// Sell-side protection order from an engine plan
    pub fn protection(symbol: Symbol, plan: &ProtectionPlan, client_order_id: String) -> Self {
        let order_type = match (plan.kind, plan.limit_price, plan.trailing_delta_bips) {
            (ProtectionKind::TrailingStopMarket, _, Some(trailing_delta_bips)) => {
                OrderType::TrailingStopMarket { trailing_delta_bips }
            },
            (ProtectionKind::StopLimit, Some(limit_price), _) => OrderType::StopLimit {
                stop_price: plan.stop_price,
                limit_price,
            },
            _ => OrderType::StopMarket {
                stop_price: plan.stop_price,
            },
        };

        Self {
            symbol,
            side: OrderSide::Sell,
            order_type,
            amount: OrderAmount::Base(plan.quantity),
            client_order_id,
        }
    }
}

/// Exchange order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    /// Check if the order still rests on the book
    pub fn is_open(&self) -> bool {
        matches!(self, OrderStatus::New | OrderStatus::PartiallyFilled)
    }
}

/// Order as reported by the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeOrder {
    /// Exchange-assigned order ID
    pub order_id: String,
    /// Client-provided order ID (for idempotency)
    pub client_order_id: String,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub orig_quantity: Decimal,
    pub executed_quantity: Decimal,
    /// Quote spent or received so far
    pub cumulative_quote: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl ExchangeOrder {
    /// Average fill price, when anything executed
    pub fn average_price(&self) -> Option<Price> {
        if self.executed_quantity.is_zero() {
            return None;
        }
        Price::new(self.cumulative_quote / self.executed_quantity).ok()
    }

    /// Executed base quantity, when anything executed
    pub fn filled_quantity(&self) -> Option<Quantity> {
        Quantity::new(self.executed_quantity).ok()
    }
}

// =============================================================================
// Account and Market Snapshots
// =============================================================================

/// Balance of one asset.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

impl Balance {
    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }
}

/// Balances keyed by asset.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccountBalances {
    pub balances: HashMap<String, Balance>,
}

impl AccountBalances {
    /// Free amount of `asset`, zero when absent
    pub fn free(&self, asset: &str) -> Decimal {
        self.balances.get(asset).map(|b| b.free).unwrap_or(Decimal::ZERO)
    }

    /// Free plus locked amount of `asset`, zero when absent
    pub fn total(&self, asset: &str) -> Decimal {
        self.balances.get(asset).map(Balance::total).unwrap_or(Decimal::ZERO)
    }
}

/// Price snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: Symbol,
    pub price: Price,
    pub observed_at: DateTime<Utc>,
}

// =============================================================================
// Alert Sink
// =============================================================================

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

/// What the alert is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Every protection candidate failed for an open position
    UnprotectedPosition,
    /// Exchange state shows exposure the store did not track
    UntrackedPosition,
    /// Non-retryable failure that needs an operator
    PermanentFailure,
}

/// Operator-facing event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub kind: AlertKind,
    pub symbol: Option<Symbol>,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    /// Critical alert for a symbol
    pub fn critical(kind: AlertKind, symbol: &Symbol, message: impl Into<String>) -> Self {
        Self {
            severity: AlertSeverity::Critical,
            kind,
            symbol: Some(symbol.clone()),
            message: message.into(),
            raised_at: Utc::now(),
        }
    }

    /// Warning alert for a symbol
    pub fn warning(kind: AlertKind, symbol: &Symbol, message: impl Into<String>) -> Self {
        Self {
            severity: AlertSeverity::Warning,
            ..Self::critical(kind, symbol, message)
        }
    }
}

/// Port for delivering alerts (pager, chat, log).
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Deliver an alert. Delivery failures are the sink's concern.
    async fn alert(&self, alert: Alert);
}

// =============================================================================
// Signal Source
// =============================================================================

/// Port for trade intents produced by the strategy layer.
#[async_trait]
pub trait SignalSource: Send + Sync {
    /// Next pending intent for `symbol`, if any.
    async fn next_intent(&self, symbol: &Symbol) -> Option<TradeIntent>;
}

// =============================================================================
// Tests
// =============================================================================
