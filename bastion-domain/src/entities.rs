//! Domain Entities for Bastion
//!
//! Core business entities with lifecycle management.

use crate::value_objects::{DomainError, OrderSide, Price, Quantity, Symbol};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Correlation id for one round trip (entry → exit)
pub type TradeId = Uuid;

// =============================================================================
// Position
// =============================================================================

/// Position represents one open spot exposure in one instrument.
///
/// Key concepts:
/// - `stop_price` is always populated while the position exists
/// - `protection_order_id` is the exchange order currently guarding it
/// - `unprotected_since` doubles as the persisted "retry protection" flag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Instrument held
    pub symbol: Symbol,
    /// Base quantity held, rounded to the exchange step
    pub quantity: Quantity,
    /// Average fill price of the entry
    pub entry_price: Price,
    /// Current protective stop; only ever raised
    pub stop_price: Price,
    /// Exit level above entry, if configured
    pub take_profit_price: Option<Price>,

    // Exchange-side protection
    /// Exchange id of the order guarding the position
    pub protection_order_id: Option<String>,
    /// Type of that order
    pub protection_kind: Option<ProtectionKind>,
    /// When the current protection order was accepted
    pub protected_at: Option<DateTime<Utc>>,
    /// Set while no protection order is live
    pub unprotected_since: Option<DateTime<Utc>>,

    // Audit
    /// Correlation id shared by the entry and exit
    pub trade_id: TradeId,
    /// When the entry filled
    pub opened_at: DateTime<Utc>,
    /// True when rebuilt from exchange state instead of an observed fill
    #[serde(default)]
    pub reconstructed: bool,
}

impl Position {
    /// Create a freshly filled, not yet protected position
    pub fn open(
        symbol: Symbol,
        quantity: Quantity,
        entry_price: Price,
        stop_price: Price,
        take_profit_price: Option<Price>,
    ) -> Self {
        let now = Utc::now();
        Self {
            symbol,
            quantity,
            entry_price,
            stop_price,
            take_profit_price,
            protection_order_id: None,
            protection_kind: None,
            protected_at: None,
            unprotected_since: Some(now),
            trade_id: Uuid::now_v7(),
            opened_at: now,
            reconstructed: false,
        }
    }

    /// Current lifecycle phase derived from the persisted fields
    pub fn phase(&self) -> LifecyclePhase {
        if self.is_protected() {
            LifecyclePhase::HoldingProtected
        } else {
            LifecyclePhase::HoldingUnprotected
        }
    }

    /// Check if an exchange protection order is currently tracked
    pub fn is_protected(&self) -> bool {
        self.protection_order_id.is_some()
    }

    /// Record the protection order that now guards this position
    pub fn mark_protected(&mut self, order_id: String, kind: ProtectionKind, stop_price: Price) {
        self.protection_order_id = Some(order_id);
        self.protection_kind = Some(kind);
        self.stop_price = stop_price;
        self.protected_at = Some(Utc::now());
        self.unprotected_since = None;
    }

    /// Drop the tracked protection order (it was cancelled or could not be replaced)
    ///
    /// Keeps the earliest `unprotected_since` so the repair window is measured
    /// from when protection was first lost.
    pub fn mark_unprotected(&mut self) {
        self.protection_order_id = None;
        self.protection_kind = None;
        self.protected_at = None;
        if self.unprotected_since.is_none() {
            self.unprotected_since = Some(Utc::now());
        }
    }

    /// Notional value at entry
    pub fn entry_notional(&self) -> Decimal {
        self.quantity.notional_at(self.entry_price)
    }

    /// P&L if the whole position is sold at `price`
    pub fn pnl_at(&self, price: Price) -> Decimal {
        (price.as_decimal() - self.entry_price.as_decimal()) * self.quantity.as_decimal()
    }

    /// Check if `price` has reached the take-profit level
    pub fn take_profit_reached(&self, price: Price) -> bool {
        self.take_profit_price.map(|tp| price >= tp).unwrap_or(false)
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

/// Position lifecycle state machine
///
/// ```text
/// Flat → Entering → Holding(Unprotected) → Holding(Protected) → Exiting → Flat
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    /// No exposure in the instrument
    Flat,
    /// Entry order submitted, waiting for fill
    Entering,
    /// Filled, no active protection order
    HoldingUnprotected,
    /// Filled and guarded by exactly one protection order
    HoldingProtected,
    /// Exit in progress
    Exiting,
}

impl LifecyclePhase {
    /// Get the name of the phase for display
    pub fn name(&self) -> &'static str {
        match self {
            LifecyclePhase::Flat => "flat",
            LifecyclePhase::Entering => "entering",
            LifecyclePhase::HoldingUnprotected => "holding_unprotected",
            LifecyclePhase::HoldingProtected => "holding_protected",
            LifecyclePhase::Exiting => "exiting",
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a position was exited
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Sell intent from the signal source
    Signal,
    /// Take-profit level reached
    TakeProfit,
    /// Protection order filled on the exchange
    ProtectionFilled,
    /// Price at or through the stop while the protection order had not filled
    StopBreached,
    /// Balance gone while the process was down
    Reconciled,
}

// =============================================================================
// Trade Intent
// =============================================================================

/// Trade decision handed over by the signal source
///
/// The engine does not interpret confidence beyond gating on a minimum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeIntent {
    /// Unique id, echoed back by the API
    pub intent_id: Uuid,
    /// Buy to enter, sell to exit
    pub side: OrderSide,
    /// Signal strength in [0, 1]
    pub confidence: Decimal,
    /// When the intent was accepted
    pub received_at: DateTime<Utc>,
}

impl TradeIntent {
    /// Create a validated intent
    ///
    /// # Errors
    /// Returns `DomainError::InvalidConfidence` unless 0 <= confidence <= 1
    pub fn new(side: OrderSide, confidence: Decimal) -> Result<Self, DomainError> {
        if confidence < Decimal::ZERO || confidence > Decimal::ONE {
            return Err(DomainError::InvalidConfidence(format!(
                "Confidence must be within [0, 1], got {}",
                confidence
            )));
        }
        Ok(Self {
            intent_id: Uuid::now_v7(),
            side,
            confidence,
            received_at: Utc::now(),
        })
    }
}

// =============================================================================
// Protection
// =============================================================================

/// Exchange order types usable as downside protection, in no particular order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionKind {
    /// Stop-market that trails price by a fixed delta
    TrailingStopMarket,
    /// Stop that becomes a market order at the stop price
    StopMarket,
    /// Stop that becomes a limit order slightly through the stop price
    StopLimit,
}

impl ProtectionKind {
    /// Default fallback chain, highest priority first
    pub const DEFAULT_ORDER: [ProtectionKind; 3] = [
        ProtectionKind::TrailingStopMarket,
        ProtectionKind::StopMarket,
        ProtectionKind::StopLimit,
    ];

    /// Config/display name
    pub fn name(&self) -> &'static str {
        match self {
            ProtectionKind::TrailingStopMarket => "trailing_stop_market",
            ProtectionKind::StopMarket => "stop_market",
            ProtectionKind::StopLimit => "stop_limit",
        }
    }
}

impl fmt::Display for ProtectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProtectionKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trailing" | "trailing_stop" | "trailing_stop_market" => {
                Ok(ProtectionKind::TrailingStopMarket)
            },
            "stop" | "stop_market" | "stop_loss" => Ok(ProtectionKind::StopMarket),
            "stop_limit" | "stop_loss_limit" => Ok(ProtectionKind::StopLimit),
            other => Err(DomainError::InvalidProtectionKind(other.to_string())),
        }
    }
}

/// One step of the protection fallback chain. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProtectionAttempt {
    /// Order type tried
    pub kind: ProtectionKind,
    /// Set once the candidate was sent to the exchange
    pub client_order_id: Option<String>,
    /// Trigger price, absent for trailing orders
    pub stop_price: Option<Price>,
    /// Limit price for stop-limit orders
    pub limit_price: Option<Price>,
    /// Trailing distance in basis points
    pub trailing_delta_bips: Option<u32>,
    /// What the exchange said
    pub outcome: AttemptOutcome,
    /// When the attempt was made
    pub attempted_at: DateTime<Utc>,
}

impl ProtectionAttempt {
    /// Check if the exchange accepted this attempt
    pub fn is_accepted(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Accepted { .. })
    }
}

/// Result of one protection attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Order is live on the exchange
    Accepted {
        /// Exchange order id
        order_id: String,
    },
    /// Parameters refused (unsupported type, filter, min notional)
    Rejected {
        /// Exchange or local rejection message
        reason: String,
    },
    /// Call failed for another reason (retries exhausted, unknown outcome)
    Error {
        /// Last error seen
        reason: String,
    },
}

// =============================================================================
// Tests
// =============================================================================
