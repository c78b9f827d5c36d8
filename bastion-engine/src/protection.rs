//! Protection Planning (Pure Functions)
//!
//! Computes the parameters of each protection candidate for a position.
//! The execution layer walks the fallback chain and asks this module for
//! a fresh plan per candidate; nothing here touches the exchange.
//!
//! # Stop refresh
//!
//! ```text
//! candidate = round_down(current_price * (1 - stop_loss_pct))
//! stop      = max(position.stop_price, candidate)
//! ```
//!
//! The stop is monotonic: a falling market never lowers it.

use crate::error::{EngineError, EngineResult};
use bastion_domain::{Position, Price, ProtectionKind, Quantity};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Exchange limits for trailing delta, in basis points
pub const MIN_TRAILING_DELTA_BIPS: u32 = 10;
pub const MAX_TRAILING_DELTA_BIPS: u32 = 2000;

/// Configuration for downside protection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectionPolicy {
    /// Candidate kinds, highest priority first
    pub fallback_order: Vec<ProtectionKind>,
    /// Stop distance below price (0.02 = 2%)
    pub stop_loss_pct: Decimal,
    /// Take-profit distance above entry, zero disables it
    pub take_profit_pct: Decimal,
    /// Trailing distance, independent of `stop_loss_pct`
    pub trailing_delta_pct: Decimal,
    /// Stop-limit limit price offset below the stop
    pub limit_offset_pct: Decimal,
    /// Exchange minimum order value in quote currency
    pub min_notional: Decimal,
    pub quantity_precision: u32,
    pub price_precision: u32,
}

impl Default for ProtectionPolicy {
    fn default() -> Self {
        Self {
            fallback_order: ProtectionKind::DEFAULT_ORDER.to_vec(),
            stop_loss_pct: dec!(0.02),
            take_profit_pct: dec!(0.04),
            trailing_delta_pct: dec!(0.015),
            limit_offset_pct: dec!(0.002),
            min_notional: dec!(5),
            quantity_precision: 5,
            price_precision: 2,
        }
    }
}

impl ProtectionPolicy {
    /// Check percentages and fallback order
    pub fn validate(&self) -> EngineResult<()> {
        if self.fallback_order.is_empty() {
            return Err(EngineError::InvalidPolicy("fallback order is empty".into()));
        }
        for (i, kind) in self.fallback_order.iter().enumerate() {
            if self.fallback_order[..i].contains(kind) {
                return Err(EngineError::InvalidPolicy(format!("{} listed twice", kind)));
            }
        }
        let in_unit = |pct: Decimal| pct > Decimal::ZERO && pct < Decimal::ONE;
        if !in_unit(self.stop_loss_pct) {
            return Err(EngineError::InvalidPolicy(format!(
                "stop loss percent {} must be within (0, 1)",
                self.stop_loss_pct
            )));
        }
        if !in_unit(self.trailing_delta_pct) {
            return Err(EngineError::InvalidPolicy(format!(
                "trailing delta percent {} must be within (0, 1)",
                self.trailing_delta_pct
            )));
        }
        if self.limit_offset_pct < Decimal::ZERO || self.limit_offset_pct >= Decimal::ONE {
            return Err(EngineError::InvalidPolicy(format!(
                "limit offset percent {} must be within [0, 1)",
                self.limit_offset_pct
            )));
        }
        if self.take_profit_pct < Decimal::ZERO {
            return Err(EngineError::InvalidPolicy("take profit percent is negative".into()));
        }
        Ok(())
    }

    /// Trailing delta in basis points, clamped to exchange limits
    pub fn trailing_delta_bips(&self) -> u32 {
        let bips = (self.trailing_delta_pct * dec!(10000))
            .round()
            .to_u32()
            .unwrap_or(MIN_TRAILING_DELTA_BIPS);
        bips.clamp(MIN_TRAILING_DELTA_BIPS, MAX_TRAILING_DELTA_BIPS)
    }
}

/// Round `value` toward zero to `dp` decimal places
pub fn round_down(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::ToZero)
}

/// Round an entry quantity to the exchange step
pub fn round_quantity(quantity: Decimal, policy: &ProtectionPolicy) -> EngineResult<Quantity> {
    Ok(Quantity::new(round_down(quantity, policy.quantity_precision))?)
}

/// Stop price for a fresh entry
pub fn initial_stop(entry_price: Price, policy: &ProtectionPolicy) -> EngineResult<Price> {
    let raw = entry_price.as_decimal() * (Decimal::ONE - policy.stop_loss_pct);
    Ok(Price::new(round_down(raw, policy.price_precision))?)
}

/// Take-profit price for a fresh entry, `None` when disabled
pub fn take_profit(entry_price: Price, policy: &ProtectionPolicy) -> Option<Price> {
    if policy.take_profit_pct.is_zero() {
        return None;
    }
    let raw = entry_price.as_decimal() * (Decimal::ONE + policy.take_profit_pct);
    Price::new(round_down(raw, policy.price_precision)).ok()
}

/// Monotonic stop refresh: never returns less than `existing`
pub fn refreshed_stop(existing: Price, current_price: Price, policy: &ProtectionPolicy) -> Price {
    let candidate = round_down(
        current_price.as_decimal() * (Decimal::ONE - policy.stop_loss_pct),
        policy.price_precision,
    );
    match Price::new(candidate) {
        Ok(candidate) if candidate > existing => candidate,
        _ => existing,
    }
}

/// Parameters for one protection candidate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProtectionPlan {
    pub kind: ProtectionKind,
    pub quantity: Quantity,
    /// Tracked stop level. Trailing orders do not send it; it is kept as the floor.
    pub stop_price: Price,
    pub limit_price: Option<Price>,
    pub trailing_delta_bips: Option<u32>,
    /// Value checked against the exchange minimum
    pub notional: Decimal,
}

/// Plan one fallback candidate for `position` at `current_price`
///
/// # Errors
/// - `StopWouldTrigger` when the refreshed stop is not below market
/// - `BelowMinNotional` when the order value is under the exchange minimum
///   (rejected locally, never sent)
pub fn plan_candidate(
    kind: ProtectionKind,
    position: &Position,
    current_price: Price,
    policy: &ProtectionPolicy,
) -> EngineResult<ProtectionPlan> {
    let quantity = round_quantity(position.quantity.as_decimal(), policy)?;
    let stop_price = refreshed_stop(position.stop_price, current_price, policy);

    if stop_price >= current_price {
        return Err(EngineError::StopWouldTrigger {
            stop: stop_price.as_decimal(),
            market: current_price.as_decimal(),
        });
    }

    let (limit_price, trailing_delta_bips) = match kind {
        ProtectionKind::TrailingStopMarket => (None, Some(policy.trailing_delta_bips())),
        ProtectionKind::StopMarket => (None, None),
        ProtectionKind::StopLimit => {
            let raw = stop_price.as_decimal() * (Decimal::ONE - policy.limit_offset_pct);
            (Some(Price::new(round_down(raw, policy.price_precision))?), None)
        },
    };

    let execution_price = limit_price.unwrap_or(stop_price);
    let notional = quantity.notional_at(execution_price);
    if notional < policy.min_notional {
        return Err(EngineError::BelowMinNotional {
            notional,
            minimum: policy.min_notional,
        });
    }

    Ok(ProtectionPlan {
        kind,
        quantity,
        stop_price,
        limit_price,
        trailing_delta_bips,
        notional,
    })
}
