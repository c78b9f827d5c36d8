//! Position Sizing (Pure Functions)
//!
//! Maps account equity to the notional committed to a new entry.
//!
//! # Algorithm
//!
//! ```text
//! tier_target = target of the highest tier with threshold <= equity
//! safety_cap  = equity * cap_fraction(equity)
//! notional    = min(tier_target, safety_cap)
//!
//! below the lowest tier:
//! notional    = min(max(minimum_order_notional, equity * default_fraction), safety_cap)
//! ```
//!
//! Kelly sizing is computed when trade history is supplied and reported
//! alongside the tier decision. It never changes `notional`.

use crate::error::{EngineError, EngineResult};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One tier breakpoint: from `equity_threshold` upwards commit `target_notional`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizingTier {
    pub equity_threshold: Decimal,
    pub target_notional: Decimal,
}

/// One safety band: from `equity_floor` upwards never commit more than `cap_fraction` of equity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapBand {
    pub equity_floor: Decimal,
    pub cap_fraction: Decimal,
}

/// Bounds for the advisory Kelly computation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KellyBounds {
    pub max_kelly_fraction: Decimal,
    pub min_notional: Decimal,
    pub max_notional: Decimal,
}

impl Default for KellyBounds {
    fn default() -> Self {
        Self {
            max_kelly_fraction: dec!(0.25),
            min_notional: dec!(5),
            max_notional: dec!(1000),
        }
    }
}

/// Trade history summary used by Kelly sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KellyInputs {
    /// Probability of a winning trade, 0..=1
    pub win_rate: Decimal,
    pub avg_win: Decimal,
    /// Average loss, sign ignored
    pub avg_loss: Decimal,
}

/// Risk posture for new entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingPolicy {
    tiers: Vec<SizingTier>,
    caps: Vec<CapBand>,
    minimum_order_notional: Decimal,
    default_fraction: Decimal,
    kelly: KellyBounds,
}

impl SizingPolicy {
    /// Build a validated policy. Tables are sorted by threshold.
    ///
    /// # Errors
    /// - empty tier or cap table
    /// - non-positive targets, fractions outside (0, 1]
    /// - cap fractions that grow with equity
    pub fn new(
        mut tiers: Vec<SizingTier>,
        mut caps: Vec<CapBand>,
        minimum_order_notional: Decimal,
        default_fraction: Decimal,
        kelly: KellyBounds,
    ) -> EngineResult<Self> {
        if tiers.is_empty() {
            return Err(EngineError::InvalidPolicy("at least one sizing tier is required".into()));
        }
        if caps.is_empty() {
            return Err(EngineError::InvalidPolicy("at least one cap band is required".into()));
        }

        tiers.sort_by(|a, b| a.equity_threshold.cmp(&b.equity_threshold));
        caps.sort_by(|a, b| a.equity_floor.cmp(&b.equity_floor));

        if let Some(tier) = tiers
            .iter()
            .find(|t| t.target_notional <= Decimal::ZERO || t.equity_threshold < Decimal::ZERO)
        {
            return Err(EngineError::InvalidPolicy(format!(
                "tier {} -> {} must be positive",
                tier.equity_threshold, tier.target_notional
            )));
        }

        for band in &caps {
            if band.cap_fraction <= Decimal::ZERO || band.cap_fraction > Decimal::ONE {
                return Err(EngineError::InvalidPolicy(format!(
                    "cap fraction {} must be within (0, 1]",
                    band.cap_fraction
                )));
            }
        }
        if caps.windows(2).any(|w| w[1].cap_fraction > w[0].cap_fraction) {
            return Err(EngineError::InvalidPolicy(
                "cap fractions must not increase with equity".into(),
            ));
        }

        if default_fraction <= Decimal::ZERO || default_fraction > Decimal::ONE {
            return Err(EngineError::InvalidPolicy(format!(
                "default fraction {} must be within (0, 1]",
                default_fraction
            )));
        }
        if minimum_order_notional < Decimal::ZERO {
            return Err(EngineError::InvalidPolicy("minimum order notional is negative".into()));
        }
        if kelly.max_kelly_fraction < Decimal::ZERO
            || kelly.max_kelly_fraction > Decimal::ONE
            || kelly.min_notional > kelly.max_notional
        {
            return Err(EngineError::InvalidPolicy("inconsistent Kelly bounds".into()));
        }

        Ok(Self {
            tiers,
            caps,
            minimum_order_notional,
            default_fraction,
            kelly,
        })
    }

    pub fn tiers(&self) -> &[SizingTier] {
        &self.tiers
    }

    pub fn caps(&self) -> &[CapBand] {
        &self.caps
    }

    pub fn minimum_order_notional(&self) -> Decimal {
        self.minimum_order_notional
    }

    pub fn default_fraction(&self) -> Decimal {
        self.default_fraction
    }

    pub fn kelly_bounds(&self) -> KellyBounds {
        self.kelly
    }

    /// Cap fraction for `equity`. Equity under the first floor uses the first band.
    pub fn cap_fraction(&self, equity: Decimal) -> Decimal {
        self.caps
            .iter()
            .rev()
            .find(|band| band.equity_floor <= equity)
            .or_else(|| self.caps.first())
            .map(|band| band.cap_fraction)
            .unwrap_or(Decimal::ZERO)
    }

    fn tier_for(&self, equity: Decimal) -> Option<&SizingTier> {
        self.tiers.iter().rev().find(|tier| tier.equity_threshold <= equity)
    }
}

impl Default for SizingPolicy {
    fn default() -> Self {
        let tiers = [
            (dec!(25), dec!(12.50)),
            (dec!(50), dec!(15.00)),
            (dec!(75), dec!(18.75)),
            (dec!(100), dec!(20.00)),
            (dec!(250), dec!(50.00)),
            (dec!(500), dec!(100.00)),
            (dec!(1000), dec!(150.00)),
        ]
        .into_iter()
        .map(|(equity_threshold, target_notional)| SizingTier {
            equity_threshold,
            target_notional,
        })
        .collect();

        let caps = [
            (dec!(0), dec!(0.50)),
            (dec!(100), dec!(0.30)),
            (dec!(500), dec!(0.20)),
            (dec!(2000), dec!(0.10)),
        ]
        .into_iter()
        .map(|(equity_floor, cap_fraction)| CapBand {
            equity_floor,
            cap_fraction,
        })
        .collect();

        Self {
            tiers,
            caps,
            minimum_order_notional: dec!(5),
            default_fraction: dec!(0.50),
            kelly: KellyBounds::default(),
        }
    }
}

/// Which rule produced the final notional
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingReason {
    /// Equity is zero or negative
    NoCapital,
    /// Tier target applied as is
    Tier,
    /// Equity under the lowest tier, fraction of equity applied
    BelowLowestTier,
    /// Safety cap was tighter than the tier rule
    SafetyCap,
}

impl fmt::Display for SizingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SizingReason::NoCapital => "no capital available",
            SizingReason::Tier => "tier target",
            SizingReason::BelowLowestTier => "below lowest tier",
            SizingReason::SafetyCap => "limited by safety cap",
        };
        f.write_str(text)
    }
}

/// Output of [`compute_size`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingDecision {
    /// Quote amount to commit
    pub notional: Decimal,
    pub tier_target: Option<Decimal>,
    pub safety_cap: Decimal,
    /// Advisory Kelly notional, when history was supplied
    pub kelly_notional: Option<Decimal>,
    pub reason: SizingReason,
}

impl SizingDecision {
    /// Check if the decision is large enough to place on the exchange
    pub fn is_tradeable(&self, exchange_min_notional: Decimal) -> bool {
        self.notional > Decimal::ZERO && self.notional >= exchange_min_notional
    }
}

fn round_cents_down(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::ToZero)
}

/// Maximum notional allowed at `equity`, rounded down to cents
pub fn safety_cap(equity: Decimal, policy: &SizingPolicy) -> Decimal {
    if equity <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    round_cents_down(equity * policy.cap_fraction(equity))
}

/// Kelly fraction `f = (b·p − q) / b` clamped to `[0, max_fraction]`
///
/// Returns zero when the inputs carry no usable edge information.
pub fn kelly_fraction(inputs: &KellyInputs, max_fraction: Decimal) -> Decimal {
    let avg_loss = inputs.avg_loss.abs();
    if avg_loss.is_zero()
        || inputs.avg_win <= Decimal::ZERO
        || inputs.win_rate < Decimal::ZERO
        || inputs.win_rate > Decimal::ONE
    {
        return Decimal::ZERO;
    }

    let b = inputs.avg_win / avg_loss;
    let p = inputs.win_rate;
    let q = Decimal::ONE - p;
    let f = (b * p - q) / b;

    f.max(Decimal::ZERO).min(max_fraction)
}

/// Compute the notional for a new entry
///
/// Never fails: equity at or below zero yields a zero-sized decision with
/// [`SizingReason::NoCapital`].
///
/// # Examples
///
/// ```
/// # use bastion_engine::sizing::{compute_size, SizingPolicy};
/// # use rust_decimal_macros::dec;
/// let policy = SizingPolicy::default();
/// assert_eq!(compute_size(dec!(51.14), &policy, None).notional, dec!(15.00));
/// assert_eq!(compute_size(dec!(0), &policy, None).notional, dec!(0));
/// ```
pub fn compute_size(
    equity: Decimal,
    policy: &SizingPolicy,
    kelly: Option<&KellyInputs>,
) -> SizingDecision {
    if equity <= Decimal::ZERO {
        return SizingDecision {
            notional: Decimal::ZERO,
            tier_target: None,
            safety_cap: Decimal::ZERO,
            kelly_notional: None,
            reason: SizingReason::NoCapital,
        };
    }

    let cap = safety_cap(equity, policy);
    let tier_target = policy.tier_for(equity).map(|tier| tier.target_notional);

    let (baseline, base_reason) = match tier_target {
        Some(target) => (target, SizingReason::Tier),
        None => (
            round_cents_down(
                (equity * policy.default_fraction).max(policy.minimum_order_notional),
            ),
            SizingReason::BelowLowestTier,
        ),
    };

    let (notional, reason) = if baseline > cap {
        (cap, SizingReason::SafetyCap)
    } else {
        (baseline, base_reason)
    };

    let kelly_notional = kelly.map(|inputs| {
        let bounds = policy.kelly;
        let f = kelly_fraction(inputs, bounds.max_kelly_fraction);
        if f.is_zero() {
            Decimal::ZERO
        } else {
            round_cents_down(equity * f)
                .max(bounds.min_notional)
                .min(bounds.max_notional)
        }
    });

    SizingDecision {
        notional,
        tier_target,
        safety_cap: cap,
        kelly_notional,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tier_regressions() {
        let policy = SizingPolicy::default();

        assert_eq!(compute_size(dec!(25), &policy, None).notional, dec!(12.50));
        assert_eq!(compute_size(dec!(50), &policy, None).notional, dec!(15.00));
        assert_eq!(compute_size(dec!(75), &policy, None).notional, dec!(18.75));
        assert_eq!(compute_size(dec!(100), &policy, None).notional, dec!(20.00));
    }

    #[test]
    fn test_tier_between_breakpoints() {
        let policy = SizingPolicy::default();
        let decision = compute_size(dec!(51.14), &policy, None);

        assert_eq!(decision.notional, dec!(15.00));
        assert_eq!(decision.tier_target, Some(dec!(15.00)));
        assert_eq!(decision.safety_cap, dec!(25.57));
        assert_eq!(decision.reason, SizingReason::Tier);
    }

    #[test]
    fn test_no_capital() {
        let policy = SizingPolicy::default();

        for equity in [dec!(0), dec!(-10)] {
            let decision = compute_size(equity, &policy, None);
            assert_eq!(decision.notional, Decimal::ZERO);
            assert_eq!(decision.reason, SizingReason::NoCapital);
            assert_eq!(decision.reason.to_string(), "no capital available");
        }
    }

    #[test]
    fn test_below_lowest_tier() {
        let policy = SizingPolicy::default();

        // 20 * 0.5 = 10, cap 10
        let decision = compute_size(dec!(20), &policy, None);
        assert_eq!(decision.notional, dec!(10.00));
        assert_eq!(decision.reason, SizingReason::BelowLowestTier);

        // minimum 5 exceeds the 4.00 cap, cap wins
        let decision = compute_size(dec!(8), &policy, None);
        assert_eq!(decision.notional, dec!(4.00));
        assert_eq!(decision.reason, SizingReason::SafetyCap);
        assert!(!decision.is_tradeable(dec!(5)));
    }

    #[test]
    fn test_safety_cap_binds() {
        let tiers = vec![SizingTier {
            equity_threshold: dec!(10),
            target_notional: dec!(100),
        }];
        let caps = vec![CapBand {
            equity_floor: dec!(0),
            cap_fraction: dec!(0.3),
        }];
        let policy =
            SizingPolicy::new(tiers, caps, dec!(5), dec!(0.5), KellyBounds::default()).unwrap();

        let decision = compute_size(dec!(50), &policy, None);
        assert_eq!(decision.notional, dec!(15.00));
        assert_eq!(decision.reason, SizingReason::SafetyCap);
    }

    #[test]
    fn test_size_never_exceeds_cap() {
        let policy = SizingPolicy::default();
        let mut equity = dec!(-5);

        while equity < dec!(5000) {
            let decision = compute_size(equity, &policy, None);
            assert!(decision.notional >= Decimal::ZERO, "negative size at {}", equity);
            assert!(
                decision.notional <= safety_cap(equity, &policy),
                "size {} above cap at {}",
                decision.notional,
                equity
            );
            equity += dec!(3.37);
        }
    }

    #[test]
    fn test_cap_fraction_decreases() {
        let policy = SizingPolicy::default();

        assert_eq!(policy.cap_fraction(dec!(50)), dec!(0.50));
        assert_eq!(policy.cap_fraction(dec!(100)), dec!(0.30));
        assert_eq!(policy.cap_fraction(dec!(750)), dec!(0.20));
        assert_eq!(policy.cap_fraction(dec!(10000)), dec!(0.10));
    }

    #[test]
    fn test_kelly_fraction() {
        // b = 2, p = 0.5 → f = (1 - 0.5) / 2 = 0.25
        let inputs = KellyInputs {
            win_rate: dec!(0.5),
            avg_win: dec!(2),
            avg_loss: dec!(-1),
        };
        assert_eq!(kelly_fraction(&inputs, dec!(1)), dec!(0.25));
        assert_eq!(kelly_fraction(&inputs, dec!(0.1)), dec!(0.1));

        let no_edge = KellyInputs {
            win_rate: dec!(0.3),
            avg_win: dec!(1),
            avg_loss: dec!(1),
        };
        assert_eq!(kelly_fraction(&no_edge, dec!(0.25)), Decimal::ZERO);
    }

    #[test]
    fn test_kelly_is_advisory() {
        let policy = SizingPolicy::default();
        let inputs = KellyInputs {
            win_rate: dec!(0.6),
            avg_win: dec!(3),
            avg_loss: dec!(1),
        };

        let with_kelly = compute_size(dec!(100), &policy, Some(&inputs));
        let without = compute_size(dec!(100), &policy, None);

        assert_eq!(with_kelly.notional, without.notional);
        // f clamps to 0.25 → 25.00
        assert_eq!(with_kelly.kelly_notional, Some(dec!(25.00)));
        assert_eq!(without.kelly_notional, None);
    }

    #[test]
    fn test_policy_validation() {
        let tier = SizingTier {
            equity_threshold: dec!(10),
            target_notional: dec!(5),
        };
        let kelly = KellyBounds::default();

        assert!(SizingPolicy::new(vec![], vec![], dec!(5), dec!(0.5), kelly).is_err());

        let growing = vec![
            CapBand {
                equity_floor: dec!(0),
                cap_fraction: dec!(0.2),
            },
            CapBand {
                equity_floor: dec!(100),
                cap_fraction: dec!(0.4),
            },
        ];
        assert!(SizingPolicy::new(vec![tier], growing, dec!(5), dec!(0.5), kelly).is_err());

        let caps = vec![CapBand {
            equity_floor: dec!(0),
            cap_fraction: dec!(0.5),
        }];
        assert!(SizingPolicy::new(vec![tier], caps.clone(), dec!(5), dec!(1.5), kelly).is_err());
        assert!(SizingPolicy::new(vec![tier], caps, dec!(5), dec!(0.5), kelly).is_ok());
    }
}
