//! Trading statistics
//!
//! Process-wide counters updated once per completed exit.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Outcome class of a closed trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeOutcome {
    /// Positive P&L
    Win,
    /// Zero or negative P&L
    Loss,
}

/// Account-level trade statistics
///
/// Break-even trades count as losses: fees make them net negative.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TradingStatistics {
    /// Completed exits since the last reset
    pub total_trades: u64,
    /// Exits with positive P&L
    pub winning_trades: u64,
    /// Exits with zero or negative P&L
    pub losing_trades: u64,
    /// Losses since the last win
    pub consecutive_losses: u32,
    /// Sum of P&L over all exits
    pub realized_pnl: Decimal,
    /// Sum of winning P&L
    pub gross_profit: Decimal,
    /// Sum of losing P&L as a positive amount
    pub gross_loss: Decimal,
    /// Highest equity observed after an exit
    pub peak_equity: Decimal,
    /// Fraction below peak after the last exit (0.1 = 10%)
    pub current_drawdown: Decimal,
    /// Largest `current_drawdown` seen
    pub max_drawdown: Decimal,
    /// When the last exit was recorded
    pub last_trade_at: Option<DateTime<Utc>>,
}

impl TradingStatistics {
    /// Record a completed exit.
    ///
    /// `equity_after` is the account equity observed once the exit settled.
    pub fn record_exit(&mut self, pnl: Decimal, equity_after: Decimal) -> TradeOutcome {
        self.total_trades += 1;
        self.realized_pnl += pnl;
        self.last_trade_at = Some(Utc::now());

        let outcome = if pnl > Decimal::ZERO {
            self.winning_trades += 1;
            self.consecutive_losses = 0;
            self.gross_profit += pnl;
            TradeOutcome::Win
        } else {
            self.losing_trades += 1;
            self.consecutive_losses += 1;
            self.gross_loss += pnl.abs();
            TradeOutcome::Loss
        };

        self.observe_equity(equity_after);
        outcome
    }

    /// Update peak equity and drawdown from an equity observation
    pub fn observe_equity(&mut self, equity: Decimal) {
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        self.current_drawdown = if self.peak_equity > Decimal::ZERO {
            ((self.peak_equity - equity) / self.peak_equity).max(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };
        if self.current_drawdown > self.max_drawdown {
            self.max_drawdown = self.current_drawdown;
        }
    }

    /// Fraction of trades that were wins, None before the first trade
    pub fn win_rate(&self) -> Option<Decimal> {
        if self.total_trades == 0 {
            return None;
        }
        Some(Decimal::from(self.winning_trades) / Decimal::from(self.total_trades))
    }

    /// Mean profit of winning trades
    pub fn average_win(&self) -> Option<Decimal> {
        if self.winning_trades == 0 {
            return None;
        }
        Some(self.gross_profit / Decimal::from(self.winning_trades))
    }

    /// Mean absolute loss of losing trades
    pub fn average_loss(&self) -> Option<Decimal> {
        if self.losing_trades == 0 {
            return None;
        }
        Some(self.gross_loss / Decimal::from(self.losing_trades))
    }

    /// Operator reset
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_loss_loss_win_resets_streak() {
        let mut stats = TradingStatistics::default();

        assert_eq!(stats.record_exit(dec!(-1.5), dec!(98.5)), TradeOutcome::Loss);
        assert_eq!(stats.record_exit(dec!(-0.5), dec!(98)), TradeOutcome::Loss);
        assert_eq!(stats.consecutive_losses, 2);

        assert_eq!(stats.record_exit(dec!(3), dec!(101)), TradeOutcome::Win);
        assert_eq!(stats.consecutive_losses, 0);
        assert_eq!(stats.winning_trades, 1);
        assert_eq!(stats.losing_trades, 2);
        assert_eq!(stats.total_trades, 3);
        assert_eq!(stats.realized_pnl, dec!(1.0));
    }

    #[test]
    fn test_break_even_counts_as_loss() {
        let mut stats = TradingStatistics::default();
        assert_eq!(stats.record_exit(Decimal::ZERO, dec!(100)), TradeOutcome::Loss);
        assert_eq!(stats.consecutive_losses, 1);
    }

    #[test]
    fn test_drawdown_tracking() {
        let mut stats = TradingStatistics::default();

        stats.record_exit(dec!(10), dec!(200));
        assert_eq!(stats.peak_equity, dec!(200));
        assert_eq!(stats.current_drawdown, Decimal::ZERO);

        stats.record_exit(dec!(-20), dec!(180));
        assert_eq!(stats.current_drawdown, dec!(0.1));
        assert_eq!(stats.max_drawdown, dec!(0.1));

        stats.record_exit(dec!(10), dec!(190));
        assert_eq!(stats.current_drawdown, dec!(0.05));
        assert_eq!(stats.max_drawdown, dec!(0.1));
    }

    #[test]
    fn test_averages() {
        let mut stats = TradingStatistics::default();
        assert!(stats.win_rate().is_none());

        stats.record_exit(dec!(4), dec!(104));
        stats.record_exit(dec!(2), dec!(106));
        stats.record_exit(dec!(-3), dec!(103));

        assert_eq!(stats.average_win(), Some(dec!(3)));
        assert_eq!(stats.average_loss(), Some(dec!(3)));
        assert_eq!(stats.win_rate().unwrap().round_dp(4), dec!(0.6667));
    }

    #[test]
    fn test_reset() {
        let mut stats = TradingStatistics::default();
        stats.record_exit(dec!(-1), dec!(99));
        stats.reset();
        assert_eq!(stats, TradingStatistics::default());
    }
}
