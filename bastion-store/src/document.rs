//! Persisted state document
//!
//! One JSON document per account:
//!
//! ```text
//! { version, positions: { "SOLUSDT": Position, ... }, statistics, saved_at }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use bastion_domain::{Position, Symbol, TradingStatistics};

use crate::error::{StoreError, StoreResult};

/// Schema version written by this build
pub const CURRENT_VERSION: u32 = 1;

/// Everything the engine needs to resume after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
    pub version: u32,
    /// Open positions keyed by trading pair
    #[serde(default)]
    pub positions: BTreeMap<String, Position>,
    #[serde(default)]
    pub statistics: TradingStatistics,
    pub saved_at: Option<DateTime<Utc>>,
}

impl Default for StateDocument {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            positions: BTreeMap::new(),
            statistics: TradingStatistics::default(),
            saved_at: None,
        }
    }
}

impl StateDocument {
    /// Open position for `symbol`
    pub fn position(&self, symbol: &Symbol) -> Option<&Position> {
        self.positions.get(&symbol.as_pair())
    }

    /// Mutable open position for `symbol`
    pub fn position_mut(&mut self, symbol: &Symbol) -> Option<&mut Position> {
        self.positions.get_mut(&symbol.as_pair())
    }

    /// Track a new position. At most one per instrument.
    pub fn open_position(&mut self, position: Position) -> StoreResult<()> {
        let key = position.symbol.as_pair();
        if self.positions.contains_key(&key) {
            return Err(StoreError::invalid_state(format!(
                "position already open for {}",
                key
            )));
        }
        self.positions.insert(key, position);
        Ok(())
    }

    /// Replace the tracked position for its instrument
    pub fn replace_position(&mut self, position: Position) -> StoreResult<()> {
        let key = position.symbol.as_pair();
        match self.positions.get_mut(&key) {
            Some(slot) => {
                *slot = position;
                Ok(())
            },
            None => Err(StoreError::invalid_state(format!("no open position for {}", key))),
        }
    }

    /// Stop tracking the position for `symbol`
    pub fn close_position(&mut self, symbol: &Symbol) -> Option<Position> {
        self.positions.remove(&symbol.as_pair())
    }

    /// Check the version is readable by this build
    pub fn check_version(&self) -> StoreResult<()> {
        if self.version > CURRENT_VERSION {
            return Err(StoreError::UnsupportedVersion {
                found: self.version,
                supported: CURRENT_VERSION,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_domain::{Price, Quantity};
    use rust_decimal_macros::dec;

    fn position(pair: &str) -> Position {
        Position::open(
            Symbol::from_pair(pair).unwrap(),
            Quantity::new(dec!(0.1)).unwrap(),
            Price::new(dec!(150)).unwrap(),
            Price::new(dec!(147)).unwrap(),
            None,
        )
    }

    #[test]
    fn test_one_position_per_instrument() {
        let mut doc = StateDocument::default();

        doc.open_position(position("SOLUSDT")).unwrap();
        doc.open_position(position("BTCUSDT")).unwrap();
        assert!(doc.open_position(position("SOLUSDT")).is_err());
        assert_eq!(doc.positions.len(), 2);
    }

    #[test]
    fn test_replace_and_close() {
        let mut doc = StateDocument::default();
        let sol = Symbol::from_pair("SOLUSDT").unwrap();

        assert!(doc.replace_position(position("SOLUSDT")).is_err());
        doc.open_position(position("SOLUSDT")).unwrap();

        let mut updated = doc.position(&sol).unwrap().clone();
        updated.stop_price = Price::new(dec!(148)).unwrap();
        doc.replace_position(updated).unwrap();
        assert_eq!(doc.position(&sol).unwrap().stop_price.as_decimal(), dec!(148));

        assert!(doc.close_position(&sol).is_some());
        assert!(doc.position(&sol).is_none());
    }

    #[test]
    fn test_newer_version_refused() {
        let doc = StateDocument {
            version: CURRENT_VERSION + 1,
            ..StateDocument::default()
        };
        assert!(matches!(doc.check_version(), Err(StoreError::UnsupportedVersion { .. })));
    }

    #[test]
    fn test_missing_sections_default() {
        let doc: StateDocument = serde_json::from_str(r#"{"version":1,"saved_at":null}"#).unwrap();
        assert!(doc.positions.is_empty());
        assert_eq!(doc.statistics, TradingStatistics::default());
    }
}
