//! State book: the in-memory copy of the document plus commit discipline.
//!
//! Every mutation runs on a draft copy. The draft replaces the live copy
//! only after the store has durably committed it, so a failed write never
//! leaves memory ahead of disk.

use rust_decimal::Decimal;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bastion_domain::{Position, Symbol, TradeOutcome, TradingStatistics};

use crate::document::StateDocument;
use crate::error::{StoreError, StoreResult};
use crate::repository::StateStore;

/// Committed state for the process
pub struct StateBook {
    store: Arc<dyn StateStore>,
    document: Mutex<StateDocument>,
}

impl StateBook {
    /// Load the committed document from `store`
    pub fn open(store: Arc<dyn StateStore>) -> StoreResult<Self> {
        let document = store.load()?;
        Ok(Self {
            store,
            document: Mutex::new(document),
        })
    }

    fn lock(&self) -> MutexGuard<'_, StateDocument> {
        self.document.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the whole document
    pub fn snapshot(&self) -> StateDocument {
        self.lock().clone()
    }

    /// Tracked position for `symbol`
    pub fn position(&self, symbol: &Symbol) -> Option<Position> {
        self.lock().position(symbol).cloned()
    }

    pub fn statistics(&self) -> TradingStatistics {
        self.lock().statistics.clone()
    }

    /// Apply `mutate` to a draft and commit it; memory changes only on success.
    pub fn update<T, F>(&self, mutate: F) -> StoreResult<T>
    where
        F: FnOnce(&mut StateDocument) -> StoreResult<T>,
    {
        let mut live = self.lock();
        let mut draft = live.clone();
        let value = mutate(&mut draft)?;
        self.store.commit(&draft)?;
        *live = draft;
        Ok(value)
    }

    /// Start tracking a freshly filled position
    pub fn open_position(&self, position: Position) -> StoreResult<()> {
        self.update(|doc| doc.open_position(position))
    }

    /// Persist changes to a tracked position
    pub fn save_position(&self, position: Position) -> StoreResult<()> {
        self.update(|doc| doc.replace_position(position))
    }

    /// Clear the position and record the trade in one commit
    pub fn close_position(
        &self,
        symbol: &Symbol,
        pnl: Decimal,
        equity_after: Decimal,
    ) -> StoreResult<(Position, TradeOutcome)> {
        self.update(|doc| {
            let position = doc.close_position(symbol).ok_or_else(|| {
                StoreError::invalid_state(format!("no open position for {}", symbol))
            })?;
            let outcome = doc.statistics.record_exit(pnl, equity_after);
            Ok((position, outcome))
        })
    }

    /// Operator reset of the statistics
    pub fn reset_statistics(&self) -> StoreResult<()> {
        self.update(|doc| {
            doc.statistics.reset();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStateStore;
    use bastion_domain::{Price, Quantity};
    use rust_decimal_macros::dec;

    fn position() -> Position {
        Position::open(
            Symbol::from_pair("SOLUSDT").unwrap(),
            Quantity::new(dec!(0.1)).unwrap(),
            Price::new(dec!(150)).unwrap(),
            Price::new(dec!(147)).unwrap(),
            None,
        )
    }

    #[test]
    fn test_failed_commit_leaves_memory_unchanged() {
        let store = Arc::new(MemoryStateStore::new());
        let book = StateBook::open(store.clone()).unwrap();

        store.fail_next_commit();
        assert!(book.open_position(position()).is_err());
        assert!(book.snapshot().positions.is_empty());

        book.open_position(position()).unwrap();
        assert_eq!(book.snapshot().positions.len(), 1);
        assert_eq!(store.commit_count(), 1);
    }

    #[test]
    fn test_close_position_updates_statistics_once() {
        let store = Arc::new(MemoryStateStore::new());
        let book = StateBook::open(store.clone()).unwrap();
        let symbol = Symbol::from_pair("SOLUSDT").unwrap();
        book.open_position(position()).unwrap();

        let (closed, outcome) = book.close_position(&symbol, dec!(0.5), dec!(100.5)).unwrap();

        assert_eq!(closed.symbol, symbol);
        assert_eq!(outcome, TradeOutcome::Win);
        let committed = store.committed().unwrap();
        assert!(committed.positions.is_empty());
        assert_eq!(committed.statistics.total_trades, 1);

        // nothing left to close
        assert!(book.close_position(&symbol, dec!(1), dec!(1)).is_err());
        assert_eq!(book.statistics().total_trades, 1);
    }

    #[test]
    fn test_reopen_sees_committed_state() {
        let store = Arc::new(MemoryStateStore::new());
        {
            let book = StateBook::open(store.clone()).unwrap();
            book.open_position(position()).unwrap();
        }

        let book = StateBook::open(store).unwrap();
        assert!(book.position(&Symbol::from_pair("SOLUSDT").unwrap()).is_some());
    }

    #[test]
    fn test_reset_statistics() {
        let store = Arc::new(MemoryStateStore::new());
        let book = StateBook::open(store).unwrap();
        book.open_position(position()).unwrap();
        book.close_position(&Symbol::from_pair("SOLUSDT").unwrap(), dec!(-1), dec!(99)).unwrap();

        book.reset_statistics().unwrap();
        assert_eq!(book.statistics(), TradingStatistics::default());
    }
}
