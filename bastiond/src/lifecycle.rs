//! Position Lifecycle Controller
//!
//! Drives one instrument at a time through the state machine:
//!
//! ```text
//! Flat → Entering → Holding(Unprotected) → Holding(Protected) → Exiting → Flat
//! ```
//!
//! Each cycle is owned by a per-symbol token. A cycle that finds the token
//! taken is skipped, never queued. State is committed to the book after
//! every exchange action that changes exposure, and statistics change only
//! when an exit is committed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{Mutex as CycleLock, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use bastion_domain::{
    ExitReason, LifecyclePhase, OrderSide, Position, Price, ProtectionKind, Quantity, Symbol,
    TradeIntent, TradingStatistics,
};
use bastion_engine::{
    compute_size, initial_stop, round_quantity, take_profit, KellyInputs, ProtectionPolicy,
    SizingDecision, SizingPolicy,
};
use bastion_exec::{
    new_client_order_id, AccountBalances, Alert, AlertKind, AlertSink, ExchangeOrder,
    ExchangePort, ExecError, OrderRequest, ProtectionManager, ProtectionReport, RetryPolicy,
    SignalSource,
};
use bastion_store::StateBook;

use crate::error::{DaemonError, DaemonResult};

/// Client order id prefix for entries
pub const ENTRY_TAG: &str = "bse";

/// Client order id prefix for exits
pub const EXIT_TAG: &str = "bsx";

/// Closed trades needed before Kelly inputs are derived from statistics
pub const KELLY_MIN_TRADES: u64 = 10;

// =============================================================================
// Settings and Outcomes
// =============================================================================

/// Controller knobs that are not part of the engine policies.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// Asset equity is measured in
    pub quote_asset: String,
    /// Intents below this confidence are ignored
    pub min_confidence: Decimal,
}

/// What one control cycle did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Another cycle for the symbol was in flight
    Skipped,
    /// Flat and nothing to act on
    Idle,
    /// Intent received but not acted on
    IntentIgnored { reason: String },
    /// Entry refused before any order was sent; stays Flat
    EntryDeclined { reason: String },
    /// Entry filled; `protected` tells whether protection was placed
    Entered {
        quantity: Decimal,
        entry_price: Decimal,
        notional: Decimal,
        protected: bool,
    },
    /// Still holding after the cycle
    Holding { phase: LifecyclePhase },
    /// Position exited and cleared
    Exited { reason: ExitReason, exit_price: Decimal, pnl: Decimal },
}

/// Result of the startup reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    /// Tracked positions whose balance was gone
    pub closed: Vec<Symbol>,
    /// Untracked protection orders adopted as positions
    pub reconstructed: Vec<Symbol>,
    /// Tracked positions whose protection order was missing
    pub unprotected: Vec<Symbol>,
    /// Untracked balances without protection, adopted unprotected
    pub untracked: Vec<Symbol>,
    /// Symbols that could not be checked
    pub failed: Vec<Symbol>,
}

// =============================================================================
// Controller
// =============================================================================

/// Owns the lifecycle of every configured instrument.
pub struct LifecycleController {
    exchange: Arc<dyn ExchangePort>,
    alerts: Arc<dyn AlertSink>,
    signals: Arc<dyn SignalSource>,
    book: Arc<StateBook>,
    protection: ProtectionManager,
    sizing: SizingPolicy,
    retry: RetryPolicy,
    settings: LifecycleSettings,
    cycles: Mutex<HashMap<Symbol, Arc<CycleLock<()>>>>,
}

impl LifecycleController {
    /// Create a controller; all collaborators are injected.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        exchange: Arc<dyn ExchangePort>,
        alerts: Arc<dyn AlertSink>,
        signals: Arc<dyn SignalSource>,
        book: Arc<StateBook>,
        sizing: SizingPolicy,
        protection: ProtectionPolicy,
        retry: RetryPolicy,
        settings: LifecycleSettings,
    ) -> Self {
        let protection = ProtectionManager::new(exchange.clone(), alerts.clone(), protection, retry);
        Self {
            exchange,
            alerts,
            signals,
            book,
            protection,
            sizing,
            retry,
            settings,
            cycles: Mutex::new(HashMap::new()),
        }
    }

    /// Committed state
    pub fn book(&self) -> &Arc<StateBook> {
        &self.book
    }

    fn policy(&self) -> &ProtectionPolicy {
        self.protection.policy()
    }

    /// Take the cycle token for `symbol`, or `None` when a cycle is running.
    fn try_own(&self, symbol: &Symbol) -> Option<OwnedMutexGuard<()>> {
        let lock = self
            .cycles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(symbol.clone())
            .or_default()
            .clone();
        lock.try_lock_owned().ok()
    }

    // =========================================================================
    // Entry points
    // =========================================================================

    /// One scheduled cycle: take the next pending intent, then act.
    pub async fn tick(&self, symbol: &Symbol) -> DaemonResult<CycleOutcome> {
        let Some(_token) = self.try_own(symbol) else {
            debug!(symbol = %symbol.as_pair(), "Cycle in flight, skipping tick");
            return Ok(CycleOutcome::Skipped);
        };
        let intent = self.signals.next_intent(symbol).await;
        self.cycle(symbol, intent).await
    }

    /// Act on an intent immediately (same ownership rules as a tick).
    pub async fn handle_intent(
        &self,
        symbol: &Symbol,
        intent: TradeIntent,
    ) -> DaemonResult<CycleOutcome> {
        let Some(_token) = self.try_own(symbol) else {
            debug!(symbol = %symbol.as_pair(), "Cycle in flight, skipping intent");
            return Ok(CycleOutcome::Skipped);
        };
        self.cycle(symbol, Some(intent)).await
    }

    async fn cycle(
        &self,
        symbol: &Symbol,
        intent: Option<TradeIntent>,
    ) -> DaemonResult<CycleOutcome> {
        let intent = match intent {
            Some(intent) if intent.confidence < self.settings.min_confidence => {
                info!(
                    symbol = %symbol.as_pair(),
                    confidence = %intent.confidence,
                    min_confidence = %self.settings.min_confidence,
                    "Intent below minimum confidence, ignored"
                );
                return self.without_intent(symbol, "confidence below minimum").await;
            },
            other => other,
        };

        match (self.book.position(symbol), intent) {
            (None, Some(intent)) if intent.side == OrderSide::Buy => self.enter(symbol).await,
            (None, Some(_)) => {
                debug!(symbol = %symbol.as_pair(), "Sell intent while flat, ignored");
                Ok(CycleOutcome::IntentIgnored {
                    reason: "no position to sell".to_string(),
                })
            },
            (None, None) => Ok(CycleOutcome::Idle),
            (Some(position), Some(intent)) if intent.side == OrderSide::Sell => {
                let price = self.ticker(symbol).await?;
                self.exit(position, ExitReason::Signal, price).await
            },
            (Some(position), intent) => {
                if intent.is_some() {
                    debug!(symbol = %symbol.as_pair(), "Buy intent while holding, ignored");
                }
                self.maintain(position).await
            },
        }
    }

    /// Low-confidence intents still let the holding cycle run.
    async fn without_intent(&self, symbol: &Symbol, reason: &str) -> DaemonResult<CycleOutcome> {
        match self.book.position(symbol) {
            Some(position) => self.maintain(position).await,
            None => Ok(CycleOutcome::IntentIgnored {
                reason: reason.to_string(),
            }),
        }
    }

    // =========================================================================
    // Flat → Entering → Holding
    // =========================================================================

    async fn enter(&self, symbol: &Symbol) -> DaemonResult<CycleOutcome> {
        let balances = self.balances().await?;
        let equity = self.equity(&balances, None);
        let decision = self.size(equity);

        if !decision.is_tradeable(self.policy().min_notional) {
            warn!(
                symbol = %symbol.as_pair(),
                %equity,
                notional = %decision.notional,
                reason = %decision.reason,
                "Entry declined by sizing"
            );
            let reason = if decision.notional.is_zero() {
                decision.reason.to_string()
            } else {
                format!(
                    "size {} below minimum notional {}",
                    decision.notional,
                    self.policy().min_notional
                )
            };
            return Ok(CycleOutcome::EntryDeclined { reason });
        }

        info!(
            symbol = %symbol.as_pair(),
            phase = %LifecyclePhase::Entering,
            %equity,
            notional = %decision.notional,
            safety_cap = %decision.safety_cap,
            kelly_notional = ?decision.kelly_notional,
            "Entering position"
        );

        let request = OrderRequest::market_buy_quote(
            symbol.clone(),
            decision.notional,
            new_client_order_id(ENTRY_TAG),
        );
        let order = match self.retry.submit(self.exchange.as_ref(), &request).await {
            Ok(order) => order,
            Err(e) => {
                if let ExecError::UnknownOutcome { client_order_id } = &e {
                    self.alerts
                        .alert(Alert::critical(
                            AlertKind::PermanentFailure,
                            symbol,
                            format!("entry {} outcome unknown, check the account", client_order_id),
                        ))
                        .await;
                }
                return Err(e.into());
            },
        };

        let (quantity, entry_price) = self.fill_of(symbol, &order).await?;
        let policy = self.policy();
        let position = Position::open(
            symbol.clone(),
            quantity,
            entry_price,
            initial_stop(entry_price, policy)?,
            take_profit(entry_price, policy),
        );

        if let Err(e) = self.book.open_position(position.clone()) {
            error!(symbol = %symbol.as_pair(), error = %e, "Failed to persist filled entry");
            self.alerts
                .alert(Alert::critical(
                    AlertKind::PermanentFailure,
                    symbol,
                    format!("filled entry of {} could not be persisted: {}", quantity, e),
                ))
                .await;
            return Err(e.into());
        }
        info!(
            symbol = %symbol.as_pair(),
            phase = %LifecyclePhase::HoldingUnprotected,
            %quantity,
            %entry_price,
            stop_price = %position.stop_price,
            "Entry filled"
        );

        let report = self.protection.protect(&position, entry_price).await;
        let position = self.apply_protection(position, &report)?;

        Ok(CycleOutcome::Entered {
            quantity: quantity.as_decimal(),
            entry_price: entry_price.as_decimal(),
            notional: decision.notional,
            protected: position.is_protected(),
        })
    }

    fn size(&self, equity: Decimal) -> SizingDecision {
        let statistics = self.book.statistics();
        compute_size(equity, &self.sizing, kelly_inputs(&statistics).as_ref())
    }

    /// Executed quantity (rounded to the exchange step) and average fill price.
    async fn fill_of(
        &self,
        symbol: &Symbol,
        order: &ExchangeOrder,
    ) -> DaemonResult<(Quantity, Price)> {
        let executed = order.filled_quantity().ok_or_else(|| DaemonError::EntryNotFilled {
            symbol: symbol.clone(),
        })?;
        let quantity = round_quantity(executed.as_decimal(), self.policy())?;
        let price = match order.average_price() {
            Some(price) => price,
            None => self.ticker(symbol).await?,
        };
        Ok((quantity, price))
    }

    // =========================================================================
    // Holding
    // =========================================================================

    /// Steady-state cycle for a held position.
    async fn maintain(&self, position: Position) -> DaemonResult<CycleOutcome> {
        let symbol = position.symbol.clone();
        let price = self.ticker(&symbol).await?;

        if position.take_profit_reached(price) {
            info!(symbol = %symbol.as_pair(), %price, "Take-profit reached");
            return self.exit(position, ExitReason::TakeProfit, price).await;
        }

        let mut position = position;
        if let Some(order_id) = position.protection_order_id.clone() {
            if !self.order_is_open(&symbol, &order_id).await? {
                let balances = self.balances().await?;
                if self.is_depleted(&balances, &position, price) {
                    info!(
                        symbol = %symbol.as_pair(),
                        %order_id,
                        stop_price = %position.stop_price,
                        "Protection order filled on exchange"
                    );
                    let stop = position.stop_price;
                    return self.record_exit(position, ExitReason::ProtectionFilled, stop).await;
                }
                warn!(
                    symbol = %symbol.as_pair(),
                    %order_id,
                    "Tracked protection order disappeared, re-protecting"
                );
                position.mark_unprotected();
                self.book.save_position(position.clone())?;
            }
        }

        // Replacing a stop that is already through market would only fail
        if price <= position.stop_price {
            warn!(
                symbol = %symbol.as_pair(),
                %price,
                stop_price = %position.stop_price,
                protected = position.is_protected(),
                "Price through stop, exiting at market"
            );
            return self.exit(position, ExitReason::StopBreached, price).await;
        }

        let report = self.protection.protect(&position, price).await;
        let position = self.apply_protection(position, &report)?;
        Ok(CycleOutcome::Holding {
            phase: position.phase(),
        })
    }

    /// Persist the result of a protection pass.
    fn apply_protection(
        &self,
        mut position: Position,
        report: &ProtectionReport,
    ) -> DaemonResult<Position> {
        match &report.placed {
            Some(placed) => {
                position.mark_protected(placed.order_id.clone(), placed.kind, placed.stop_price);
                info!(
                    symbol = %position.symbol.as_pair(),
                    phase = %LifecyclePhase::HoldingProtected,
                    kind = %placed.kind,
                    stop_price = %placed.stop_price,
                    "Position protected"
                );
            },
            None => {
                position.mark_unprotected();
                error!(
                    symbol = %position.symbol.as_pair(),
                    phase = %LifecyclePhase::HoldingUnprotected,
                    attempts = report.attempts.len(),
                    unprotected_since = ?position.unprotected_since,
                    "Position unprotected, retrying next tick"
                );
            },
        }
        self.book.save_position(position.clone())?;
        Ok(position)
    }

    // =========================================================================
    // Holding → Exiting → Flat
    // =========================================================================

    async fn exit(
        &self,
        position: Position,
        reason: ExitReason,
        price: Price,
    ) -> DaemonResult<CycleOutcome> {
        let symbol = position.symbol.clone();
        info!(symbol = %symbol.as_pair(), phase = %LifecyclePhase::Exiting, ?reason, "Exiting position");

        // Protection orders lock the base balance
        let cleanup = self.protection.cancel_all(&symbol).await?;
        if !cleanup.failed.is_empty() {
            let mut position = position;
            let guarded = position
                .protection_order_id
                .as_ref()
                .is_some_and(|id| cleanup.failed.contains(id));
            if !guarded {
                position.mark_unprotected();
            }
            let remaining = position.quantity.as_decimal();
            let detail = format!("orders {:?} could not be cancelled", cleanup.failed);
            return self.exit_incomplete(position, remaining, detail).await;
        }

        let balances = self.balances().await?;
        let free = balances.free(symbol.base()).min(position.quantity.as_decimal());
        let sellable = round_quantity(free, self.policy()).ok();

        let (sold, exit_price) = match sellable {
            Some(quantity) if quantity.notional_at(price) >= self.policy().min_notional => {
                let request =
                    OrderRequest::market_sell(symbol.clone(), quantity, new_client_order_id(EXIT_TAG));
                let order = self.retry.submit(self.exchange.as_ref(), &request).await?;
                (quantity.as_decimal(), order.average_price().unwrap_or(price))
            },
            _ => {
                warn!(
                    symbol = %symbol.as_pair(),
                    %free,
                    "Nothing free to sell"
                );
                (Decimal::ZERO, price)
            },
        };

        let unsold_cap = position.quantity.as_decimal() - sold;
        let unsold = match self.balances().await {
            Ok(after) => after.total(symbol.base()).min(unsold_cap),
            Err(e) if !sold.is_zero() => {
                warn!(symbol = %symbol.as_pair(), error = %e, "Balance read failed after sell");
                unsold_cap
            },
            Err(e) => return Err(e),
        };
        if unsold * price.as_decimal() >= self.policy().min_notional {
            let mut position = position;
            position.quantity = round_quantity(unsold, self.policy())?;
            position.mark_unprotected();
            let detail = format!("sold {} but {} {} is still held", sold, unsold, symbol.base());
            return self.exit_incomplete(position, unsold, detail).await;
        }

        self.record_exit(position, reason, exit_price).await
    }

    /// Keep the position tracked after an exit that left base on the account.
    async fn exit_incomplete(
        &self,
        position: Position,
        remaining: Decimal,
        detail: String,
    ) -> DaemonResult<CycleOutcome> {
        let symbol = position.symbol.clone();
        error!(
            symbol = %symbol.as_pair(),
            %remaining,
            protected = position.is_protected(),
            %detail,
            "Exit incomplete, position kept"
        );
        self.book.save_position(position)?;
        self.alerts
            .alert(Alert::critical(
                AlertKind::PermanentFailure,
                &symbol,
                format!("exit incomplete, position kept: {}", detail),
            ))
            .await;
        Err(DaemonError::ExitIncomplete { symbol, remaining })
    }

    /// Clear the position and update statistics in one commit.
    async fn record_exit(
        &self,
        position: Position,
        reason: ExitReason,
        exit_price: Price,
    ) -> DaemonResult<CycleOutcome> {
        let symbol = position.symbol.clone();
        let pnl = position.pnl_at(exit_price);

        // Leftover orders would otherwise outlive the position
        if let Err(e) = self.protection.cancel_all(&symbol).await {
            warn!(symbol = %symbol.as_pair(), error = %e, "Residual order cleanup failed");
        }

        let equity_after = match self.balances().await {
            Ok(balances) => self.equity(&balances, Some(&symbol)),
            Err(e) => {
                warn!(symbol = %symbol.as_pair(), error = %e, "Balance read failed after exit");
                self.book.statistics().peak_equity.max(Decimal::ZERO)
            },
        };

        let (_, outcome) = self.book.close_position(&symbol, pnl, equity_after)?;
        info!(
            symbol = %symbol.as_pair(),
            phase = %LifecyclePhase::Flat,
            ?reason,
            %exit_price,
            %pnl,
            ?outcome,
            "Position closed"
        );

        Ok(CycleOutcome::Exited {
            reason,
            exit_price: exit_price.as_decimal(),
            pnl,
        })
    }

    // =========================================================================
    // Startup Reconciliation
    // =========================================================================

    /// Compare committed state with exchange truth for every symbol.
    pub async fn reconcile(&self, symbols: &[Symbol]) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for symbol in symbols {
            let Some(_token) = self.try_own(symbol) else {
                continue;
            };
            if let Err(e) = self.reconcile_symbol(symbol, &mut report).await {
                error!(symbol = %symbol.as_pair(), error = %e, "Reconciliation failed");
                report.failed.push(symbol.clone());
            }
        }
        info!(
            closed = report.closed.len(),
            reconstructed = report.reconstructed.len(),
            unprotected = report.unprotected.len(),
            untracked = report.untracked.len(),
            failed = report.failed.len(),
            "Startup reconciliation complete"
        );
        report
    }

    async fn reconcile_symbol(
        &self,
        symbol: &Symbol,
        report: &mut ReconcileReport,
    ) -> DaemonResult<()> {
        let price = self.ticker(symbol).await?;
        let balances = self.balances().await?;
        let protection_orders = self.protection.protection_orders(symbol).await?;

        match self.book.position(symbol) {
            Some(mut position) => {
                if self.is_depleted(&balances, &position, price) {
                    warn!(symbol = %symbol.as_pair(), "Tracked position has no balance, closing");
                    let stop = position.stop_price;
                    self.record_exit(position, ExitReason::Reconciled, stop).await?;
                    report.closed.push(symbol.clone());
                    return Ok(());
                }

                let tracked_live = position.protection_order_id.as_ref().is_some_and(|id| {
                    protection_orders.iter().any(|o| &o.order_id == id)
                });
                if !tracked_live {
                    warn!(symbol = %symbol.as_pair(), "Tracked protection missing, flagged for retry");
                    position.mark_unprotected();
                    self.book.save_position(position)?;
                    report.unprotected.push(symbol.clone());
                }
            },
            None => {
                let adopted = protection_orders
                    .iter()
                    .filter(|o| o.side == OrderSide::Sell)
                    .max_by_key(|o| o.orig_quantity);
                if let Some(order) = adopted {
                    self.reconstruct(symbol, order, price).await?;
                    report.reconstructed.push(symbol.clone());
                    return Ok(());
                }

                let held = balances.total(symbol.base());
                if held * price.as_decimal() >= self.policy().min_notional {
                    self.adopt_balance(symbol, held, price).await?;
                    report.untracked.push(symbol.clone());
                }
            },
        }
        Ok(())
    }

    /// Rebuild a tracked position from a live protection order.
    async fn reconstruct(
        &self,
        symbol: &Symbol,
        order: &ExchangeOrder,
        price: Price,
    ) -> DaemonResult<()> {
        let quantity = Quantity::new(order.orig_quantity - order.executed_quantity)?;
        let stop_price = match order.order_type.stop_price() {
            Some(stop) => stop,
            None => initial_stop(price, self.policy())?,
        };
        let kind = order
            .order_type
            .protection_kind()
            .unwrap_or(ProtectionKind::StopMarket);

        let mut position = Position::open(symbol.clone(), quantity, price, stop_price, None);
        position.reconstructed = true;
        position.mark_protected(order.order_id.clone(), kind, stop_price);
        self.book.open_position(position)?;

        warn!(
            symbol = %symbol.as_pair(),
            order_id = %order.order_id,
            %quantity,
            %stop_price,
            "Reconstructed position from untracked protection order"
        );
        self.alerts
            .alert(Alert::warning(
                AlertKind::UntrackedPosition,
                symbol,
                format!(
                    "adopted {} {} guarded by order {}",
                    quantity,
                    symbol.base(),
                    order.order_id
                ),
            ))
            .await;
        Ok(())
    }

    /// Track a bare balance so the next tick protects it.
    async fn adopt_balance(&self, symbol: &Symbol, held: Decimal, price: Price) -> DaemonResult<()> {
        let quantity = round_quantity(held, self.policy())?;
        let mut position =
            Position::open(symbol.clone(), quantity, price, initial_stop(price, self.policy())?, None);
        position.reconstructed = true;
        position.mark_unprotected();
        self.book.open_position(position)?;

        warn!(
            symbol = %symbol.as_pair(),
            %quantity,
            %price,
            "Adopted untracked balance, protection pending"
        );
        self.alerts
            .alert(Alert::warning(
                AlertKind::UntrackedPosition,
                symbol,
                format!("adopted {} {} held without tracking or protection", quantity, symbol.base()),
            ))
            .await;
        Ok(())
    }

    // =========================================================================
    // Exchange Reads
    // =========================================================================

    async fn ticker(&self, symbol: &Symbol) -> DaemonResult<Price> {
        let exchange = &self.exchange;
        let ticker = self.retry.run("fetch_ticker", move || exchange.fetch_ticker(symbol)).await?;
        Ok(ticker.price)
    }

    async fn balances(&self) -> DaemonResult<AccountBalances> {
        let exchange = &self.exchange;
        Ok(self.retry.run("fetch_balance", move || exchange.fetch_balance()).await?)
    }

    async fn order_is_open(&self, symbol: &Symbol, order_id: &str) -> DaemonResult<bool> {
        let exchange = &self.exchange;
        let orders = self
            .retry
            .run("fetch_open_orders", move || exchange.fetch_open_orders(symbol))
            .await?;
        Ok(orders.iter().any(|o| o.order_id == order_id))
    }

    /// Quote balance plus every other tracked position at its entry price.
    fn equity(&self, balances: &AccountBalances, exclude: Option<&Symbol>) -> Decimal {
        let positions: Decimal = self
            .book
            .snapshot()
            .positions
            .values()
            .filter(|p| Some(&p.symbol) != exclude)
            .map(Position::entry_notional)
            .sum();
        balances.total(&self.settings.quote_asset) + positions
    }

    /// Remaining base is worth less than the exchange minimum
    fn is_depleted(&self, balances: &AccountBalances, position: &Position, price: Price) -> bool {
        let held = balances.total(position.symbol.base()).min(position.quantity.as_decimal());
        held * price.as_decimal() < self.policy().min_notional
    }
}

/// Kelly inputs once enough closed trades exist
pub fn kelly_inputs(statistics: &TradingStatistics) -> Option<KellyInputs> {
    if statistics.total_trades < KELLY_MIN_TRADES {
        return None;
    }
    Some(KellyInputs {
        win_rate: statistics.win_rate()?,
        avg_win: statistics.average_win()?,
        avg_loss: statistics.average_loss()?,
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_exec::{QueuedSignals, RecordingAlerts, StubExchange};
    use bastion_store::MemoryStateStore;
    use rust_decimal_macros::dec;

    struct Harness {
        exchange: Arc<StubExchange>,
        alerts: Arc<RecordingAlerts>,
        signals: Arc<QueuedSignals>,
        store: Arc<MemoryStateStore>,
        controller: LifecycleController,
    }

    fn sol() -> Symbol {
        Symbol::from_pair("SOLUSDT").unwrap()
    }

    fn harness_with(store: MemoryStateStore) -> Harness {
        let exchange = Arc::new(StubExchange::new());
        exchange.set_price("SOLUSDT", dec!(150));
        exchange.set_balance("USDT", dec!(51.14));

        let alerts = Arc::new(RecordingAlerts::new());
        let signals = Arc::new(QueuedSignals::new());
        let store = Arc::new(store);
        let book = Arc::new(StateBook::open(store.clone()).unwrap());

        let controller = LifecycleController::new(
            exchange.clone(),
            alerts.clone(),
            signals.clone(),
            book,
            SizingPolicy::default(),
            ProtectionPolicy::default(),
            RetryPolicy::immediate(3),
            LifecycleSettings {
                quote_asset: "USDT".to_string(),
                min_confidence: dec!(0.6),
            },
        );

        Harness {
            exchange,
            alerts,
            signals,
            store,
            controller,
        }
    }

    fn harness() -> Harness {
        harness_with(MemoryStateStore::new())
    }

    fn buy(confidence: Decimal) -> TradeIntent {
        TradeIntent::new(OrderSide::Buy, confidence).unwrap()
    }

    fn sell() -> TradeIntent {
        TradeIntent::new(OrderSide::Sell, dec!(0.9)).unwrap()
    }

    #[tokio::test]
    async fn test_entry_sizes_persists_and_protects() {
        let h = harness();

        let outcome = h.controller.handle_intent(&sol(), buy(dec!(0.8))).await.unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::Entered {
                quantity: dec!(0.1),
                entry_price: dec!(150),
                notional: dec!(15.00),
                protected: true,
            }
        );
        let position = h.controller.book().position(&sol()).unwrap();
        assert_eq!(position.protection_kind, Some(ProtectionKind::TrailingStopMarket));
        assert_eq!(position.stop_price.as_decimal(), dec!(147));
        assert_eq!(position.take_profit_price.unwrap().as_decimal(), dec!(156));
        assert!(position.unprotected_since.is_none());
        assert_eq!(h.exchange.open_orders("SOLUSDT").len(), 1);
        // opened, then protected
        assert_eq!(h.store.commit_count(), 2);
    }

    #[tokio::test]
    async fn test_low_confidence_intent_ignored() {
        let h = harness();

        let outcome = h.controller.handle_intent(&sol(), buy(dec!(0.3))).await.unwrap();

        assert!(matches!(outcome, CycleOutcome::IntentIgnored { .. }));
        assert_eq!(h.exchange.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_sell_while_flat_ignored() {
        let h = harness();

        let outcome = h.controller.handle_intent(&sol(), sell()).await.unwrap();

        assert!(matches!(outcome, CycleOutcome::IntentIgnored { .. }));
        assert_eq!(h.exchange.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_entry_fails_closed_without_capital() {
        let h = harness();
        h.exchange.set_balance("USDT", dec!(0));

        let outcome = h.controller.handle_intent(&sol(), buy(dec!(0.9))).await.unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::EntryDeclined {
                reason: "no capital available".to_string()
            }
        );
        assert!(h.controller.book().position(&sol()).is_none());
        assert_eq!(h.exchange.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_entry_fails_closed_below_min_notional() {
        let h = harness();
        // 50% of 8 = 4 < 5 minimum
        h.exchange.set_balance("USDT", dec!(8));

        let outcome = h.controller.handle_intent(&sol(), buy(dec!(0.9))).await.unwrap();

        assert!(matches!(outcome, CycleOutcome::EntryDeclined { .. }));
        assert_eq!(h.exchange.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_tick_consumes_queued_intent() {
        let h = harness();
        h.signals.push(sol(), buy(dec!(0.9))).await;

        let outcome = h.controller.tick(&sol()).await.unwrap();

        assert!(matches!(outcome, CycleOutcome::Entered { .. }));
        assert_eq!(h.signals.pending(&sol()).await, 0);
        assert_eq!(h.controller.tick(&sol()).await.unwrap(), CycleOutcome::Holding {
            phase: LifecyclePhase::HoldingProtected
        });
    }

    #[tokio::test]
    async fn test_busy_symbol_is_skipped() {
        let h = harness();
        let _token = h.controller.try_own(&sol()).unwrap();

        let outcome = h.controller.tick(&sol()).await.unwrap();

        assert_eq!(outcome, CycleOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_unprotected_position_retried_each_tick() {
        let h = harness();
        for kind in ProtectionKind::DEFAULT_ORDER {
            h.exchange.reject_kind(kind);
        }

        let outcome = h.controller.handle_intent(&sol(), buy(dec!(0.9))).await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Entered { protected: false, .. }));
        assert_eq!(h.alerts.count(AlertKind::UnprotectedPosition), 1);

        let position = h.controller.book().position(&sol()).unwrap();
        assert!(position.unprotected_since.is_some());

        h.exchange.accept_kind(ProtectionKind::StopMarket);
        let outcome = h.controller.tick(&sol()).await.unwrap();

        assert_eq!(outcome, CycleOutcome::Holding {
            phase: LifecyclePhase::HoldingProtected
        });
        let position = h.controller.book().position(&sol()).unwrap();
        assert_eq!(position.protection_kind, Some(ProtectionKind::StopMarket));
    }

    #[tokio::test]
    async fn test_sell_intent_exits_and_records_statistics() {
        let h = harness();
        h.controller.handle_intent(&sol(), buy(dec!(0.9))).await.unwrap();
        h.exchange.set_price("SOLUSDT", dec!(153));

        let outcome = h.controller.handle_intent(&sol(), sell()).await.unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::Exited {
                reason: ExitReason::Signal,
                exit_price: dec!(153),
                pnl: dec!(0.3),
            }
        );
        assert!(h.exchange.open_orders("SOLUSDT").is_empty());
        let committed = h.store.committed().unwrap();
        assert!(committed.positions.is_empty());
        assert_eq!(committed.statistics.winning_trades, 1);
        assert_eq!(h.exchange.balance_total("SOL"), dec!(0));
    }

    #[tokio::test]
    async fn test_exit_kept_when_orders_cannot_be_cancelled() {
        let h = harness();
        h.controller.handle_intent(&sol(), buy(dec!(0.9))).await.unwrap();
        h.exchange.set_reject_cancels(true);

        let result = h.controller.handle_intent(&sol(), sell()).await;

        assert!(matches!(result, Err(DaemonError::ExitIncomplete { .. })));
        let position = h.controller.book().position(&sol()).unwrap();
        assert!(position.is_protected());
        assert_eq!(h.controller.book().statistics().total_trades, 0);
        assert_eq!(h.exchange.balance_total("SOL"), dec!(0.1));
        assert_eq!(h.alerts.count(AlertKind::PermanentFailure), 1);

        h.exchange.set_reject_cancels(false);
        let outcome = h.controller.handle_intent(&sol(), sell()).await.unwrap();

        assert!(matches!(
            outcome,
            CycleOutcome::Exited {
                reason: ExitReason::Signal,
                ..
            }
        ));
        assert_eq!(h.controller.book().statistics().total_trades, 1);
        assert_eq!(h.exchange.balance_total("SOL"), dec!(0));
    }

    #[tokio::test]
    async fn test_take_profit_exit() {
        let h = harness();
        h.controller.handle_intent(&sol(), buy(dec!(0.9))).await.unwrap();
        h.exchange.set_price("SOLUSDT", dec!(157));

        let outcome = h.controller.tick(&sol()).await.unwrap();

        assert!(matches!(
            outcome,
            CycleOutcome::Exited {
                reason: ExitReason::TakeProfit,
                ..
            }
        ));
        assert!(h.controller.book().position(&sol()).is_none());
    }

    #[tokio::test]
    async fn test_protection_fill_detected() {
        let h = harness();
        h.exchange.reject_kind(ProtectionKind::TrailingStopMarket);
        h.controller.handle_intent(&sol(), buy(dec!(0.9))).await.unwrap();

        h.exchange.set_price("SOLUSDT", dec!(146));
        assert_eq!(h.exchange.trigger_protection("SOLUSDT"), 1);

        let outcome = h.controller.tick(&sol()).await.unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::Exited {
                reason: ExitReason::ProtectionFilled,
                exit_price: dec!(147),
                pnl: dec!(-0.3),
            }
        );
        let statistics = h.controller.book().statistics();
        assert_eq!(statistics.losing_trades, 1);
        assert_eq!(statistics.consecutive_losses, 1);
    }

    #[tokio::test]
    async fn test_vanished_protection_replaced() {
        let h = harness();
        h.controller.handle_intent(&sol(), buy(dec!(0.9))).await.unwrap();
        let before = h.controller.book().position(&sol()).unwrap();
        let order_id = before.protection_order_id.clone().unwrap();
        h.exchange.cancel_order(&sol(), &order_id).await.unwrap();

        let outcome = h.controller.tick(&sol()).await.unwrap();

        assert_eq!(outcome, CycleOutcome::Holding {
            phase: LifecyclePhase::HoldingProtected
        });
        let after = h.controller.book().position(&sol()).unwrap();
        assert_ne!(after.protection_order_id, Some(order_id));
        assert_eq!(h.exchange.open_orders("SOLUSDT").len(), 1);
    }

    #[tokio::test]
    async fn test_unprotected_stop_breach_exits() {
        let h = harness();
        for kind in ProtectionKind::DEFAULT_ORDER {
            h.exchange.reject_kind(kind);
        }
        h.controller.handle_intent(&sol(), buy(dec!(0.9))).await.unwrap();
        h.exchange.set_price("SOLUSDT", dec!(146));

        let outcome = h.controller.tick(&sol()).await.unwrap();

        assert!(matches!(
            outcome,
            CycleOutcome::Exited {
                reason: ExitReason::StopBreached,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_stop_refresh_is_monotonic() {
        let h = harness();
        h.controller.handle_intent(&sol(), buy(dec!(0.9))).await.unwrap();

        h.exchange.set_price("SOLUSDT", dec!(155));
        h.controller.tick(&sol()).await.unwrap();
        let raised = h.controller.book().position(&sol()).unwrap().stop_price;
        assert_eq!(raised.as_decimal(), dec!(151.9));

        h.exchange.set_price("SOLUSDT", dec!(153));
        h.controller.tick(&sol()).await.unwrap();
        let kept = h.controller.book().position(&sol()).unwrap().stop_price;
        assert_eq!(kept, raised);
    }

    #[tokio::test]
    async fn test_reconcile_closes_depleted_position() {
        let mut document = bastion_store::StateDocument::default();
        document
            .open_position(Position::open(
                sol(),
                Quantity::new(dec!(0.1)).unwrap(),
                Price::new(dec!(150)).unwrap(),
                Price::new(dec!(147)).unwrap(),
                None,
            ))
            .unwrap();
        let h = harness_with(MemoryStateStore::with_document(document));

        let report = h.controller.reconcile(&[sol()]).await;

        assert_eq!(report.closed, vec![sol()]);
        assert!(h.controller.book().position(&sol()).is_none());
        assert_eq!(h.controller.book().statistics().total_trades, 1);
    }

    #[tokio::test]
    async fn test_reconcile_reconstructs_from_protection_order() {
        let h = harness();
        h.exchange.set_balance("SOL", dec!(0.2));
        let plan = bastion_engine::ProtectionPlan {
            kind: ProtectionKind::StopMarket,
            quantity: Quantity::new(dec!(0.2)).unwrap(),
            stop_price: Price::new(dec!(140)).unwrap(),
            limit_price: None,
            trailing_delta_bips: None,
            notional: dec!(28),
        };
        let request = OrderRequest::protection(sol(), &plan, "manual-stop".to_string());
        h.exchange.create_order(&request).await.unwrap();

        let report = h.controller.reconcile(&[sol()]).await;

        assert_eq!(report.reconstructed, vec![sol()]);
        let position = h.controller.book().position(&sol()).unwrap();
        assert!(position.reconstructed);
        assert!(position.is_protected());
        assert_eq!(position.stop_price.as_decimal(), dec!(140));
        assert_eq!(position.quantity.as_decimal(), dec!(0.2));
        assert_eq!(h.alerts.count(AlertKind::UntrackedPosition), 1);
    }

    #[tokio::test]
    async fn test_reconcile_flags_missing_protection() {
        let mut document = bastion_store::StateDocument::default();
        let mut position = Position::open(
            sol(),
            Quantity::new(dec!(0.1)).unwrap(),
            Price::new(dec!(150)).unwrap(),
            Price::new(dec!(147)).unwrap(),
            None,
        );
        position.mark_protected("gone".to_string(), ProtectionKind::StopMarket, position.stop_price);
        document.open_position(position).unwrap();
        let h = harness_with(MemoryStateStore::with_document(document));
        h.exchange.set_balance("SOL", dec!(0.1));

        let report = h.controller.reconcile(&[sol()]).await;

        assert_eq!(report.unprotected, vec![sol()]);
        let position = h.controller.book().position(&sol()).unwrap();
        assert!(!position.is_protected());

        // next tick re-attempts protection
        let outcome = h.controller.tick(&sol()).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Holding {
            phase: LifecyclePhase::HoldingProtected
        });
    }

    #[test]
    fn test_kelly_inputs_need_history() {
        let mut statistics = TradingStatistics::default();
        assert!(kelly_inputs(&statistics).is_none());

        for i in 0..KELLY_MIN_TRADES {
            let pnl = if i % 2 == 0 { dec!(2) } else { dec!(-1) };
            statistics.record_exit(pnl, dec!(100));
        }
        let inputs = kelly_inputs(&statistics).unwrap();
        assert_eq!(inputs.win_rate, dec!(0.5));
        assert_eq!(inputs.avg_win, dec!(2));
    }
}
