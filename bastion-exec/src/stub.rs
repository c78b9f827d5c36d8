//! Stub implementations for testing.
//!
//! `StubExchange` keeps an in-memory spot account: balances, last prices
//! and an order book. Market orders fill immediately at the configured
//! price; stop orders rest until cancelled or triggered by the test.
//! Failures (rejections per order type, timeouts, read errors) are
//! injected explicitly.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bastion_domain::{OrderSide, Price, ProtectionKind, Symbol};

use crate::error::{ExecError, ExecResult};
use crate::ports::{
    AccountBalances, Balance, ExchangeOrder, ExchangePort, OrderAmount, OrderRequest,
    OrderStatus, OrderType, Ticker,
};

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn balance_mut<'a>(balances: &'a mut HashMap<String, Balance>, asset: &str) -> &'a mut Balance {
    balances.entry(asset.to_string()).or_insert_with(|| Balance {
        asset: asset.to_string(),
        ..Balance::default()
    })
}

// =============================================================================
// Stub Exchange
// =============================================================================

/// Stub spot exchange for testing.
#[derive(Debug, Default)]
pub struct StubExchange {
    /// Last price by pair
    prices: RwLock<HashMap<String, Decimal>>,
    /// Balances by asset
    balances: RwLock<HashMap<String, Balance>>,
    /// Every order ever accepted, newest last
    orders: RwLock<Vec<ExchangeOrder>>,
    /// Protection kinds refused for every symbol
    rejected_kinds: RwLock<HashSet<ProtectionKind>>,
    /// Error returned by the next create call
    fail_next_create: RwLock<Option<ExecError>>,
    order_counter: AtomicU64,
    create_calls: AtomicU32,
    timeout_next_create: AtomicBool,
    fail_open_orders: AtomicBool,
    fail_next_cancel: AtomicBool,
    reject_cancels: AtomicBool,
}

impl StubExchange {
    /// Create an empty stub exchange.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set last price for a pair (e.g. "SOLUSDT").
    pub fn set_price(&self, pair: &str, price: Decimal) {
        write(&self.prices).insert(pair.to_string(), price);
    }

    /// Set the free balance of an asset, keeping its locked amount.
    pub fn set_balance(&self, asset: &str, free: Decimal) {
        balance_mut(&mut write(&self.balances), asset).free = free;
    }

    /// Free plus locked amount of an asset.
    pub fn balance_total(&self, asset: &str) -> Decimal {
        read(&self.balances).get(asset).map(Balance::total).unwrap_or(Decimal::ZERO)
    }

    /// Refuse every future order of `kind` with a parameter rejection.
    pub fn reject_kind(&self, kind: ProtectionKind) {
        write(&self.rejected_kinds).insert(kind);
    }

    /// Accept `kind` again.
    pub fn accept_kind(&self, kind: ProtectionKind) {
        write(&self.rejected_kinds).remove(&kind);
    }

    /// Fail the next create call with `error` (nothing reaches the book).
    pub fn fail_next_create(&self, error: ExecError) {
        *write(&self.fail_next_create) = Some(error);
    }

    /// Accept the next order but report a timeout to the caller.
    pub fn timeout_next_create(&self) {
        self.timeout_next_create.store(true, Ordering::SeqCst);
    }

    /// Make open-order reads fail until reset.
    pub fn set_fail_open_orders(&self, fail: bool) {
        self.fail_open_orders.store(fail, Ordering::SeqCst);
    }

    /// Fail the next cancel call.
    pub fn fail_next_cancel(&self) {
        self.fail_next_cancel.store(true, Ordering::SeqCst);
    }

    /// Reject every cancel with "unknown order" until reset.
    pub fn set_reject_cancels(&self, reject: bool) {
        self.reject_cancels.store(reject, Ordering::SeqCst);
    }

    /// Number of create calls received, including failed ones.
    pub fn create_calls(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Open orders for a pair, for assertions.
    pub fn open_orders(&self, pair: &str) -> Vec<ExchangeOrder> {
        read(&self.orders)
            .iter()
            .filter(|o| o.status.is_open() && o.symbol.as_pair() == pair)
            .cloned()
            .collect()
    }

    /// Fill every open stop order on `pair` as if the market hit it.
    ///
    /// Stop-type orders fill at their stop price, trailing orders at the
    /// current price. Returns the number of orders filled.
    pub fn trigger_protection(&self, pair: &str) -> usize {
        let market = read(&self.prices).get(pair).copied().unwrap_or(Decimal::ZERO);
        let mut orders = write(&self.orders);
        let mut balances = write(&self.balances);
        let mut filled = 0;

        for order in orders
            .iter_mut()
            .filter(|o| o.status.is_open() && o.order_type.is_stop() && o.symbol.as_pair() == pair)
        {
            let price = order.order_type.stop_price().map(|p| p.as_decimal()).unwrap_or(market);
            let quantity = order.orig_quantity;

            let base = balance_mut(&mut balances, order.symbol.base());
            base.locked = (base.locked - quantity).max(Decimal::ZERO);
            balance_mut(&mut balances, order.symbol.quote()).free += quantity * price;

            order.status = OrderStatus::Filled;
            order.executed_quantity = quantity;
            order.cumulative_quote = quantity * price;
            order.updated_at = Utc::now();
            filled += 1;
        }
        filled
    }

    fn next_order_id(&self) -> String {
        let id = self.order_counter.fetch_add(1, Ordering::SeqCst) + 1;
        id.to_string()
    }

    fn price_of(&self, symbol: &Symbol) -> ExecResult<Decimal> {
        read(&self.prices)
            .get(&symbol.as_pair())
            .copied()
            .ok_or_else(|| ExecError::from_remote(-1121, "Invalid symbol."))
    }

    /// Apply balance effects and build the resulting order
    fn execute(&self, request: &OrderRequest) -> ExecResult<ExchangeOrder> {
        let symbol = &request.symbol;
        let price = self.price_of(symbol)?;
        let insufficient = || {
            ExecError::from_remote(-2010, "Account has insufficient balance for requested action.")
        };

        let mut balances = write(&self.balances);
        let base_asset = symbol.base();
        let quote_asset = symbol.quote();

        let (status, orig, executed, cumulative) = match (request.order_type, request.side) {
            (OrderType::Market, OrderSide::Buy) => {
                let (quantity, cost) = match request.amount {
                    OrderAmount::Quote(notional) => {
                        let qty = (notional / price)
                            .round_dp_with_strategy(8, RoundingStrategy::ToZero);
                        (qty, qty * price)
                    },
                    OrderAmount::Base(qty) => (qty.as_decimal(), qty.as_decimal() * price),
                };
                let quote = balance_mut(&mut balances, quote_asset);
                if quote.free < cost {
                    return Err(insufficient());
                }
                quote.free -= cost;
                balance_mut(&mut balances, base_asset).free += quantity;
                (OrderStatus::Filled, quantity, quantity, cost)
            },
            (OrderType::Market, OrderSide::Sell) => {
                let OrderAmount::Base(qty) = request.amount else {
                    return Err(ExecError::from_remote(-1106, "quoteOrderQty sent when not required."));
                };
                let quantity = qty.as_decimal();
                let base = balance_mut(&mut balances, base_asset);
                if base.free < quantity {
                    return Err(insufficient());
                }
                base.free -= quantity;
                balance_mut(&mut balances, quote_asset).free += quantity * price;
                (OrderStatus::Filled, quantity, quantity, quantity * price)
            },
            (order_type, OrderSide::Sell) if order_type.is_stop() => {
                let OrderAmount::Base(qty) = request.amount else {
                    return Err(ExecError::from_remote(-1106, "quoteOrderQty sent when not required."));
                };
                let quantity = qty.as_decimal();
                let base = balance_mut(&mut balances, base_asset);
                if base.free < quantity {
                    return Err(insufficient());
                }
                base.free -= quantity;
                base.locked += quantity;
                (OrderStatus::New, quantity, Decimal::ZERO, Decimal::ZERO)
            },
            _ => return Err(ExecError::from_remote(-1116, "Invalid orderType.")),
        };

        Ok(ExchangeOrder {
            order_id: self.next_order_id(),
            client_order_id: request.client_order_id.clone(),
            symbol: symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            status,
            orig_quantity: orig,
            executed_quantity: executed,
            cumulative_quote: cumulative,
            updated_at: Utc::now(),
        })
    }
}

#[async_trait]
impl ExchangePort for StubExchange {
    async fn fetch_balance(&self) -> ExecResult<AccountBalances> {
        Ok(AccountBalances {
            balances: read(&self.balances).clone(),
        })
    }

    async fn fetch_ticker(&self, symbol: &Symbol) -> ExecResult<Ticker> {
        let price = Price::new(self.price_of(symbol)?)?;
        Ok(Ticker {
            symbol: symbol.clone(),
            price,
            observed_at: Utc::now(),
        })
    }

    async fn fetch_open_orders(&self, symbol: &Symbol) -> ExecResult<Vec<ExchangeOrder>> {
        if self.fail_open_orders.load(Ordering::SeqCst) {
            return Err(ExecError::Network("Simulated open orders failure".to_string()));
        }
        Ok(self.open_orders(&symbol.as_pair()))
    }

    async fn create_order(&self, request: &OrderRequest) -> ExecResult<ExchangeOrder> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = write(&self.fail_next_create).take() {
            return Err(error);
        }

        let duplicate = read(&self.orders).iter().any(|o| {
            o.status.is_open() && o.client_order_id == request.client_order_id
        });
        if duplicate {
            return Err(ExecError::from_remote(-2010, "Duplicate order sent."));
        }

        if let Some(kind) = request.order_type.protection_kind() {
            if read(&self.rejected_kinds).contains(&kind) {
                return Err(ExecError::from_remote(
                    -2010,
                    format!("Order type {} not supported for this symbol.", kind),
                ));
            }
        }

        let order = self.execute(request)?;
        write(&self.orders).push(order.clone());
        tracing::debug!(order_id = %order.order_id, client_order_id = %order.client_order_id, "Stub: order accepted");

        if self.timeout_next_create.swap(false, Ordering::SeqCst) {
            return Err(ExecError::Timeout("Simulated create timeout".to_string()));
        }
        Ok(order)
    }

    async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> ExecResult<()> {
        if self.fail_next_cancel.swap(false, Ordering::SeqCst) {
            return Err(ExecError::Network("Simulated cancel failure".to_string()));
        }
        if self.reject_cancels.load(Ordering::SeqCst) {
            return Err(ExecError::from_remote(-2011, "Unknown order sent."));
        }

        let mut orders = write(&self.orders);
        let order = orders
            .iter_mut()
            .find(|o| o.order_id == order_id && &o.symbol == symbol && o.status.is_open())
            .ok_or_else(|| ExecError::from_remote(-2011, "Unknown order sent."))?;

        order.status = OrderStatus::Canceled;
        order.updated_at = Utc::now();

        if order.side == OrderSide::Sell {
            let remaining = order.orig_quantity - order.executed_quantity;
            let mut balances = write(&self.balances);
            let base = balance_mut(&mut balances, symbol.base());
            base.locked = (base.locked - remaining).max(Decimal::ZERO);
            base.free += remaining;
        }

        tracing::debug!(order_id, "Stub: order cancelled");
        Ok(())
    }

    async fn fetch_order(
        &self,
        symbol: &Symbol,
        client_order_id: &str,
    ) -> ExecResult<Option<ExchangeOrder>> {
        Ok(read(&self.orders)
            .iter()
            .rev()
            .find(|o| o.client_order_id == client_order_id && &o.symbol == symbol)
            .cloned())
    }
}

// =============================================================================
// Tests
// =============================================================================
