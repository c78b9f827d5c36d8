//! Integration test: restart recovery from the state file.
//!
//! A daemon instance enters and protects a position, then "crashes".
//! A fresh instance over the same state file and exchange must pick the
//! position back up and reconcile it against what the exchange shows.

use std::sync::Arc;

use bastion_domain::{ExitReason, OrderSide, ProtectionKind, Symbol, TradeIntent};
use bastion_engine::{ProtectionPolicy, SizingPolicy};
use bastion_exec::{ExchangePort, QueuedSignals, RecordingAlerts, RetryPolicy, StubExchange};
use bastion_store::{FileStateStore, StateBook};
use bastiond::{CycleOutcome, LifecycleController, LifecycleSettings};
use rust_decimal_macros::dec;

fn controller(exchange: Arc<StubExchange>, state: &std::path::Path) -> LifecycleController {
    let store = Arc::new(FileStateStore::new(state, 3));
    let book = Arc::new(StateBook::open(store).unwrap());
    LifecycleController::new(
        exchange,
        Arc::new(RecordingAlerts::new()),
        Arc::new(QueuedSignals::new()),
        book,
        SizingPolicy::default(),
        ProtectionPolicy::default(),
        RetryPolicy::immediate(3),
        LifecycleSettings {
            quote_asset: "USDT".to_string(),
            min_confidence: dec!(0.6),
        },
    )
}

fn exchange() -> Arc<StubExchange> {
    let exchange = Arc::new(StubExchange::new());
    exchange.set_price("SOLUSDT", dec!(150));
    exchange.set_balance("USDT", dec!(51.14));
    exchange
}

fn sol() -> Symbol {
    Symbol::from_pair("SOLUSDT").unwrap()
}

async fn enter(controller: &LifecycleController) {
    let intent = TradeIntent::new(OrderSide::Buy, dec!(0.9)).unwrap();
    let outcome = controller.handle_intent(&sol(), intent).await.unwrap();
    assert!(matches!(outcome, CycleOutcome::Entered { protected: true, .. }));
}

#[tokio::test]
async fn test_restart_resumes_protected_position() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state.json");
    let exchange = exchange();

    let before = controller(exchange.clone(), &state);
    enter(&before).await;
    let tracked = before.book().position(&sol()).unwrap();
    drop(before);

    let after = controller(exchange.clone(), &state);
    let report = after.reconcile(&[sol()]).await;

    assert!(report.closed.is_empty());
    assert!(report.unprotected.is_empty());
    let resumed = after.book().position(&sol()).unwrap();
    assert_eq!(resumed.trade_id, tracked.trade_id);
    assert_eq!(resumed.protection_order_id, tracked.protection_order_id);
}

#[tokio::test]
async fn test_protection_lost_while_down_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state.json");
    let exchange = exchange();

    let before = controller(exchange.clone(), &state);
    enter(&before).await;
    let order_id = before.book().position(&sol()).unwrap().protection_order_id.unwrap();
    drop(before);

    // Someone cancels the stop while the daemon is down
    exchange.cancel_order(&sol(), &order_id).await.unwrap();

    let after = controller(exchange.clone(), &state);
    let report = after.reconcile(&[sol()]).await;
    assert_eq!(report.unprotected, vec![sol()]);

    let outcome = after.tick(&sol()).await.unwrap();
    assert!(matches!(outcome, CycleOutcome::Holding { .. }));
    let position = after.book().position(&sol()).unwrap();
    assert!(position.is_protected());
    assert_ne!(position.protection_order_id.as_deref(), Some(order_id.as_str()));
    assert_eq!(exchange.open_orders("SOLUSDT").len(), 1);
}

#[tokio::test]
async fn test_stop_filled_while_down_closes_position() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state.json");
    let exchange = exchange();
    exchange.reject_kind(ProtectionKind::TrailingStopMarket);

    let before = controller(exchange.clone(), &state);
    enter(&before).await;
    drop(before);

    exchange.set_price("SOLUSDT", dec!(145));
    assert_eq!(exchange.trigger_protection("SOLUSDT"), 1);

    let after = controller(exchange.clone(), &state);
    let report = after.reconcile(&[sol()]).await;

    assert_eq!(report.closed, vec![sol()]);
    assert!(after.book().position(&sol()).is_none());
    let statistics = after.book().statistics();
    assert_eq!(statistics.total_trades, 1);
    assert_eq!(statistics.losing_trades, 1);
}

#[tokio::test]
async fn test_untracked_stop_order_is_adopted() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state.json");
    let exchange = exchange();

    // Position opened by an earlier run whose state file was lost
    let lost = tempfile::tempdir().unwrap();
    let earlier = controller(exchange.clone(), &lost.path().join("state.json"));
    enter(&earlier).await;
    drop(earlier);

    let after = controller(exchange.clone(), &state);
    let report = after.reconcile(&[sol()]).await;

    assert_eq!(report.reconstructed, vec![sol()]);
    let adopted = after.book().position(&sol()).unwrap();
    assert!(adopted.reconstructed);
    assert_eq!(adopted.quantity.as_decimal(), dec!(0.1));

    // Adopted positions exit like any other
    let intent = TradeIntent::new(OrderSide::Sell, dec!(0.9)).unwrap();
    let outcome = after.handle_intent(&sol(), intent).await.unwrap();
    assert!(matches!(
        outcome,
        CycleOutcome::Exited {
            reason: ExitReason::Signal,
            ..
        }
    ));
    assert!(exchange.open_orders("SOLUSDT").is_empty());
}

#[tokio::test]
async fn test_bare_balance_is_adopted_and_protected() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state.json");
    let exchange = exchange();
    // Entry filled but the process died before the state write
    exchange.set_balance("SOL", dec!(0.1));

    let after = controller(exchange.clone(), &state);
    let report = after.reconcile(&[sol()]).await;

    assert_eq!(report.untracked, vec![sol()]);
    let adopted = after.book().position(&sol()).unwrap();
    assert!(adopted.reconstructed);
    assert!(!adopted.is_protected());
    assert_eq!(adopted.quantity.as_decimal(), dec!(0.1));
    assert_eq!(adopted.stop_price.as_decimal(), dec!(147));

    let outcome = after.tick(&sol()).await.unwrap();

    assert!(matches!(outcome, CycleOutcome::Holding { .. }));
    assert!(after.book().position(&sol()).unwrap().is_protected());
    assert_eq!(exchange.open_orders("SOLUSDT").len(), 1);
}
