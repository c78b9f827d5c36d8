//! Daemon: Main runtime orchestrator.
//!
//! The Daemon ties together all components:
//! - Lifecycle controller (one control cycle per symbol per tick)
//! - State book (durable positions and statistics)
//! - Signal queue and alert sinks
//! - API Server (HTTP endpoints)
//!
//! # Lifecycle
//!
//! 1. Load configuration
//! 2. Initialize components (exchange, state file, alerts)
//! 3. Reconcile committed state with the exchange
//! 4. Start API server
//! 5. Tick loop
//! 6. Graceful shutdown on SIGINT or cancellation

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use bastion_connectors::BinanceSpotClient;
use bastion_exec::{
    AlertSink, ExchangePort, FanoutAlerts, QueuedSignals, RecordingAlerts, StubExchange,
    TracingAlerts,
};
use bastion_store::{FileStateStore, MemoryStateStore, StateBook, StateStore};

use crate::api::{create_router, ApiState};
use crate::config::{Config, Environment};
use crate::error::{DaemonError, DaemonResult};
use crate::lifecycle::{CycleOutcome, LifecycleController, LifecycleSettings, ReconcileReport};

// =============================================================================
// Daemon
// =============================================================================

/// The main Bastion daemon.
pub struct Daemon {
    /// Configuration
    config: Config,
    /// Lifecycle controller shared with tick tasks
    controller: Arc<LifecycleController>,
    /// Intent queue fed by the API
    signals: Arc<QueuedSignals>,
    /// Committed state
    book: Arc<StateBook>,
    /// In-process alert history for `/status`
    recorder: Arc<RecordingAlerts>,
    /// Stops the tick loop
    shutdown: CancellationToken,
}

impl Daemon {
    /// Create a daemon with stub exchange and in-memory state (for testing/development).
    pub fn stub(config: Config, exchange: Arc<StubExchange>) -> DaemonResult<Self> {
        Self::assemble(config, exchange, Arc::new(MemoryStateStore::new()))
    }

    /// Create a daemon from configuration.
    ///
    /// The test environment runs against the stub exchange; every other
    /// environment needs Binance credentials and uses the state file.
    pub fn from_config(config: Config) -> DaemonResult<Self> {
        if config.environment == Environment::Test {
            return Self::stub(config, Arc::new(StubExchange::new()));
        }

        let (Some(key), Some(secret)) =
            (config.exchange.api_key.clone(), config.exchange.api_secret.clone())
        else {
            return Err(DaemonError::Config(
                "BINANCE_API_KEY and BINANCE_API_SECRET are required".to_string(),
            ));
        };
        let client = if config.exchange.testnet {
            BinanceSpotClient::testnet(key, secret)
        } else {
            BinanceSpotClient::new(key, secret)
        }
        .with_timeout(config.engine.retry.call_timeout);
        info!(base_url = %client.base_url(), "Using Binance spot exchange");

        let store = FileStateStore::new(
            config.store.state_path.clone(),
            config.store.backup_retention,
        );
        Self::assemble(config, Arc::new(client), Arc::new(store))
    }

    /// Wire components together.
    pub fn assemble(
        config: Config,
        exchange: Arc<dyn ExchangePort>,
        store: Arc<dyn StateStore>,
    ) -> DaemonResult<Self> {
        let book = Arc::new(StateBook::open(store)?);
        let signals = Arc::new(QueuedSignals::new());
        let recorder = Arc::new(RecordingAlerts::new());
        let sinks: Vec<Arc<dyn AlertSink>> = vec![Arc::new(TracingAlerts), recorder.clone()];
        let alerts: Arc<dyn AlertSink> = Arc::new(FanoutAlerts::new(sinks));

        let engine = &config.engine;
        let controller = Arc::new(LifecycleController::new(
            exchange,
            alerts,
            signals.clone(),
            book.clone(),
            engine.sizing.clone(),
            engine.protection.clone(),
            engine.retry,
            LifecycleSettings {
                quote_asset: engine.quote_asset.clone(),
                min_confidence: engine.min_confidence,
            },
        ));

        Ok(Self {
            config,
            controller,
            signals,
            book,
            recorder,
            shutdown: CancellationToken::new(),
        })
    }

    /// Token that stops [`Daemon::run`] when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn controller(&self) -> &Arc<LifecycleController> {
        &self.controller
    }

    /// Run the daemon.
    ///
    /// This method blocks until shutdown is requested (SIGINT or the token).
    pub async fn run(self) -> DaemonResult<()> {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            environment = %self.config.environment,
            symbols = self.config.engine.symbols.len(),
            "Starting Bastion daemon"
        );

        // 1. Reconcile with exchange truth before any new action
        self.reconcile().await;

        // 2. Start API server
        let api_addr = self.start_api_server().await?;
        info!(%api_addr, "API server started");

        // 3. Tick loop
        let mut interval = tokio::time::interval(self.config.engine.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(tick_interval = ?self.config.engine.tick_interval, "Entering control loop");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    self.shutdown.cancel();
                    break;
                }

                _ = interval.tick() => {
                    self.run_cycle().await;
                }
            }
        }

        // 4. Graceful shutdown
        self.shutdown_summary();
        Ok(())
    }

    /// Startup reconciliation for every configured symbol.
    pub async fn reconcile(&self) -> ReconcileReport {
        self.controller.reconcile(&self.config.engine.symbols).await
    }

    /// One tick across every symbol; symbols run concurrently.
    pub async fn run_cycle(&self) {
        let mut tasks = JoinSet::new();
        for symbol in self.config.engine.symbols.iter().cloned() {
            let controller = self.controller.clone();
            tasks.spawn(async move {
                let outcome = controller.tick(&symbol).await;
                (symbol, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((symbol, Ok(CycleOutcome::Idle))) => {
                    debug!(symbol = %symbol.as_pair(), "Idle");
                },
                Ok((symbol, Ok(outcome))) => {
                    info!(symbol = %symbol.as_pair(), ?outcome, "Cycle complete");
                },
                Ok((symbol, Err(e))) => {
                    error!(symbol = %symbol.as_pair(), error = %e, "Cycle failed, retrying next tick");
                },
                Err(e) => {
                    error!(error = %e, "Cycle task panicked");
                },
            }
        }
    }

    /// Start the API server.
    async fn start_api_server(&self) -> DaemonResult<SocketAddr> {
        let state = Arc::new(ApiState {
            book: self.book.clone(),
            signals: self.signals.clone(),
            symbols: self.config.engine.symbols.clone(),
            alerts: self.recorder.clone(),
        });

        let router = create_router(state);
        let addr = format!("{}:{}", self.config.api.host, self.config.api.port);

        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            DaemonError::Config(format!("Failed to bind to {}: {}", addr, e))
        })?;

        let local_addr = listener.local_addr().map_err(|e| {
            DaemonError::Config(format!("Failed to get local address: {}", e))
        })?;

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "API server error");
            }
        });

        Ok(local_addr)
    }

    fn shutdown_summary(&self) {
        let document = self.book.snapshot();
        let unprotected = document.positions.values().filter(|p| !p.is_protected()).count();
        if unprotected > 0 {
            warn!(unprotected, "Shutting down with unprotected positions");
        }
        info!(
            open_positions = document.positions.len(),
            total_trades = document.statistics.total_trades,
            "Shutdown complete"
        );
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_domain::{OrderSide, Symbol, TradeIntent};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn stub_daemon() -> (Daemon, Arc<StubExchange>) {
        let exchange = Arc::new(StubExchange::new());
        exchange.set_price("BTCUSDT", dec!(60000));
        exchange.set_balance("USDT", dec!(1000));
        let daemon = Daemon::stub(Config::test(), exchange.clone()).unwrap();
        (daemon, exchange)
    }

    #[tokio::test]
    async fn test_daemon_stub_creation() {
        let (daemon, _) = stub_daemon();

        assert!(daemon.book.snapshot().positions.is_empty());
        assert_eq!(daemon.reconcile().await, ReconcileReport::default());
    }

    #[tokio::test]
    async fn test_from_config_requires_credentials() {
        let mut config = Config::test();
        config.environment = Environment::Development;

        let result = Daemon::from_config(config);

        assert!(matches!(result, Err(DaemonError::Config(_))));
    }

    #[tokio::test]
    async fn test_daemon_api_server_start() {
        let (daemon, _) = stub_daemon();

        let addr = daemon.start_api_server().await.unwrap();
        assert!(addr.port() > 0);

        let client = reqwest::Client::new();
        let response = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .unwrap();

        assert!(response.status().is_success());
        daemon.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_run_cycle_processes_queued_intent() {
        let (daemon, exchange) = stub_daemon();
        let btc = Symbol::from_pair("BTCUSDT").unwrap();
        daemon
            .signals
            .push(btc.clone(), TradeIntent::new(OrderSide::Buy, dec!(0.9)).unwrap())
            .await;

        daemon.run_cycle().await;

        let position = daemon.book.position(&btc).unwrap();
        assert!(position.is_protected());
        assert_eq!(exchange.open_orders("BTCUSDT").len(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let (daemon, _) = stub_daemon();
        let token = daemon.shutdown_token();

        let handle = tokio::spawn(daemon.run());
        tokio::time::sleep(Duration::from_millis(120)).await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }
}
