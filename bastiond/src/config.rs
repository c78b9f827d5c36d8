//! Daemon configuration.
//!
//! Loads configuration from environment variables with sensible defaults.
//! A `.env` file in the working directory is read first when present.

use crate::error::{DaemonError, DaemonResult};
use bastion_domain::{ProtectionKind, Symbol};
use bastion_engine::{CapBand, KellyBounds, ProtectionPolicy, SizingPolicy, SizingTier};
use bastion_exec::RetryPolicy;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

// =============================================================================
// Configuration
// =============================================================================

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// API server configuration
    pub api: ApiConfig,

    /// Engine configuration
    pub engine: EngineConfig,

    /// State file configuration
    pub store: StoreConfig,

    /// Exchange credentials
    pub exchange: ExchangeConfig,

    /// Environment (test, development, production)
    pub environment: Environment,

    /// Log output format
    pub log_format: LogFormat,
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Instruments traded by the control loop
    pub symbols: Vec<Symbol>,
    /// Asset equity is measured in
    pub quote_asset: String,
    /// Time between control cycles
    pub tick_interval: Duration,
    /// Intents below this confidence are ignored
    pub min_confidence: Decimal,
    pub sizing: SizingPolicy,
    pub protection: ProtectionPolicy,
    pub retry: RetryPolicy,
}

/// State file configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path of the JSON state document
    pub state_path: PathBuf,
    /// Number of `.bak.N` copies kept
    pub backup_retention: usize,
}

/// Exchange credentials.
#[derive(Clone, Default)]
pub struct ExchangeConfig {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub testnet: bool,
}

impl std::fmt::Debug for ExchangeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_secret", &self.api_secret.as_ref().map(|_| "<redacted>"))
            .field("testnet", &self.testnet)
            .finish()
    }
}

/// Environment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Test environment (uses stubs)
    Test,
    /// Development environment
    Development,
    /// Production environment
    Production,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> DaemonResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> DaemonResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let environment = match vars.get("BASTION_ENV") {
            None => Environment::Development,
            Some(raw) => match raw.to_lowercase().as_str() {
                "test" => Environment::Test,
                "development" | "dev" => Environment::Development,
                "production" | "prod" => Environment::Production,
                other => {
                    return Err(DaemonError::Config(format!(
                        "Invalid BASTION_ENV: {}. Expected: test, development, production",
                        other
                    )))
                },
            },
        };

        let log_format = match vars.get("BASTION_LOG_FORMAT").as_deref() {
            None | Some("text") | Some("pretty") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(DaemonError::Config(format!("Invalid BASTION_LOG_FORMAT: {}", other)))
            },
        };

        let api = ApiConfig {
            host: vars.get("BASTION_API_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: vars.parse("BASTION_API_PORT", 8080)?,
        };

        Ok(Self {
            api,
            engine: Self::load_engine_config(&vars)?,
            store: StoreConfig {
                state_path: vars
                    .get("BASTION_STATE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("data/state.json")),
                backup_retention: vars.parse("BASTION_BACKUP_RETENTION", 5)?,
            },
            exchange: ExchangeConfig {
                api_key: vars.get("BINANCE_API_KEY"),
                api_secret: vars.get("BINANCE_API_SECRET"),
                testnet: vars.parse("BINANCE_TESTNET", false)?,
            },
            environment,
            log_format,
        })
    }

    /// Create test configuration.
    pub fn test() -> Self {
        Self {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
            },
            engine: EngineConfig {
                retry: RetryPolicy::immediate(3),
                tick_interval: Duration::from_millis(50),
                ..EngineConfig::default()
            },
            store: StoreConfig::default(),
            exchange: ExchangeConfig::default(),
            environment: Environment::Test,
            log_format: LogFormat::Text,
        }
    }

    fn load_engine_config(vars: &Vars<'_>) -> DaemonResult<EngineConfig> {
        let defaults = EngineConfig::default();

        let symbols = match vars.get("BASTION_SYMBOLS") {
            Some(raw) => parse_symbols(&raw)?,
            None => defaults.symbols,
        };

        let min_notional = vars.decimal("BASTION_MIN_NOTIONAL", defaults.protection.min_notional)?;

        let sizing_defaults = SizingPolicy::default();
        let tiers = match vars.get("BASTION_SIZING_TIERS") {
            Some(raw) => parse_tiers(&raw)?,
            None => sizing_defaults.tiers().to_vec(),
        };
        let caps = match vars.get("BASTION_SIZING_CAPS") {
            Some(raw) => parse_caps(&raw)?,
            None => sizing_defaults.caps().to_vec(),
        };
        let sizing = SizingPolicy::new(
            tiers,
            caps,
            min_notional,
            vars.decimal("BASTION_DEFAULT_FRACTION", sizing_defaults.default_fraction())?,
            KellyBounds::default(),
        )?;

        let protection = ProtectionPolicy {
            fallback_order: match vars.get("BASTION_PROTECTION_ORDER") {
                Some(raw) => parse_protection_order(&raw)?,
                None => defaults.protection.fallback_order.clone(),
            },
            stop_loss_pct: vars.decimal("BASTION_STOP_LOSS_PERCENT", defaults.protection.stop_loss_pct)?,
            take_profit_pct: vars
                .decimal("BASTION_TAKE_PROFIT_PERCENT", defaults.protection.take_profit_pct)?,
            trailing_delta_pct: vars
                .decimal("BASTION_TRAILING_DELTA_PERCENT", defaults.protection.trailing_delta_pct)?,
            limit_offset_pct: vars
                .decimal("BASTION_STOP_LIMIT_OFFSET_PERCENT", defaults.protection.limit_offset_pct)?,
            min_notional,
            quantity_precision: vars
                .parse("BASTION_QUANTITY_PRECISION", defaults.protection.quantity_precision)?,
            price_precision: vars.parse("BASTION_PRICE_PRECISION", defaults.protection.price_precision)?,
        };
        protection.validate()?;

        let retry = RetryPolicy {
            max_attempts: vars.parse("BASTION_RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
            base_delay: Duration::from_millis(vars.parse(
                "BASTION_RETRY_BASE_DELAY_MS",
                duration_millis(defaults.retry.base_delay),
            )?),
            call_timeout: Duration::from_secs(
                vars.parse("BASTION_REQUEST_TIMEOUT_SECS", defaults.retry.call_timeout.as_secs())?,
            ),
            ..defaults.retry
        };

        let min_confidence = vars.decimal("BASTION_MIN_CONFIDENCE", defaults.min_confidence)?;
        if min_confidence < Decimal::ZERO || min_confidence > Decimal::ONE {
            return Err(DaemonError::Config(format!(
                "BASTION_MIN_CONFIDENCE must be within [0, 1], got {}",
                min_confidence
            )));
        }

        let tick_secs: u64 =
            vars.parse("BASTION_TICK_INTERVAL_SECS", defaults.tick_interval.as_secs())?;
        if tick_secs == 0 {
            return Err(DaemonError::Config("BASTION_TICK_INTERVAL_SECS must be > 0".to_string()));
        }

        Ok(EngineConfig {
            symbols,
            quote_asset: vars
                .get("BASTION_QUOTE_ASSET")
                .map(|q| q.to_uppercase())
                .unwrap_or(defaults.quote_asset),
            tick_interval: Duration::from_secs(tick_secs),
            min_confidence,
            sizing,
            protection,
            retry,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            engine: EngineConfig::default(),
            store: StoreConfig::default(),
            exchange: ExchangeConfig::default(),
            environment: Environment::Development,
            log_format: LogFormat::Text,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbols: Symbol::from_pair("BTCUSDT").into_iter().collect(),
            quote_asset: "USDT".to_string(),
            tick_interval: Duration::from_secs(30),
            min_confidence: dec!(0.6),
            sizing: SizingPolicy::default(),
            protection: ProtectionPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from("data/state.json"),
            backup_retention: 5,
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Test => write!(f, "test"),
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

// =============================================================================
// Parsing
// =============================================================================

/// Typed access to a key/value source.
struct Vars<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Vars<'_> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> DaemonResult<T> {
        match self.get(key) {
            Some(val) => val
                .parse::<T>()
                .map_err(|_| DaemonError::Config(format!("Invalid {} value: {}", key, val))),
            None => Ok(default),
        }
    }

    fn decimal(&self, key: &str, default: Decimal) -> DaemonResult<Decimal> {
        self.parse(key, default)
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// `SOLUSDT,BTCUSDT` → symbols, duplicates removed.
pub fn parse_symbols(raw: &str) -> DaemonResult<Vec<Symbol>> {
    let mut symbols: Vec<Symbol> = Vec::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let symbol = Symbol::from_pair(pair)?;
        if !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }
    if symbols.is_empty() {
        return Err(DaemonError::Config("BASTION_SYMBOLS is empty".to_string()));
    }
    Ok(symbols)
}

fn parse_pairs(key: &str, raw: &str) -> DaemonResult<Vec<(Decimal, Decimal)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|entry| {
            let (left, right) = entry
                .split_once(':')
                .ok_or_else(|| DaemonError::Config(format!("Invalid {} entry: {}", key, entry)))?;
            let parse = |s: &str| {
                Decimal::from_str(s.trim())
                    .map_err(|_| DaemonError::Config(format!("Invalid {} entry: {}", key, entry)))
            };
            Ok((parse(left)?, parse(right)?))
        })
        .collect()
}

/// `25:12.5,50:15` → equity threshold / target notional tiers.
pub fn parse_tiers(raw: &str) -> DaemonResult<Vec<SizingTier>> {
    Ok(parse_pairs("BASTION_SIZING_TIERS", raw)?
        .into_iter()
        .map(|(equity_threshold, target_notional)| SizingTier {
            equity_threshold,
            target_notional,
        })
        .collect())
}

/// `0:0.5,100:0.3` → equity floor / cap fraction bands.
pub fn parse_caps(raw: &str) -> DaemonResult<Vec<CapBand>> {
    Ok(parse_pairs("BASTION_SIZING_CAPS", raw)?
        .into_iter()
        .map(|(equity_floor, cap_fraction)| CapBand {
            equity_floor,
            cap_fraction,
        })
        .collect())
}

/// `trailing,stop_market,stop_limit` → fallback order.
pub fn parse_protection_order(raw: &str) -> DaemonResult<Vec<ProtectionKind>> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(|k| ProtectionKind::from_str(k).map_err(DaemonError::from))
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
