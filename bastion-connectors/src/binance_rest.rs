//! Binance REST API Client for Spot Trading
//!
//! Implements `ExchangePort` against the spot REST API:
//! - Account balances, ticker price and open orders
//! - Market entries/exits and stop-type protection orders
//! - Order lookup by client order id (timeout reconciliation)
//!
//! # Authentication
//!
//! Binance uses API key + secret with HMAC SHA256 signatures.
//! All signed requests require:
//! - `X-MBX-APIKEY` header
//! - `signature` query parameter (HMAC SHA256 of query string)
//! - `timestamp` query parameter
//!
//! # Protection order mapping
//!
//! | Engine kind            | Binance type                   |
//! |------------------------|--------------------------------|
//! | `TrailingStopMarket`   | `STOP_LOSS` + `trailingDelta`  |
//! | `StopMarket`           | `STOP_LOSS` + `stopPrice`      |
//! | `StopLimit`            | `STOP_LOSS_LIMIT` (GTC)        |

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;

use bastion_domain::{OrderSide, Price, Symbol};
use bastion_exec::{
    AccountBalances, Balance, ExchangeOrder, ExchangePort, ExecError, ExecResult, OrderAmount,
    OrderRequest, OrderStatus, OrderType, Ticker,
};

// =============================================================================
// Constants
// =============================================================================

/// Binance REST API base URL (Spot)
const BINANCE_API_URL: &str = "https://api.binance.com";

/// Binance spot testnet base URL
const BINANCE_TESTNET_URL: &str = "https://testnet.binance.vision";

/// Default request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Signed request validity window in milliseconds
const RECV_WINDOW_MS: u64 = 5000;

type HmacSha256 = Hmac<Sha256>;

// =============================================================================
// Errors
// =============================================================================

/// Errors that can occur in the Binance REST client.
#[derive(Debug, Clone, Error)]
pub enum BinanceRestError {
    /// Failed to build request signature
    #[error("Failed to build signature: {0}")]
    SignatureError(String),

    /// HTTP request failed before a response arrived
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    /// Non-success HTTP status without a Binance error body
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// API returned error
    #[error("Binance API error: {code} - {msg}")]
    ApiError { code: i64, msg: String },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Request timed out
    #[error("Request timed out")]
    Timeout,

    /// Request cannot be expressed as a Binance order
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl From<BinanceRestError> for ExecError {
    fn from(err: BinanceRestError) -> Self {
        match err {
            BinanceRestError::ApiError { code, msg } => ExecError::from_remote(code, msg),
            BinanceRestError::HttpStatus { status, body } => match status {
                418 | 429 => ExecError::RateLimited(body),
                500..=599 => ExecError::Server {
                    status,
                    message: body,
                },
                _ => ExecError::Remote {
                    code: i64::from(status),
                    message: body,
                },
            },
            BinanceRestError::RequestFailed(msg) => ExecError::Network(msg),
            BinanceRestError::Timeout => ExecError::Timeout("binance request".to_string()),
            BinanceRestError::ParseError(msg) => ExecError::InvalidResponse(msg),
            BinanceRestError::InvalidParameter(msg) | BinanceRestError::SignatureError(msg) => {
                ExecError::Rejected { code: 0, message: msg }
            },
        }
    }
}

// =============================================================================
// Binance Spot Client
// =============================================================================

/// Binance REST API client for spot trading.
pub struct BinanceSpotClient {
    /// HTTP client
    client: Client,
    /// API key
    api_key: String,
    /// API secret
    api_secret: String,
    base_url: String,
    request_timeout: Duration,
}

impl BinanceSpotClient {
    /// Create a new Binance REST client.
    ///
    /// # Arguments
    ///
    /// * `api_key` - Binance API key
    /// * `api_secret` - Binance API secret
    pub fn new(api_key: String, api_secret: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            api_secret,
            base_url: BINANCE_API_URL.to_string(),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
        }
    }

    /// Create a client for the spot testnet.
    pub fn testnet(api_key: String, api_secret: String) -> Self {
        Self {
            base_url: BINANCE_TESTNET_URL.to_string(),
            ..Self::new(api_key, api_secret)
        }
    }

    /// Override the per-request timeout.
    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// HMAC SHA256 of `payload`, hex-encoded.
    fn sign(&self, payload: &str) -> Result<String, BinanceRestError> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| BinanceRestError::SignatureError(format!("HMAC error: {}", e)))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Build query string with signature for signed requests.
    fn build_signed_query(
        &self,
        mut params: Vec<(&'static str, String)>,
        timestamp_ms: i64,
    ) -> Result<String, BinanceRestError> {
        params.push(("recvWindow", RECV_WINDOW_MS.to_string()));
        params.push(("timestamp", timestamp_ms.to_string()));
        params.sort_by(|a, b| a.0.cmp(b.0));

        let query_string = encode_query(&params);
        let signature = self.sign(&query_string)?;
        Ok(format!("{}&signature={}", query_string, signature))
    }

    /// Send a GET request to a public endpoint.
    async fn get_public(
        &self,
        endpoint: &str,
        params: Vec<(&'static str, String)>,
    ) -> Result<String, BinanceRestError> {
        let url = if params.is_empty() {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}{}?{}", self.base_url, endpoint, encode_query(&params))
        };
        self.execute(self.client.get(&url)).await
    }

    /// Send a request to a signed endpoint.
    async fn send_signed(
        &self,
        method: Method,
        endpoint: &str,
        params: Vec<(&'static str, String)>,
    ) -> Result<String, BinanceRestError> {
        let query = self.build_signed_query(params, Utc::now().timestamp_millis())?;
        let url = format!("{}{}?{}", self.base_url, endpoint, query);
        debug!(%method, endpoint, "Binance signed request");

        let request = self
            .client
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key);
        self.execute(request).await
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<String, BinanceRestError> {
        let response = timeout(self.request_timeout, request.send())
            .await
            .map_err(|_| BinanceRestError::Timeout)?
            .map_err(|e| {
                if e.is_timeout() {
                    BinanceRestError::Timeout
                } else {
                    BinanceRestError::RequestFailed(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| BinanceRestError::ParseError(e.to_string()))?;
        check_status(status, body)
    }

    // =========================================================================
    // Endpoints
    // =========================================================================

    /// `GET /api/v3/account`
    async fn account(&self) -> Result<AccountResponse, BinanceRestError> {
        let body = self
            .send_signed(Method::GET, "/api/v3/account", vec![("omitZeroBalances", "true".to_string())])
            .await?;
        parse(&body)
    }

    /// `GET /api/v3/ticker/price` (public, no signature)
    async fn price(&self, symbol: &Symbol) -> Result<PriceResponse, BinanceRestError> {
        let body = self
            .get_public("/api/v3/ticker/price", vec![("symbol", symbol.as_pair())])
            .await?;
        parse(&body)
    }

    /// `GET /api/v3/openOrders`
    async fn open_orders(&self, symbol: &Symbol) -> Result<Vec<OrderResponse>, BinanceRestError> {
        let body = self
            .send_signed(Method::GET, "/api/v3/openOrders", vec![("symbol", symbol.as_pair())])
            .await?;
        parse(&body)
    }

    /// `POST /api/v3/order`
    async fn place(&self, request: &OrderRequest) -> Result<OrderResponse, BinanceRestError> {
        let body = self.send_signed(Method::POST, "/api/v3/order", order_params(request)?).await?;
        parse(&body)
    }

    /// `DELETE /api/v3/order`
    async fn cancel(&self, symbol: &Symbol, order_id: &str) -> Result<(), BinanceRestError> {
        self.send_signed(
            Method::DELETE,
            "/api/v3/order",
            vec![("symbol", symbol.as_pair()), ("orderId", order_id.to_string())],
        )
        .await?;
        Ok(())
    }

    /// `GET /api/v3/order` by client order id
    async fn query_order(
        &self,
        symbol: &Symbol,
        client_order_id: &str,
    ) -> Result<OrderResponse, BinanceRestError> {
        let body = self
            .send_signed(
                Method::GET,
                "/api/v3/order",
                vec![
                    ("symbol", symbol.as_pair()),
                    ("origClientOrderId", client_order_id.to_string()),
                ],
            )
            .await?;
        parse(&body)
    }

    /// Ping Binance API to check connectivity.
    pub async fn ping(&self) -> Result<(), BinanceRestError> {
        let body = self.get_public("/api/v3/ping", vec![]).await?;

        // Ping returns empty JSON object {}
        if body.trim() == "{}" {
            Ok(())
        } else {
            Err(BinanceRestError::ParseError(format!("Unexpected ping response: {}", body)))
        }
    }
}

#[async_trait]
impl ExchangePort for BinanceSpotClient {
    async fn fetch_balance(&self) -> ExecResult<AccountBalances> {
        let account = self.account().await?;
        let balances = account
            .balances
            .into_iter()
            .map(|b| {
                let balance = Balance {
                    asset: b.asset.clone(),
                    free: b.free,
                    locked: b.locked,
                };
                (b.asset, balance)
            })
            .collect::<HashMap<_, _>>();
        Ok(AccountBalances { balances })
    }

    async fn fetch_ticker(&self, symbol: &Symbol) -> ExecResult<Ticker> {
        let response = self.price(symbol).await?;
        let price = Price::new(response.price)?;
        Ok(Ticker {
            symbol: symbol.clone(),
            price,
            observed_at: Utc::now(),
        })
    }

    async fn fetch_open_orders(&self, symbol: &Symbol) -> ExecResult<Vec<ExchangeOrder>> {
        let orders = self.open_orders(symbol).await?;
        Ok(orders
            .into_iter()
            .map(|o| o.into_order(symbol, None))
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn create_order(&self, request: &OrderRequest) -> ExecResult<ExchangeOrder> {
        let response = self.place(request).await?;
        // RESULT responses omit trigger parameters; keep what was requested
        Ok(response.into_order(&request.symbol, Some(request.order_type))?)
    }

    async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> ExecResult<()> {
        Ok(self.cancel(symbol, order_id).await?)
    }

    async fn fetch_order(
        &self,
        symbol: &Symbol,
        client_order_id: &str,
    ) -> ExecResult<Option<ExchangeOrder>> {
        match self.query_order(symbol, client_order_id).await {
            Ok(response) => Ok(Some(response.into_order(symbol, None)?)),
            // NO_SUCH_ORDER: the placement never reached the book
            Err(BinanceRestError::ApiError { code: -2013, .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// Request Encoding
// =============================================================================

fn encode_query(params: &[(&'static str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn decimal_param(value: Decimal) -> String {
    value.normalize().to_string()
}

/// Parameters for `POST /api/v3/order`.
fn order_params(request: &OrderRequest) -> Result<Vec<(&'static str, String)>, BinanceRestError> {
    let mut params = vec![
        ("symbol", request.symbol.as_pair()),
        ("side", request.side.to_string()),
        ("newClientOrderId", request.client_order_id.clone()),
        ("newOrderRespType", "RESULT".to_string()),
    ];

    let quantity = match (request.order_type, request.amount) {
        (OrderType::Market, OrderAmount::Quote(notional)) => {
            params.push(("type", "MARKET".to_string()));
            params.push(("quoteOrderQty", decimal_param(notional)));
            return Ok(params);
        },
        (_, OrderAmount::Quote(_)) => {
            return Err(BinanceRestError::InvalidParameter(
                "quote amount is only supported for market orders".to_string(),
            ))
        },
        (_, OrderAmount::Base(quantity)) => quantity,
    };

    match request.order_type {
        OrderType::Market => {
            params.push(("type", "MARKET".to_string()));
        },
        OrderType::Limit { limit_price } => {
            params.push(("type", "LIMIT".to_string()));
            params.push(("timeInForce", "GTC".to_string()));
            params.push(("price", decimal_param(limit_price.as_decimal())));
        },
        OrderType::StopMarket { stop_price } => {
            params.push(("type", "STOP_LOSS".to_string()));
            params.push(("stopPrice", decimal_param(stop_price.as_decimal())));
        },
        OrderType::StopLimit {
            stop_price,
            limit_price,
        } => {
            params.push(("type", "STOP_LOSS_LIMIT".to_string()));
            params.push(("timeInForce", "GTC".to_string()));
            params.push(("stopPrice", decimal_param(stop_price.as_decimal())));
            params.push(("price", decimal_param(limit_price.as_decimal())));
        },
        OrderType::TrailingStopMarket { trailing_delta_bips } => {
            params.push(("type", "STOP_LOSS".to_string()));
            params.push(("trailingDelta", trailing_delta_bips.to_string()));
        },
        OrderType::Other => {
            return Err(BinanceRestError::InvalidParameter(
                "unsupported order type".to_string(),
            ))
        },
    }
    params.push(("quantity", decimal_param(quantity.as_decimal())));
    Ok(params)
}

// =============================================================================
// Response Decoding
// =============================================================================

fn check_status(status: StatusCode, body: String) -> Result<String, BinanceRestError> {
    if status.is_success() {
        return Ok(body);
    }
    // 5xx keeps its status so it stays retryable even with a code/msg body
    if status.is_server_error() {
        return Err(BinanceRestError::HttpStatus {
            status: status.as_u16(),
            body,
        });
    }
    if let Ok(err) = serde_json::from_str::<BinanceErrorResponse>(&body) {
        return Err(BinanceRestError::ApiError {
            code: err.code,
            msg: err.msg,
        });
    }
    Err(BinanceRestError::HttpStatus {
        status: status.as_u16(),
        body,
    })
}

fn parse<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, BinanceRestError> {
    serde_json::from_str(body).map_err(|e| BinanceRestError::ParseError(e.to_string()))
}

/// Binance error response.
#[derive(Debug, Deserialize)]
struct BinanceErrorResponse {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    balances: Vec<BalanceEntry>,
}

#[derive(Debug, Deserialize)]
struct BalanceEntry {
    asset: String,
    free: Decimal,
    locked: Decimal,
}

/// Price ticker response.
#[derive(Debug, Deserialize)]
struct PriceResponse {
    price: Decimal,
}

/// Order as returned by the order, openOrders and order-query endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: u64,
    client_order_id: String,
    #[serde(default)]
    price: Decimal,
    orig_qty: Decimal,
    executed_qty: Decimal,
    cummulative_quote_qty: Decimal,
    status: String,
    #[serde(rename = "type")]
    order_type: String,
    side: String,
    #[serde(default)]
    stop_price: Option<Decimal>,
    #[serde(default)]
    trailing_delta: Option<u32>,
    #[serde(default)]
    update_time: Option<i64>,
    #[serde(default)]
    transact_time: Option<i64>,
}

impl OrderResponse {
    fn into_order(
        self,
        symbol: &Symbol,
        requested_type: Option<OrderType>,
    ) -> Result<ExchangeOrder, BinanceRestError> {
        let order_type = match requested_type {
            Some(order_type) => order_type,
            None => self.decode_type()?,
        };
        let side: OrderSide = self
            .side
            .parse()
            .map_err(|e| BinanceRestError::ParseError(format!("side: {}", e)))?;
        let updated_at = self
            .update_time
            .or(self.transact_time)
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now);

        Ok(ExchangeOrder {
            order_id: self.order_id.to_string(),
            client_order_id: self.client_order_id,
            symbol: symbol.clone(),
            side,
            order_type,
            status: decode_status(&self.status)?,
            orig_quantity: self.orig_qty,
            executed_quantity: self.executed_qty,
            cumulative_quote: self.cummulative_quote_qty,
            updated_at,
        })
    }

    fn decode_type(&self) -> Result<OrderType, BinanceRestError> {
        let stop = || -> Result<Price, BinanceRestError> {
            let raw = self.stop_price.unwrap_or_default();
            Price::new(raw).map_err(|e| BinanceRestError::ParseError(format!("stopPrice: {}", e)))
        };
        let limit = || -> Result<Price, BinanceRestError> {
            Price::new(self.price).map_err(|e| BinanceRestError::ParseError(format!("price: {}", e)))
        };

        Ok(match (self.order_type.as_str(), self.trailing_delta) {
            ("MARKET", _) => OrderType::Market,
            ("LIMIT" | "LIMIT_MAKER", _) => OrderType::Limit {
                limit_price: limit()?,
            },
            ("STOP_LOSS", Some(trailing_delta_bips)) if trailing_delta_bips > 0 => {
                OrderType::TrailingStopMarket { trailing_delta_bips }
            },
            ("STOP_LOSS", _) => OrderType::StopMarket { stop_price: stop()? },
            ("STOP_LOSS_LIMIT", _) => OrderType::StopLimit {
                stop_price: stop()?,
                limit_price: limit()?,
            },
            _ => OrderType::Other,
        })
    }
}

fn decode_status(status: &str) -> Result<OrderStatus, BinanceRestError> {
    Ok(match status {
        "NEW" | "PENDING_NEW" => OrderStatus::New,
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "CANCELED" | "PENDING_CANCEL" => OrderStatus::Canceled,
        "REJECTED" => OrderStatus::Rejected,
        "EXPIRED" | "EXPIRED_IN_MATCH" => OrderStatus::Expired,
        other => return Err(BinanceRestError::ParseError(format!("order status {}", other))),
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_domain::{ProtectionKind, Quantity};
    use bastion_engine::ProtectionPlan;
    use rust_decimal_macros::dec;

    fn client(secret: &str) -> BinanceSpotClient {
        BinanceSpotClient::new("test_key".to_string(), secret.to_string())
    }

    fn sol() -> Symbol {
        Symbol::from_pair("SOLUSDT").unwrap()
    }

    fn param<'a>(params: &'a [(&'static str, String)], key: &str) -> Option<&'a str> {
        params.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_sign_matches_documented_vector() {
        let client = client("NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j");
        let payload = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";

        assert_eq!(
            client.sign(payload).unwrap(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_build_signed_query_sorts_params() {
        let client = client("test_secret");

        let params = vec![("symbol", "BTCUSDT".to_string()), ("side", "SELL".to_string())];
        let query = client.build_signed_query(params, 1_700_000_000_000).unwrap();

        assert!(query.contains("timestamp=1700000000000"));
        assert!(query.contains("recvWindow=5000"));
        let side_idx = query.find("side=").unwrap();
        let symbol_idx = query.find("symbol=").unwrap();
        assert!(side_idx < symbol_idx);

        let (unsigned, signature) = query.rsplit_once("&signature=").unwrap();
        assert_eq!(signature, client.sign(unsigned).unwrap());
    }

    #[test]
    fn test_testnet_base_url() {
        let client = BinanceSpotClient::testnet("k".to_string(), "s".to_string());
        assert_eq!(client.base_url(), BINANCE_TESTNET_URL);
    }

    #[test]
    fn test_market_buy_uses_quote_amount() {
        let request = OrderRequest::market_buy_quote(sol(), dec!(15.00), "bse1".to_string());
        let params = order_params(&request).unwrap();

        assert_eq!(param(&params, "type"), Some("MARKET"));
        assert_eq!(param(&params, "side"), Some("BUY"));
        assert_eq!(param(&params, "quoteOrderQty"), Some("15"));
        assert_eq!(param(&params, "quantity"), None);
        assert_eq!(param(&params, "newClientOrderId"), Some("bse1"));
    }

    #[test]
    fn test_protection_order_params() {
        let base = ProtectionPlan {
            kind: ProtectionKind::TrailingStopMarket,
            quantity: Quantity::new(dec!(0.10000)).unwrap(),
            stop_price: Price::new(dec!(147.00)).unwrap(),
            limit_price: None,
            trailing_delta_bips: Some(150),
            notional: dec!(14.70),
        };

        let trailing = order_params(&OrderRequest::protection(sol(), &base, "bsp1".into())).unwrap();
        assert_eq!(param(&trailing, "type"), Some("STOP_LOSS"));
        assert_eq!(param(&trailing, "trailingDelta"), Some("150"));
        assert_eq!(param(&trailing, "stopPrice"), None);
        assert_eq!(param(&trailing, "quantity"), Some("0.1"));

        let stop_market = ProtectionPlan {
            kind: ProtectionKind::StopMarket,
            trailing_delta_bips: None,
            ..base.clone()
        };
        let params = order_params(&OrderRequest::protection(sol(), &stop_market, "bsp2".into())).unwrap();
        assert_eq!(param(&params, "type"), Some("STOP_LOSS"));
        assert_eq!(param(&params, "stopPrice"), Some("147"));
        assert_eq!(param(&params, "trailingDelta"), None);

        let stop_limit = ProtectionPlan {
            kind: ProtectionKind::StopLimit,
            limit_price: Some(Price::new(dec!(146.70)).unwrap()),
            trailing_delta_bips: None,
            ..base
        };
        let params = order_params(&OrderRequest::protection(sol(), &stop_limit, "bsp3".into())).unwrap();
        assert_eq!(param(&params, "type"), Some("STOP_LOSS_LIMIT"));
        assert_eq!(param(&params, "price"), Some("146.7"));
        assert_eq!(param(&params, "timeInForce"), Some("GTC"));
    }

    #[test]
    fn test_quote_amount_rejected_for_stop_orders() {
        let request = OrderRequest {
            symbol: sol(),
            side: OrderSide::Sell,
            order_type: OrderType::StopMarket {
                stop_price: Price::new(dec!(147)).unwrap(),
            },
            amount: OrderAmount::Quote(dec!(15)),
            client_order_id: "x".to_string(),
        };
        assert!(matches!(order_params(&request), Err(BinanceRestError::InvalidParameter(_))));
    }

    #[test]
    fn test_decode_open_orders() {
        let body = r#"[
            {"symbol":"SOLUSDT","orderId":11,"clientOrderId":"bsp0192","price":"0.00","origQty":"0.10","executedQty":"0.00","cummulativeQuoteQty":"0.00","status":"NEW","timeInForce":"GTC","type":"STOP_LOSS","side":"SELL","stopPrice":"0.00","trailingDelta":150,"time":1700000000000,"updateTime":1700000000000},
            {"symbol":"SOLUSDT","orderId":12,"clientOrderId":"manual","price":"146.70","origQty":"0.10","executedQty":"0.00","cummulativeQuoteQty":"0.00","status":"NEW","timeInForce":"GTC","type":"STOP_LOSS_LIMIT","side":"SELL","stopPrice":"147.00","time":1700000000000,"updateTime":1700000000000}
        ]"#;

        let orders: Vec<OrderResponse> = parse(body).unwrap();
        let orders: Vec<ExchangeOrder> = orders
            .into_iter()
            .map(|o| o.into_order(&sol(), None).unwrap())
            .collect();

        assert_eq!(orders[0].order_id, "11");
        assert_eq!(orders[0].order_type, OrderType::TrailingStopMarket { trailing_delta_bips: 150 });
        assert!(orders[0].status.is_open());
        assert_eq!(
            orders[1].order_type,
            OrderType::StopLimit {
                stop_price: Price::new(dec!(147)).unwrap(),
                limit_price: Price::new(dec!(146.70)).unwrap(),
            }
        );
        assert_eq!(orders[1].updated_at.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_decode_market_fill() {
        let body = r#"{"symbol":"SOLUSDT","orderId":7,"orderListId":-1,"clientOrderId":"bse1","transactTime":1700000000000,"price":"0.00","origQty":"0.10000","executedQty":"0.10000","cummulativeQuoteQty":"15.00","status":"FILLED","timeInForce":"GTC","type":"MARKET","side":"BUY"}"#;

        let order = parse::<OrderResponse>(body)
            .unwrap()
            .into_order(&sol(), Some(OrderType::Market))
            .unwrap();

        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.average_price().unwrap().as_decimal(), dec!(150));
        assert_eq!(order.side, OrderSide::Buy);
    }

    #[test]
    fn test_status_mapping() {
        assert!(check_status(StatusCode::OK, "{}".into()).is_ok());

        let rejected = check_status(
            StatusCode::BAD_REQUEST,
            r#"{"code":-2010,"msg":"Order type not supported for this symbol."}"#.into(),
        )
        .unwrap_err();
        assert!(ExecError::from(rejected).is_rejection());

        let server = check_status(StatusCode::BAD_GATEWAY, "bad gateway".into()).unwrap_err();
        assert!(ExecError::from(server).is_transient());

        let throttled = check_status(StatusCode::TOO_MANY_REQUESTS, "slow down".into()).unwrap_err();
        assert!(matches!(ExecError::from(throttled), ExecError::RateLimited(_)));

        let unknown = check_status(
            StatusCode::BAD_REQUEST,
            r#"{"code":-2013,"msg":"Order does not exist."}"#.into(),
        )
        .unwrap_err();
        assert!(matches!(ExecError::from(unknown), ExecError::NotFound(_)));
    }

    #[test]
    fn test_unknown_status_is_parse_error() {
        assert!(decode_status("PENDING_SOMETHING").is_err());
        assert_eq!(decode_status("EXPIRED_IN_MATCH").unwrap(), OrderStatus::Expired);
    }
}
