//! HTTP API for the Bastion daemon.
//!
//! Provides REST endpoints for:
//! - Health check
//! - Status (tracked positions, statistics, recent alerts)
//! - Submitting trade intents
//! - Resetting trading statistics

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use bastion_domain::{OrderSide, Position, Symbol, TradeIntent, TradingStatistics};
use bastion_exec::{Alert, QueuedSignals, RecordingAlerts};
use bastion_store::StateBook;

use crate::error::DaemonError;

/// Alerts returned by `/status`
const RECENT_ALERTS: usize = 20;

// =============================================================================
// API State
// =============================================================================

/// Shared state for API handlers.
pub struct ApiState {
    pub book: Arc<StateBook>,
    pub signals: Arc<QueuedSignals>,
    pub symbols: Vec<Symbol>,
    pub alerts: Arc<RecordingAlerts>,
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Status response.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub open_positions: usize,
    pub positions: Vec<PositionSummary>,
    pub statistics: TradingStatistics,
    pub recent_alerts: Vec<Alert>,
}

/// Summary of a tracked position.
#[derive(Debug, Serialize, Deserialize)]
pub struct PositionSummary {
    pub symbol: String,
    pub phase: String,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub stop_price: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protection_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protection_order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unprotected_since: Option<DateTime<Utc>>,
    pub reconstructed: bool,
}

/// Request to queue a trade intent.
#[derive(Debug, Deserialize)]
pub struct IntentRequest {
    pub symbol: String,
    pub side: String,
    pub confidence: Decimal,
}

/// Response after queueing an intent.
#[derive(Debug, Serialize, Deserialize)]
pub struct IntentResponse {
    pub intent_id: Uuid,
    pub symbol: String,
    pub side: String,
    pub pending: usize,
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

// =============================================================================
// Router
// =============================================================================

/// Create the API router.
pub fn create_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/intents", post(intent_handler))
        .route("/statistics/reset", post(reset_statistics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint.
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Tracked positions, statistics and recent alerts.
async fn status_handler(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    let document = state.book.snapshot();
    let positions: Vec<PositionSummary> =
        document.positions.values().map(position_to_summary).collect();

    let mut alerts = state.alerts.alerts();
    let skip = alerts.len().saturating_sub(RECENT_ALERTS);
    let recent_alerts = alerts.split_off(skip);

    Json(StatusResponse {
        open_positions: positions.len(),
        positions,
        statistics: document.statistics,
        recent_alerts,
    })
}

/// Queue an intent for the next cycle of its symbol.
async fn intent_handler(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<IntentRequest>,
) -> Result<(StatusCode, Json<IntentResponse>), ApiError> {
    let symbol = Symbol::from_pair(&req.symbol).map_err(|e| to_error_response(e.into()))?;
    if !state.symbols.contains(&symbol) {
        return Err(to_error_response(DaemonError::UnknownSymbol(symbol.as_pair())));
    }

    let side: OrderSide = req.side.parse().map_err(|e: bastion_domain::DomainError| {
        to_error_response(e.into())
    })?;
    let intent = TradeIntent::new(side, req.confidence).map_err(|e| to_error_response(e.into()))?;
    let intent_id = intent.intent_id;

    state.signals.push(symbol.clone(), intent).await;
    let pending = state.signals.pending(&symbol).await;

    Ok((
        StatusCode::ACCEPTED,
        Json(IntentResponse {
            intent_id,
            symbol: symbol.as_pair(),
            side: side.to_string(),
            pending,
        }),
    ))
}

/// Clear trading statistics.
async fn reset_statistics_handler(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<TradingStatistics>, ApiError> {
    state
        .book
        .reset_statistics()
        .map_err(|e| to_error_response(e.into()))?;
    Ok(Json(state.book.statistics()))
}

// =============================================================================
// Helpers
// =============================================================================

fn to_error_response(error: DaemonError) -> ApiError {
    let status = match &error {
        DaemonError::Domain(_) | DaemonError::UnknownSymbol(_) => StatusCode::BAD_REQUEST,
        DaemonError::Exec(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

fn position_to_summary(position: &Position) -> PositionSummary {
    PositionSummary {
        symbol: position.symbol.as_pair(),
        phase: position.phase().to_string(),
        quantity: position.quantity.as_decimal(),
        entry_price: position.entry_price.as_decimal(),
        stop_price: position.stop_price.as_decimal(),
        take_profit_price: position.take_profit_price.map(|p| p.as_decimal()),
        protection_kind: position.protection_kind.map(|k| k.to_string()),
        protection_order_id: position.protection_order_id.clone(),
        unprotected_since: position.unprotected_since,
        reconstructed: position.reconstructed,
    }
}

// =============================================================================
// Tests
// =============================================================================
