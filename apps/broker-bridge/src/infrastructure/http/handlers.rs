//! Route handlers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use crate::application::services::AccountStatus;
use crate::domain::contract::{Contract, ContractHints, resolve};
use crate::domain::order::{OrderRequest, OrderStatus, Position};
use crate::domain::quote::{Quote, QuoteMode};
use crate::domain::session::{ClientId, SessionState};
use crate::error::BridgeError;
use crate::infrastructure::http::AppState;
use crate::infrastructure::http::error::ApiError;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Unauthenticated
// =============================================================================

/// `GET /health` body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// The process is up and serving.
    pub ok: bool,
    /// Gateway host.
    pub host: String,
    /// Gateway port.
    pub port: u16,
    /// Client id in use.
    pub client_id: ClientId,
    /// Paper-only policy flag.
    pub paper_only: bool,
    /// Market data type preference.
    pub market_data_type: &'static str,
    /// Whether the session is connected.
    pub connected: bool,
}

pub(super) async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let snapshot = state.session.snapshot();
    Json(HealthResponse {
        ok: true,
        host: snapshot.host,
        port: snapshot.port,
        client_id: snapshot.client_id,
        paper_only: snapshot.paper_only,
        market_data_type: state.session.config().market_data_type.as_str(),
        connected: snapshot.state == SessionState::Connected,
    })
}

pub(super) async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

pub(super) async fn metrics() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

// =============================================================================
// Authenticated
// =============================================================================

pub(super) async fn status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<AccountStatus>, ApiError> {
    Ok(Json(state.accounts.status().await?))
}

/// Query string of `GET /price/{symbol}`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuery {
    /// Exchange override.
    pub exchange: Option<String>,
    /// Currency override.
    pub currency: Option<String>,
    /// Asset-class hint.
    pub asset_class: Option<String>,
    /// Snapshot (default) or streaming request.
    pub snapshot: Option<bool>,
}

pub(super) async fn price(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(query): Query<PriceQuery>,
) -> Result<Json<Quote>, ApiError> {
    let hints = ContractHints {
        exchange: query.exchange,
        currency: query.currency,
        asset_class: query.asset_class,
    };
    let contract = resolve(&symbol, &hints)?;
    let quote = state
        .market_data
        .quote(&contract, quote_mode(query.snapshot), state.quote_wait)
        .await?;
    Ok(Json(quote))
}

/// Query string of `GET /quotes`.
#[derive(Debug, Default, Deserialize)]
pub struct QuotesQuery {
    /// Comma-separated symbols.
    pub symbols: Option<String>,
    /// Snapshot (default) or streaming requests.
    pub snapshot: Option<bool>,
}

pub(super) async fn quotes(
    State(state): State<Arc<AppState>>,
    Query(query): Query<QuotesQuery>,
) -> Result<Json<HashMap<String, Quote>>, ApiError> {
    let contracts = parse_symbols(query.symbols.as_deref().unwrap_or_default())?;
    let quotes = state
        .market_data
        .quotes(&contracts, quote_mode(query.snapshot), state.quote_wait)
        .await?;
    Ok(Json(quotes))
}

pub(super) async fn order(
    State(state): State<Arc<AppState>>,
    body: Result<Json<OrderRequest>, JsonRejection>,
) -> Result<Json<OrderStatus>, ApiError> {
    let Json(request) = body.map_err(|rejection| {
        BridgeError::validation("body", rejection.body_text())
    })?;
    Ok(Json(state.orders.execute(&request).await?))
}

pub(super) async fn positions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Position>>, ApiError> {
    Ok(Json(state.accounts.positions().await?))
}

fn quote_mode(snapshot: Option<bool>) -> QuoteMode {
    if snapshot.unwrap_or(true) {
        QuoteMode::Snapshot
    } else {
        QuoteMode::Streaming
    }
}

/// Split and resolve `A,B,C`, keyed by the symbol as requested.
fn parse_symbols(raw: &str) -> Result<Vec<(String, Contract)>, BridgeError> {
    let mut contracts = Vec::new();
    for symbol in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if contracts.iter().any(|(seen, _): &(String, Contract)| seen == symbol) {
            continue;
        }
        contracts.push((symbol.to_string(), resolve(symbol, &ContractHints::default())?));
    }

    if contracts.is_empty() {
        return Err(BridgeError::validation("symbols", "at least one symbol is required"));
    }
    Ok(contracts)
}
