//! HTTP Request Surface
//!
//! axum router for the bridge API.
//!
//! # Endpoints
//!
//! - `GET /health` - Session descriptor (no auth, never touches the broker)
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /metrics` - Prometheus metrics in text format
//! - `GET /status` - Managed accounts and connection state
//! - `GET /price/{symbol}` - Quote for one symbol
//! - `GET /quotes?symbols=A,B` - Quotes keyed by symbol
//! - `POST /order` - Submit and track an order
//! - `GET /positions` - Account positions
//!
//! Every route except the first three requires `X-API-Key`.

pub mod auth;
pub mod error;
mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::{Router, middleware};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{
    AccountService, MarketDataService, OrderExecutionService, SessionManager,
};
use crate::infrastructure::config::SharedSecret;

pub use error::{ApiError, ErrorBody};
pub use handlers::{HealthResponse, PriceQuery, QuotesQuery};

// =============================================================================
// State
// =============================================================================

/// Services shared by every handler.
#[derive(Debug)]
pub struct AppState {
    /// Session of record.
    pub session: Arc<SessionManager>,
    /// Quote service.
    pub market_data: MarketDataService,
    /// Order service.
    pub orders: OrderExecutionService,
    /// Account queries.
    pub accounts: AccountService,
    /// Shared secret for privileged routes.
    pub secret: SharedSecret,
    /// Wait budget for quote requests.
    pub quote_wait: Duration,
}

/// Build the router.
#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    let privileged = Router::new()
        .route("/status", get(handlers::status))
        .route("/price/{symbol}", get(handlers::price))
        .route("/quotes", get(handlers::quotes))
        .route("/order", post(handlers::order))
        .route("/positions", get(handlers::positions))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_api_key,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/healthz", get(handlers::liveness))
        .route("/metrics", get(handlers::metrics))
        .merge(privileged)
        .with_state(state)
}

// =============================================================================
// Server
// =============================================================================

/// Bridge HTTP server.
pub struct HttpServer {
    port: u16,
    state: Arc<AppState>,
    cancel: CancellationToken,
}

impl HttpServer {
    /// Create a new server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<AppState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if binding fails or the server stops with
    /// a fatal error.
    pub async fn run(self) -> Result<(), HttpServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "HTTP server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
