#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Broker Bridge - Broker Connectivity Gateway
//!
//! An HTTP service that owns one session to a TWS / IB Gateway process and
//! serves quotes, orders and positions to authenticated callers. An
//! independent watchdog heartbeats the gateway and restarts it when it stops
//! answering.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Broker types and pure rules
//!   - `contract`: Symbol to instrument resolution
//!   - `order`: Order requests, validation and status
//!   - `quote`: Quote snapshots and market data preferences
//!   - `session`: Session descriptor and paper-only policy
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Broker gateway and process control interfaces
//!   - `services`: Session manager, market data, orders, accounts, watchdog
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `tws`: TWS socket API client
//!   - `http`: axum request surface and auth gate
//!   - `process`: Gateway restart commands
//!   - `config`: Environment configuration
//!   - `metrics`, `telemetry`: Observability
//!
//! # Request Flow
//!
//! ```text
//! HTTP ──► Auth Gate ──► Contract Resolver ──► Market Data / Orders
//!                                                     │
//!                                                     ▼
//!                                             Session Manager ──► TWS socket
//!
//! Watchdog (own timer, own client id) ──► TWS socket ──► ProcessControl
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core broker types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

/// Error taxonomy.
pub mod error;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::BridgeError;

// Domain types
pub use domain::contract::{AssetClass, Contract, ContractHints, resolve};
pub use domain::order::{OrderRequest, OrderSide, OrderState, OrderStatus, OrderType, Position};
pub use domain::quote::{MarketDataType, Quote, QuoteMode};
pub use domain::session::{ClientId, GatewayEndpoint, SafetyPolicy, SessionSnapshot, SessionState};

// Services
pub use application::services::{
    AccountService, HealthWatchdog, MarketDataService, OrderExecutionService, SessionConfig,
    SessionManager, WatchdogConfig,
};

// Infrastructure
pub use infrastructure::config::{BridgeConfig, ConfigError};
pub use infrastructure::http::{AppState, HttpServer, HttpServerError, router};
pub use infrastructure::metrics::init_metrics;
pub use infrastructure::process::{CommandProcessControl, LoggingProcessControl};
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
pub use infrastructure::tws::TwsGateway;
