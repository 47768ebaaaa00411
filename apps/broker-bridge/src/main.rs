//! Broker Bridge Binary
//!
//! Starts the HTTP gateway and, unless disabled, the in-process watchdog.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin broker-bridge
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `BRIDGE_SHARED_SECRET`: Value callers send in `X-API-Key`
//!
//! ## Optional
//! - `BROKER_HOST` / `BROKER_PORT` / `BROKER_LIVE_PORT`: Gateway address (default: 127.0.0.1:7497, live 7496)
//! - `BROKER_CLIENT_ID`: Base client id (default: 7)
//! - `BROKER_PAPER_ONLY`: Refuse the live port (default: true)
//! - `BROKER_MARKET_DATA_TYPE`: live | frozen | delayed | delayed-frozen (default: live)
//! - `BRIDGE_HTTP_PORT`: HTTP port (default: 8787)
//! - `WATCHDOG_ENABLED`: Run the watchdog in-process (default: true)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use broker_bridge::application::services::{
    AccountService, HealthWatchdog, MarketDataService, OrderExecutionService, SessionManager,
};
use broker_bridge::infrastructure::http::{AppState, HttpServer};
use broker_bridge::infrastructure::{config, process, telemetry};
use broker_bridge::{BridgeConfig, TwsGateway, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Upper bound on the in-flight work drained after a shutdown signal.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting broker bridge");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed, /metrics disabled");
    }

    let config = BridgeConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let gateway = Arc::new(TwsGateway::new());

    let session = Arc::new(SessionManager::new(gateway.clone(), config.session_config()));
    let state = Arc::new(AppState {
        market_data: MarketDataService::new(Arc::clone(&session)),
        orders: OrderExecutionService::new(Arc::clone(&session), config.order_config()),
        accounts: AccountService::new(Arc::clone(&session), config.broker.connect_timeout),
        session: Arc::clone(&session),
        secret: config.shared_secret.clone(),
        quote_wait: config.timing.quote_wait,
    });

    // Connect eagerly so the first request does not pay for the handshake.
    // Failure is not fatal: every request retries through the ladder.
    if let Err(e) = session.ensure_connected().await {
        tracing::warn!(error = %e, "Initial broker connection failed");
    }

    let watchdog_handle = if config.watchdog.enabled {
        let watchdog = Arc::new(HealthWatchdog::new(
            gateway,
            process::from_command(&config.watchdog.restart_command),
            config.watchdog_config(),
        ));
        Some(tokio::spawn(watchdog.run(shutdown_token.clone())))
    } else {
        tracing::info!("In-process watchdog disabled");
        None
    };

    let server = HttpServer::new(config.server.http_port, state, shutdown_token.clone());
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    tracing::info!("Broker bridge ready");

    await_shutdown(shutdown_token.clone()).await;

    let drain = async {
        let _ = server_handle.await;
        if let Some(handle) = watchdog_handle {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
        tracing::warn!("Shutdown timed out waiting for tasks");
    }

    session.shutdown().await;

    tracing::info!("Broker bridge stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &BridgeConfig) {
    tracing::info!(
        host = %config.broker.host,
        port = config.broker.port,
        live_port = config.broker.live_port,
        client_id = config.broker.client_id,
        paper_only = config.broker.paper_only,
        market_data_type = config.broker.market_data_type.as_str(),
        http_port = config.server.http_port,
        "Configuration loaded"
    );
    tracing::debug!(
        watchdog_enabled = config.watchdog.enabled,
        watchdog_client_id = config.watchdog.client_id,
        watchdog_interval_secs = config.watchdog.interval.as_secs(),
        threshold = config.watchdog.failure_threshold,
        "Watchdog settings"
    );
}

/// Wait for SIGINT or SIGTERM, then cancel `shutdown_token`.
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
