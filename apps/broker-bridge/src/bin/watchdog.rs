//! Standalone Gateway Watchdog
//!
//! Runs only the health watchdog, for deployments that keep it in its own
//! process so it survives a bridge crash.
//!
//! ```bash
//! cargo run --bin bridge-watchdog
//! ```
//!
//! Reads the `BROKER_*` and `WATCHDOG_*` variables; `WATCHDOG_ENABLED` is
//! ignored here.

use std::sync::Arc;

use anyhow::Context;
use broker_bridge::application::services::HealthWatchdog;
use broker_bridge::infrastructure::config::{self, WatchdogProcessConfig};
use broker_bridge::infrastructure::{process, telemetry};
use broker_bridge::{TelemetryConfig, TwsGateway, init_metrics};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::load_dotenv();

    let _telemetry_guard = telemetry::init_with_config(
        TelemetryConfig::from_env().with_service_name("bridge-watchdog"),
    )
    .context("failed to initialize telemetry")?;

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let settings = WatchdogProcessConfig::from_env();
    let watchdog = Arc::new(HealthWatchdog::new(
        Arc::new(TwsGateway::new()),
        process::from_command(&settings.watchdog.restart_command),
        settings.watchdog_config(),
    ));

    let cancel = CancellationToken::new();
    let task = tokio::spawn(Arc::clone(&watchdog).run(cancel.clone()));

    shutdown_signal().await;
    cancel.cancel();
    task.await.context("watchdog task panicked")?;

    let record = watchdog.record();
    tracing::info!(
        consecutive_failures = record.consecutive_failures,
        last_heartbeat_at = ?record.last_heartbeat_at,
        "Watchdog stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => tracing::info!("Received Ctrl+C"),
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                }
                return;
            }
            Err(e) => tracing::warn!(error = %e, "SIGTERM handler unavailable"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Ctrl+C handler failed");
    }
}
