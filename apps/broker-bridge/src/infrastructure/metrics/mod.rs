//! Prometheus Metrics Module
//!
//! Exposes bridge metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Session**: Connect attempts by outcome, client-id collisions, state gauge
//! - **Market data**: Quotes served by mode and completeness
//! - **Orders**: Submissions by type and tracked outcomes
//! - **Watchdog**: Heartbeat results and restarts
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the HTTP port. Recording functions
//! are no-ops until [`init_metrics`] installs the recorder, so tests can call
//! into instrumented code freely.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::order::{OrderState, OrderType};
use crate::domain::quote::QuoteMode;
use crate::domain::session::SessionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling this again after a successful install returns the existing handle.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Session
    describe_counter!(
        "bridge_connect_attempts_total",
        "Broker connection attempts by outcome"
    );
    describe_counter!(
        "bridge_client_id_collisions_total",
        "Connection attempts refused because the client id was in use"
    );
    describe_gauge!(
        "bridge_session_state",
        "Session state (0 = disconnected, 1 = connecting, 2 = connected)"
    );
    describe_histogram!(
        "bridge_connect_duration_seconds",
        "Time to establish a broker session"
    );

    // Market data
    describe_counter!("bridge_quotes_total", "Quotes served by mode and completeness");

    // Orders
    describe_counter!("bridge_orders_submitted_total", "Orders placed by order type");
    describe_counter!(
        "bridge_order_outcomes_total",
        "Last observed order status when tracking ended"
    );

    // Watchdog
    describe_counter!(
        "bridge_watchdog_heartbeats_total",
        "Watchdog heartbeats by result"
    );
    describe_counter!(
        "bridge_watchdog_restarts_total",
        "Gateway restarts triggered by the watchdog, by result"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for connect attempts.
#[derive(Debug, Clone, Copy)]
pub enum ConnectOutcome {
    /// Session established.
    Success,
    /// Refused by the paper-only gate without a network call.
    Blocked,
    /// Network, timeout, or ladder exhaustion failure.
    Failure,
}

impl ConnectOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Blocked => "blocked",
            Self::Failure => "failure",
        }
    }
}

/// Record a connection attempt.
pub fn record_connect_attempt(outcome: ConnectOutcome) {
    counter!(
        "bridge_connect_attempts_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record time taken to establish a session.
pub fn record_connect_duration(duration: Duration) {
    histogram!("bridge_connect_duration_seconds").record(duration.as_secs_f64());
}

/// Record a client-id collision.
pub fn record_client_id_collision() {
    counter!("bridge_client_id_collisions_total").increment(1);
}

/// Update the session state gauge.
pub fn set_session_state(state: SessionState) {
    gauge!("bridge_session_state").set(state.gauge_value());
}

/// Record a served quote.
pub fn record_quote(mode: QuoteMode, complete: bool) {
    counter!(
        "bridge_quotes_total",
        "mode" => mode.as_str(),
        "complete" => if complete { "true" } else { "false" }
    )
    .increment(1);
}

/// Record a placed order.
pub fn record_order_submitted(order_type: OrderType) {
    counter!(
        "bridge_orders_submitted_total",
        "type" => order_type.as_str()
    )
    .increment(1);
}

/// Record the status an order was in when tracking ended.
pub fn record_order_outcome(state: OrderState) {
    counter!(
        "bridge_order_outcomes_total",
        "status" => state.as_str()
    )
    .increment(1);
}

/// Record a watchdog heartbeat.
pub fn record_heartbeat(success: bool) {
    counter!(
        "bridge_watchdog_heartbeats_total",
        "result" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

/// Record a watchdog-triggered restart.
pub fn record_restart(success: bool) {
    counter!(
        "bridge_watchdog_restarts_total",
        "result" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================
