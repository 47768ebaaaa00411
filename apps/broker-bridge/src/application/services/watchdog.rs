//! Health Watchdog
//!
//! Independent liveness check for the broker gateway. Each tick opens a
//! short-lived session under the watchdog's own client id, asks for the
//! broker's clock, and disconnects. After a run of consecutive failures the
//! gateway process is restarted through [`ProcessControl`].
//!
//! The watchdog shares no state with the request path, so a wedged session
//! of record does not hide a dead gateway (and vice versa).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{BrokerGateway, ProcessControl};
use crate::domain::session::{ClientId, GatewayEndpoint};
use crate::error::BridgeError;
use crate::infrastructure::metrics;

/// Configuration for the watchdog.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// Gateway to probe.
    pub endpoint: GatewayEndpoint,
    /// Client id reserved for heartbeat sessions.
    pub client_id: ClientId,
    /// Interval between heartbeats.
    pub interval: Duration,
    /// Upper bound on one heartbeat (connect + time query).
    pub heartbeat_timeout: Duration,
    /// Consecutive failures that trigger a restart.
    pub failure_threshold: u32,
    /// Process restarted at the threshold.
    pub restart_target: String,
}

impl WatchdogConfig {
    /// Create a configuration with default timings.
    #[must_use]
    pub fn new(endpoint: GatewayEndpoint, client_id: ClientId) -> Self {
        Self {
            endpoint,
            client_id,
            interval: Duration::from_secs(60),
            heartbeat_timeout: Duration::from_secs(10),
            failure_threshold: 3,
            restart_target: "ibgateway".to_string(),
        }
    }
}

/// Gateway health as seen by the watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchdogHealth {
    /// Last heartbeat succeeded.
    #[default]
    Healthy,
    /// At least one consecutive heartbeat failed.
    Degraded,
}

/// Failure counter and last success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchdogRecord {
    /// Heartbeats failed in a row since the last success or restart.
    pub consecutive_failures: u32,
    /// Time of the last successful heartbeat.
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// Current health.
    pub health: WatchdogHealth,
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Heartbeat succeeded.
    Healthy {
        /// Broker time reported by the heartbeat.
        server_time: DateTime<Utc>,
    },
    /// Heartbeat failed; threshold not reached.
    Degraded {
        /// Failures so far.
        consecutive_failures: u32,
    },
    /// Threshold reached and a restart was attempted.
    Restarted {
        /// Whether the restart command succeeded.
        success: bool,
    },
}

/// Periodic gateway liveness check with threshold restart.
pub struct HealthWatchdog {
    gateway: Arc<dyn BrokerGateway>,
    process: Arc<dyn ProcessControl>,
    config: WatchdogConfig,
    record: RwLock<WatchdogRecord>,
}

impl std::fmt::Debug for HealthWatchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthWatchdog")
            .field("config", &self.config)
            .field("record", &*self.record.read())
            .finish_non_exhaustive()
    }
}

impl HealthWatchdog {
    /// Create a watchdog in the `Healthy` state.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn BrokerGateway>,
        process: Arc<dyn ProcessControl>,
        config: WatchdogConfig,
    ) -> Self {
        Self {
            gateway,
            process,
            config,
            record: RwLock::new(WatchdogRecord::default()),
        }
    }

    /// Current record.
    #[must_use]
    pub fn record(&self) -> WatchdogRecord {
        *self.record.read()
    }

    /// Run one heartbeat and act on the result.
    pub async fn tick(&self) -> TickOutcome {
        match self.heartbeat().await {
            Ok(server_time) => {
                metrics::record_heartbeat(true);
                let mut record = self.record.write();
                if record.health == WatchdogHealth::Degraded {
                    tracing::info!("Gateway heartbeat recovered");
                }
                *record = WatchdogRecord {
                    consecutive_failures: 0,
                    last_heartbeat_at: Some(Utc::now()),
                    health: WatchdogHealth::Healthy,
                };
                TickOutcome::Healthy { server_time }
            }
            Err(err) => {
                metrics::record_heartbeat(false);
                let failures = {
                    let mut record = self.record.write();
                    record.consecutive_failures += 1;
                    record.health = WatchdogHealth::Degraded;
                    record.consecutive_failures
                };
                tracing::warn!(
                    error = %err,
                    consecutive_failures = failures,
                    threshold = self.config.failure_threshold,
                    "Gateway heartbeat failed"
                );

                if failures >= self.config.failure_threshold {
                    let success = self.restart().await;
                    self.record.write().consecutive_failures = 0;
                    TickOutcome::Restarted { success }
                } else {
                    TickOutcome::Degraded {
                        consecutive_failures: failures,
                    }
                }
            }
        }
    }

    /// Tick on the configured interval until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            address = %self.config.endpoint.address(),
            client_id = self.config.client_id,
            interval_secs = self.config.interval.as_secs(),
            threshold = self.config.failure_threshold,
            "Watchdog started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("Watchdog cancelled");
                    break;
                }
                _ = interval.tick() => {
                    let _ = self.tick().await;
                }
            }
        }
    }

    async fn heartbeat(&self) -> Result<DateTime<Utc>, BridgeError> {
        let timeout = self.config.heartbeat_timeout;
        let probe = async {
            let conn = match self
                .gateway
                .connect(&self.config.endpoint, self.config.client_id, timeout)
                .await
            {
                Ok(conn) => conn,
                Err(e) => return Err(BridgeError::Watchdog(format!("connect: {e}"))),
            };
            let result = conn
                .current_time()
                .await
                .map_err(|e| BridgeError::Watchdog(format!("current time: {e}")));
            conn.disconnect().await;
            result
        };

        tokio::time::timeout(timeout, probe)
            .await
            .unwrap_or_else(|_| Err(BridgeError::Watchdog(format!("no heartbeat within {timeout:?}"))))
    }

    async fn restart(&self) -> bool {
        let target = &self.config.restart_target;
        tracing::error!(target_process = %target, "Restarting broker gateway");

        match self.process.restart(target).await {
            Ok(()) => {
                metrics::record_restart(true);
                tracing::info!(target_process = %target, "Broker gateway restart issued");
                true
            }
            Err(e) => {
                metrics::record_restart(false);
                tracing::error!(target_process = %target, error = %e, "Broker gateway restart failed");
                false
            }
        }
    }
}
