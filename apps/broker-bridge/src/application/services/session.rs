//! Session Manager
//!
//! Owns the single broker session of record. Services never open their own
//! connections; they ask the session manager for the live handle, which
//! connects on demand and recovers after the socket drops.
//!
//! # Guarantees
//!
//! - The paper-only gate runs before anything touches the network.
//! - At most one connection attempt is in flight. Callers that queued behind
//!   an attempt share its outcome instead of starting another.
//! - A client-id collision walks the [`ClientIdLadder`]; any other failure
//!   ends the attempt immediately.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::Mutex;

use super::ladder::{ClientIdLadder, LadderConfig};
use crate::application::ports::{BrokerConnection, BrokerGateway, GatewayError};
use crate::domain::quote::MarketDataType;
use crate::domain::session::{
    ClientId, GatewayEndpoint, SafetyPolicy, SessionSnapshot, SessionState,
};
use crate::error::BridgeError;
use crate::infrastructure::metrics::{self, ConnectOutcome};

// =============================================================================
// Configuration
// =============================================================================

/// Session manager configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Gateway endpoint.
    pub endpoint: GatewayEndpoint,
    /// Paper/live safety policy.
    pub safety: SafetyPolicy,
    /// Client-id ladder.
    pub ladder: LadderConfig,
    /// Per-rung connect timeout.
    pub connect_timeout: Duration,
    /// Market data type applied after every connect.
    pub market_data_type: MarketDataType,
}

impl SessionConfig {
    /// Paper-only configuration for `endpoint` with default timings.
    #[must_use]
    pub fn new(endpoint: GatewayEndpoint, client_id: ClientId) -> Self {
        Self {
            endpoint,
            safety: SafetyPolicy::default(),
            ladder: LadderConfig {
                base: client_id,
                ..LadderConfig::default()
            },
            connect_timeout: Duration::from_secs(10),
            market_data_type: MarketDataType::Live,
        }
    }
}

// =============================================================================
// Session Manager
// =============================================================================

#[derive(Default)]
struct Slot {
    state: SessionState,
    connection: Option<Arc<dyn BrokerConnection>>,
    active_client_id: Option<ClientId>,
    completed: u64,
    last_error: Option<BridgeError>,
}

/// Owner of the broker session.
pub struct SessionManager {
    gateway: Arc<dyn BrokerGateway>,
    config: SessionConfig,
    slot: RwLock<Slot>,
    connect_lock: Mutex<()>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .field("state", &self.slot.read().state)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a disconnected session manager.
    #[must_use]
    pub fn new(gateway: Arc<dyn BrokerGateway>, config: SessionConfig) -> Self {
        Self {
            gateway,
            config,
            slot: RwLock::new(Slot::default()),
            connect_lock: Mutex::new(()),
        }
    }

    /// Session configuration.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Fail with `PaperOnlyViolation` if the endpoint is the live port and
    /// the policy is paper-only.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::PaperOnlyViolation`] when the gate refuses.
    pub fn check_safety(&self) -> Result<(), BridgeError> {
        if self.config.safety.forbids(&self.config.endpoint) {
            metrics::record_connect_attempt(ConnectOutcome::Blocked);
            tracing::error!(
                port = self.config.endpoint.port,
                "Refusing live-port session while paper-only"
            );
            return Err(BridgeError::PaperOnlyViolation {
                port: self.config.endpoint.port,
            });
        }
        Ok(())
    }

    /// Make sure a live session exists, connecting if needed.
    ///
    /// # Errors
    ///
    /// Returns `PaperOnlyViolation` from the safety gate, or `Connection`
    /// when the attempt times out, is rejected, or exhausts the ladder.
    pub async fn ensure_connected(&self) -> Result<(), BridgeError> {
        self.connection().await.map(|_| ())
    }

    /// The live connection, connecting first if needed.
    ///
    /// # Errors
    ///
    /// Same as [`Self::ensure_connected`].
    pub async fn connection(&self) -> Result<Arc<dyn BrokerConnection>, BridgeError> {
        self.check_safety()?;

        if let Some(conn) = self.live_connection() {
            return Ok(conn);
        }

        let seen = self.slot.read().completed;
        let _attempt = self.connect_lock.lock().await;

        if let Some(conn) = self.live_connection() {
            return Ok(conn);
        }
        {
            let slot = self.slot.read();
            if slot.completed != seen
                && let Some(err) = slot.last_error.clone()
            {
                return Err(err);
            }
        }

        self.attempt().await
    }

    /// Current session view. Never connects.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let slot = self.slot.read();
        let state = match (&slot.state, &slot.connection) {
            (SessionState::Connected, Some(conn)) if !conn.is_connected() => {
                SessionState::Disconnected
            }
            (state, _) => *state,
        };

        SessionSnapshot {
            state,
            host: self.config.endpoint.host.clone(),
            port: self.config.endpoint.port,
            client_id: slot.active_client_id.unwrap_or(self.config.ladder.base),
            paper_only: self.config.safety.paper_only,
        }
    }

    /// Close the session and return to `Disconnected`.
    pub async fn shutdown(&self) {
        let _attempt = self.connect_lock.lock().await;
        let conn = {
            let mut slot = self.slot.write();
            slot.state = SessionState::Disconnected;
            slot.connection.take()
        };
        metrics::set_session_state(SessionState::Disconnected);

        if let Some(conn) = conn {
            tracing::info!(client_id = conn.client_id(), "Closing broker session");
            conn.disconnect().await;
        }
    }

    /// Held connection if it is still alive. A dead one is dropped here so
    /// the next caller reconnects.
    fn live_connection(&self) -> Option<Arc<dyn BrokerConnection>> {
        {
            let slot = self.slot.read();
            match &slot.connection {
                Some(conn) if conn.is_connected() => return Some(Arc::clone(conn)),
                Some(_) => {}
                None => return None,
            }
        }

        let mut slot = self.slot.write();
        if slot.connection.as_ref().is_some_and(|c| !c.is_connected()) {
            tracing::warn!("Broker session dropped, will reconnect on next use");
            slot.connection = None;
            slot.state = SessionState::Disconnected;
            metrics::set_session_state(SessionState::Disconnected);
        }
        None
    }

    /// Run one physical attempt. Caller holds `connect_lock`.
    async fn attempt(&self) -> Result<Arc<dyn BrokerConnection>, BridgeError> {
        {
            let mut slot = self.slot.write();
            slot.state = SessionState::Connecting;
        }
        metrics::set_session_state(SessionState::Connecting);
        let mut guard = AttemptGuard { slot: &self.slot, armed: true };

        let started = Instant::now();
        let result = match self.climb_ladder().await {
            Ok(conn) => {
                self.apply_market_data_type(conn.as_ref()).await;
                Ok(conn)
            }
            Err(err) => Err(err),
        };
        guard.armed = false;

        let mut slot = self.slot.write();
        slot.completed += 1;
        match &result {
            Ok(conn) => {
                slot.state = SessionState::Connected;
                slot.active_client_id = Some(conn.client_id());
                slot.connection = Some(Arc::clone(conn));
                slot.last_error = None;
                drop(slot);

                metrics::record_connect_attempt(ConnectOutcome::Success);
                metrics::record_connect_duration(started.elapsed());
                metrics::set_session_state(SessionState::Connected);
                tracing::info!(
                    address = %self.config.endpoint.address(),
                    client_id = conn.client_id(),
                    "Broker session established"
                );
            }
            Err(err) => {
                slot.state = SessionState::Disconnected;
                slot.last_error = Some(err.clone());
                drop(slot);

                metrics::record_connect_attempt(ConnectOutcome::Failure);
                metrics::set_session_state(SessionState::Disconnected);
                tracing::warn!(error = %err, "Broker connection attempt failed");
            }
        }

        result
    }

    async fn climb_ladder(&self) -> Result<Arc<dyn BrokerConnection>, BridgeError> {
        let endpoint = &self.config.endpoint;
        let timeout = self.config.connect_timeout;
        let ladder = ClientIdLadder::new(self.config.ladder);
        let rungs = ladder.len();

        for rung in ladder {
            if !rung.delay.is_zero() {
                tokio::time::sleep(rung.delay).await;
            }

            tracing::debug!(
                address = %endpoint.address(),
                client_id = rung.client_id,
                "Connecting to broker gateway"
            );

            let outcome = tokio::time::timeout(
                timeout,
                self.gateway.connect(endpoint, rung.client_id, timeout),
            )
            .await
            .unwrap_or(Err(GatewayError::Timeout(timeout)));

            match outcome {
                Ok(conn) => return Ok(conn),
                Err(GatewayError::ClientIdInUse(id)) => {
                    metrics::record_client_id_collision();
                    tracing::warn!(client_id = id, "Client id in use, trying next");
                }
                Err(err) => {
                    return Err(BridgeError::Connection(format!(
                        "{}: {err}",
                        endpoint.address()
                    )));
                }
            }
        }

        Err(BridgeError::Connection(format!(
            "{}: all {rungs} client ids from {} are in use",
            endpoint.address(),
            self.config.ladder.base
        )))
    }

    async fn apply_market_data_type(&self, conn: &dyn BrokerConnection) {
        let kind = self.config.market_data_type;
        match tokio::time::timeout(self.config.connect_timeout, conn.set_market_data_type(kind))
            .await
        {
            Ok(Ok(())) => tracing::debug!(market_data_type = kind.as_str(), "Market data type set"),
            Ok(Err(e)) => tracing::warn!(
                error = %e,
                market_data_type = kind.as_str(),
                "Failed to set market data type"
            ),
            Err(_) => tracing::warn!(
                market_data_type = kind.as_str(),
                "Timed out setting market data type"
            ),
        }
    }
}

/// Resets the slot if an attempt's future is dropped mid-flight.
struct AttemptGuard<'a> {
    slot: &'a RwLock<Slot>,
    armed: bool,
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut slot = self.slot.write();
            slot.completed += 1;
            slot.state = SessionState::Disconnected;
            slot.last_error = Some(BridgeError::Connection(
                "connection attempt cancelled".to_string(),
            ));
            metrics::set_session_state(SessionState::Disconnected);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::fakes::FakeGateway;

    fn config(port: u16, paper_only: bool) -> SessionConfig {
        SessionConfig {
            endpoint: GatewayEndpoint::new("127.0.0.1", port, 7496),
            safety: SafetyPolicy { paper_only },
            ladder: LadderConfig::new(7, 3, Duration::from_millis(1)),
            connect_timeout: Duration::from_millis(500),
            market_data_type: MarketDataType::Delayed,
        }
    }

    #[tokio::test]
    async fn connects_once_and_reuses_session() {
        let gateway = FakeGateway::new();
        let session = SessionManager::new(gateway.clone(), config(7497, true));

        session.ensure_connected().await.unwrap();
        session.ensure_connected().await.unwrap();

        assert_eq!(gateway.connect_count(), 1);
        let snapshot = session.snapshot();
        assert_eq!(snapshot.state, SessionState::Connected);
        assert_eq!(snapshot.client_id, 7);
    }

    #[tokio::test]
    async fn applies_market_data_type_after_connect() {
        let gateway = FakeGateway::new();
        let session = SessionManager::new(gateway.clone(), config(7497, true));

        session.ensure_connected().await.unwrap();

        let conn = gateway.last_connection().unwrap();
        assert_eq!(*conn.market_data_type.lock(), Some(MarketDataType::Delayed));
    }

    #[tokio::test]
    async fn market_data_type_failure_is_not_fatal() {
        let gateway = FakeGateway::new();
        gateway.script.lock().market_data_type_fails = true;
        let session = SessionManager::new(gateway.clone(), config(7497, true));

        assert!(session.ensure_connected().await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_attempt() {
        let gateway = FakeGateway::new();
        *gateway.connect_delay.lock() = Duration::from_millis(100);
        let session = Arc::new(SessionManager::new(gateway.clone(), config(7497, true)));

        let calls = (0..10).map(|_| {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.ensure_connected().await })
        });
        for result in futures::future::join_all(calls).await {
            assert!(result.unwrap().is_ok());
        }

        assert_eq!(gateway.connect_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn queued_callers_share_a_failed_outcome() {
        let gateway = FakeGateway::new();
        *gateway.connect_delay.lock() = Duration::from_millis(100);
        *gateway.refuse_with.lock() = Some(GatewayError::Rejected("socket closed".to_string()));
        let session = Arc::new(SessionManager::new(gateway.clone(), config(7497, true)));

        let calls = (0..5).map(|_| {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.ensure_connected().await })
        });
        let results = futures::future::join_all(calls).await;

        for result in results {
            assert!(matches!(result.unwrap(), Err(BridgeError::Connection(_))));
        }
        assert_eq!(gateway.connect_count(), 1);
        assert_eq!(session.snapshot().state, SessionState::Disconnected);
    }

    #[tokio::test]
    async fn paper_only_blocks_live_port_without_network() {
        let gateway = FakeGateway::new();
        let session = SessionManager::new(gateway.clone(), config(7496, true));

        let err = session.ensure_connected().await.unwrap_err();

        assert_eq!(err, BridgeError::PaperOnlyViolation { port: 7496 });
        assert_eq!(gateway.connect_count(), 0);
        assert_eq!(session.snapshot().state, SessionState::Disconnected);
    }

    #[tokio::test]
    async fn live_port_allowed_when_not_paper_only() {
        let gateway = FakeGateway::new();
        let session = SessionManager::new(gateway.clone(), config(7496, false));

        assert!(session.ensure_connected().await.is_ok());
    }

    #[tokio::test]
    async fn collision_advances_ladder() {
        let gateway = FakeGateway::new();
        gateway.ids_in_use.lock().insert(7);
        let session = SessionManager::new(gateway.clone(), config(7497, true));

        session.ensure_connected().await.unwrap();

        assert_eq!(gateway.connect_count(), 2);
        assert_eq!(session.snapshot().client_id, 8);
    }

    #[tokio::test]
    async fn exhausted_ladder_is_connection_error() {
        let gateway = FakeGateway::new();
        gateway.ids_in_use.lock().extend([7, 8, 9, 10]);
        let session = SessionManager::new(gateway.clone(), config(7497, true));

        let err = session.ensure_connected().await.unwrap_err();

        assert!(matches!(err, BridgeError::Connection(_)));
        assert_eq!(gateway.connect_count(), 4);
    }

    #[tokio::test]
    async fn non_collision_failure_does_not_climb() {
        let gateway = FakeGateway::new();
        *gateway.refuse_with.lock() = Some(GatewayError::Io("connection refused".to_string()));
        let session = SessionManager::new(gateway.clone(), config(7497, true));

        let err = session.ensure_connected().await.unwrap_err();

        assert!(err.to_string().contains("connection refused"));
        assert_eq!(gateway.connect_count(), 1);
    }

    #[tokio::test]
    async fn slow_gateway_times_out() {
        let gateway = FakeGateway::new();
        *gateway.connect_delay.lock() = Duration::from_secs(5);
        let session = SessionManager::new(gateway.clone(), config(7497, true));

        let err = session.ensure_connected().await.unwrap_err();

        assert!(matches!(err, BridgeError::Connection(_)));
        assert_eq!(session.snapshot().state, SessionState::Disconnected);
    }

    #[tokio::test]
    async fn failure_then_retry_starts_new_attempt() {
        let gateway = FakeGateway::new();
        *gateway.refuse_with.lock() = Some(GatewayError::Rejected("down".to_string()));
        let session = SessionManager::new(gateway.clone(), config(7497, true));

        assert!(session.ensure_connected().await.is_err());
        *gateway.refuse_with.lock() = None;
        assert!(session.ensure_connected().await.is_ok());
        assert_eq!(gateway.connect_count(), 2);
    }

    #[tokio::test]
    async fn dropped_socket_triggers_reconnect() {
        let gateway = FakeGateway::new();
        let session = SessionManager::new(gateway.clone(), config(7497, true));

        session.ensure_connected().await.unwrap();
        gateway.last_connection().unwrap().drop_socket();
        assert_eq!(session.snapshot().state, SessionState::Disconnected);

        session.ensure_connected().await.unwrap();
        assert_eq!(gateway.connect_count(), 2);
        assert_eq!(session.snapshot().state, SessionState::Connected);
    }

    #[tokio::test]
    async fn shutdown_disconnects() {
        let gateway = FakeGateway::new();
        let session = SessionManager::new(gateway.clone(), config(7497, true));

        session.ensure_connected().await.unwrap();
        session.shutdown().await;

        assert_eq!(session.snapshot().state, SessionState::Disconnected);
        assert!(!gateway.last_connection().unwrap().is_connected());
    }

    #[tokio::test]
    async fn snapshot_reports_configured_id_before_connect() {
        let session = SessionManager::new(FakeGateway::new(), config(7497, true));
        let snapshot = session.snapshot();

        assert_eq!(snapshot.state, SessionState::Disconnected);
        assert_eq!(snapshot.client_id, 7);
        assert_eq!(snapshot.port, 7497);
        assert!(snapshot.paper_only);
    }
}
