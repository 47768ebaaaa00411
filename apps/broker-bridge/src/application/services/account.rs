//! Account Service
//!
//! Read-only account queries: managed accounts and positions.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::application::ports::GatewayError;
use crate::application::services::session::SessionManager;
use crate::domain::order::Position;
use crate::domain::session::SessionState;
use crate::error::BridgeError;

/// Accounts visible to the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStatus {
    /// Managed account ids.
    pub accounts: Vec<String>,
    /// Whether the session is connected.
    pub connected: bool,
}

/// Account query service.
#[derive(Debug, Clone)]
pub struct AccountService {
    session: Arc<SessionManager>,
    query_timeout: Duration,
}

impl AccountService {
    /// Create a service backed by `session`.
    #[must_use]
    pub const fn new(session: Arc<SessionManager>, query_timeout: Duration) -> Self {
        Self {
            session,
            query_timeout,
        }
    }

    /// Managed accounts and connection state.
    ///
    /// # Errors
    ///
    /// Returns `Connection` or `PaperOnlyViolation` when no session can be
    /// established, or when the query fails.
    pub async fn status(&self) -> Result<AccountStatus, BridgeError> {
        let conn = self.session.connection().await?;
        let accounts = tokio::time::timeout(self.query_timeout, conn.managed_accounts())
            .await
            .unwrap_or(Err(GatewayError::Timeout(self.query_timeout)))?;

        Ok(AccountStatus {
            accounts,
            connected: self.session.snapshot().state == SessionState::Connected,
        })
    }

    /// All positions across managed accounts.
    ///
    /// # Errors
    ///
    /// Same as [`Self::status`].
    pub async fn positions(&self) -> Result<Vec<Position>, BridgeError> {
        let conn = self.session.connection().await?;
        let positions = tokio::time::timeout(self.query_timeout, conn.positions())
            .await
            .unwrap_or(Err(GatewayError::Timeout(self.query_timeout)))?;

        tracing::debug!(count = positions.len(), "Positions fetched");
        Ok(positions)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::application::services::fakes::FakeGateway;
    use crate::application::services::session::SessionConfig;
    use crate::domain::session::GatewayEndpoint;

    fn service(gateway: &Arc<FakeGateway>) -> AccountService {
        let session = SessionManager::new(
            gateway.clone(),
            SessionConfig::new(GatewayEndpoint::new("127.0.0.1", 7497, 7496), 7),
        );
        AccountService::new(Arc::new(session), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn status_lists_accounts() {
        let gateway = FakeGateway::new();
        let status = service(&gateway).status().await.unwrap();

        assert!(status.connected);
        assert_eq!(status.accounts, vec!["DU1234567".to_string()]);
    }

    #[tokio::test]
    async fn positions_pass_through() {
        let gateway = FakeGateway::new();
        gateway.script.lock().positions = vec![Position {
            account: "DU1234567".to_string(),
            symbol: "AAPL".to_string(),
            quantity: dec!(10),
            average_cost: dec!(182.25),
        }];

        let positions = service(&gateway).positions().await.unwrap();

        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].average_cost, dec!(182.25));
    }
}
