//! Market Data Service
//!
//! Fetches a quote for a resolved contract within a bounded wait. Missing
//! fields are reported as `None`; only connection failures are errors.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::application::ports::{BrokerConnection, RequestId};
use crate::application::services::poll::{Probe, poll_with_timeout};
use crate::application::services::session::SessionManager;
use crate::domain::contract::Contract;
use crate::domain::quote::{Quote, QuoteFields, QuoteMode};
use crate::error::BridgeError;
use crate::infrastructure::metrics;

/// How often populated fields are re-read while waiting.
pub const DEFAULT_QUOTE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Market data service.
#[derive(Debug, Clone)]
pub struct MarketDataService {
    session: Arc<SessionManager>,
    poll_interval: Duration,
}

impl MarketDataService {
    /// Create a service backed by `session`.
    #[must_use]
    pub const fn new(session: Arc<SessionManager>) -> Self {
        Self {
            session,
            poll_interval: DEFAULT_QUOTE_POLL_INTERVAL,
        }
    }

    /// Override the field polling interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Fetch a quote for `contract`, waiting at most `wait_budget` for the
    /// fields to populate.
    ///
    /// # Errors
    ///
    /// Returns `Connection` or `PaperOnlyViolation` when no session can be
    /// established. A request the broker refuses yields an all-`None` quote.
    pub async fn quote(
        &self,
        contract: &Contract,
        mode: QuoteMode,
        wait_budget: Duration,
    ) -> Result<Quote, BridgeError> {
        let conn = self.session.connection().await?;

        let snapshot = mode == QuoteMode::Snapshot;
        let ticket = match conn.request_market_data(contract, snapshot).await {
            Ok(ticket) => ticket,
            Err(e) => {
                tracing::warn!(
                    symbol = %contract.symbol,
                    error = %e,
                    "Market data request failed"
                );
                metrics::record_quote(mode, false);
                return Ok(Quote::from_fields(&contract.symbol, &QuoteFields::default()));
            }
        };

        let _release = (mode == QuoteMode::Streaming)
            .then(|| SubscriptionGuard::new(Arc::clone(&conn), ticket.request_id));

        // A closed channel means the broker has nothing more to send: the
        // snapshot ended or the request failed.
        let fields = ticket.fields;
        let polled = poll_with_timeout(self.poll_interval, wait_budget, || {
            let ended = fields.has_changed().is_err();
            let current = *fields.borrow();
            async move {
                if ended || current.is_complete() {
                    Probe::Ready(current)
                } else {
                    Probe::Pending(Some(current))
                }
            }
        })
        .await;

        let observed = polled.value.unwrap_or_default();
        let complete = observed.is_complete();
        metrics::record_quote(mode, complete);
        tracing::debug!(
            symbol = %contract.symbol,
            mode = mode.as_str(),
            complete,
            probes = polled.probes,
            "Quote served"
        );

        Ok(Quote::from_fields(&contract.symbol, &observed))
    }

    /// Fetch quotes for several contracts concurrently, keyed by symbol.
    ///
    /// # Errors
    ///
    /// Fails as a whole only when no session can be established.
    pub async fn quotes(
        &self,
        contracts: &[(String, Contract)],
        mode: QuoteMode,
        wait_budget: Duration,
    ) -> Result<HashMap<String, Quote>, BridgeError> {
        self.session.ensure_connected().await?;

        let requests = contracts.iter().map(|(requested, contract)| async move {
            let quote = self.quote(contract, mode, wait_budget).await;
            (requested.clone(), quote)
        });

        let mut quotes = HashMap::with_capacity(contracts.len());
        for (requested, quote) in futures::future::join_all(requests).await {
            quotes.insert(requested, quote?);
        }
        Ok(quotes)
    }
}

/// Cancels a streaming subscription when dropped, including when the
/// awaiting future is cancelled.
struct SubscriptionGuard {
    conn: Arc<dyn BrokerConnection>,
    request_id: RequestId,
}

impl SubscriptionGuard {
    fn new(conn: Arc<dyn BrokerConnection>, request_id: RequestId) -> Self {
        Self { conn, request_id }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        tracing::trace!(request_id = self.request_id, "Releasing market data subscription");
        self.conn.cancel_market_data(self.request_id);
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::application::services::fakes::FakeGateway;
    use crate::application::services::session::SessionConfig;
    use crate::domain::contract::{ContractHints, resolve};
    use crate::domain::session::GatewayEndpoint;

    fn full_quote() -> QuoteFields {
        QuoteFields {
            last: Some(dec!(190.5)),
            bid: Some(dec!(190.4)),
            ask: Some(dec!(190.6)),
            close: Some(dec!(188.0)),
        }
    }

    fn service(gateway: &Arc<FakeGateway>, port: u16) -> MarketDataService {
        let session = SessionManager::new(
            gateway.clone(),
            SessionConfig::new(GatewayEndpoint::new("127.0.0.1", port, 7496), 7),
        );
        MarketDataService::new(Arc::new(session)).with_poll_interval(Duration::from_millis(5))
    }

    fn aapl() -> Contract {
        resolve("AAPL", &ContractHints::default()).unwrap()
    }

    #[tokio::test]
    async fn snapshot_returns_populated_fields() {
        let gateway = FakeGateway::new();
        gateway.script.lock().quote = full_quote();
        let svc = service(&gateway, 7497);

        let quote = svc
            .quote(&aapl(), QuoteMode::Snapshot, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(quote.symbol, "AAPL");
        assert_eq!(quote.last, Some(dec!(190.5)));
        assert_eq!(quote.close, Some(dec!(188.0)));

        let conn = gateway.last_connection().unwrap();
        assert_eq!(conn.requests.lock().len(), 1);
        assert!(conn.requests.lock()[0].1);
        assert!(conn.cancelled.lock().is_empty());
    }

    #[tokio::test]
    async fn zero_budget_returns_all_null_quote() {
        let gateway = FakeGateway::new();
        {
            let mut script = gateway.script.lock();
            script.quote = full_quote();
            script.quote_delay = Duration::from_millis(200);
        }
        let svc = service(&gateway, 7497);

        let quote = svc
            .quote(&aapl(), QuoteMode::Snapshot, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(quote.last, None);
        assert_eq!(quote.bid, None);
        assert_eq!(quote.ask, None);
        assert_eq!(quote.close, None);
    }

    #[tokio::test]
    async fn partial_fields_returned_after_budget() {
        let gateway = FakeGateway::new();
        gateway.script.lock().quote = QuoteFields {
            bid: Some(dec!(1.08)),
            ..QuoteFields::default()
        };
        let svc = service(&gateway, 7497);

        let quote = svc
            .quote(&aapl(), QuoteMode::Snapshot, Duration::from_millis(50))
            .await
            .unwrap();

        assert_eq!(quote.bid, Some(dec!(1.08)));
        assert_eq!(quote.last, None);
    }

    #[tokio::test]
    async fn ended_snapshot_returns_without_waiting_out_budget() {
        let gateway = FakeGateway::new();
        {
            let mut script = gateway.script.lock();
            script.quote = QuoteFields {
                close: None,
                ..full_quote()
            };
            script.snapshot_ends = true;
        }
        let svc = service(&gateway, 7497);

        let started = tokio::time::Instant::now();
        let quote = svc
            .quote(&aapl(), QuoteMode::Snapshot, Duration::from_secs(5))
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(quote.last, Some(dec!(190.5)));
        assert_eq!(quote.close, None);
    }

    #[tokio::test]
    async fn streaming_subscription_is_released() {
        let gateway = FakeGateway::new();
        gateway.script.lock().quote = full_quote();
        let svc = service(&gateway, 7497);

        svc.quote(&aapl(), QuoteMode::Streaming, Duration::from_secs(1))
            .await
            .unwrap();

        let conn = gateway.last_connection().unwrap();
        assert!(!conn.requests.lock()[0].1);
        assert_eq!(*conn.cancelled.lock(), vec![1]);
    }

    #[tokio::test]
    async fn streaming_subscription_released_when_caller_gives_up() {
        let gateway = FakeGateway::new();
        gateway.script.lock().quote_delay = Duration::from_secs(10);
        let svc = service(&gateway, 7497);

        let result = tokio::time::timeout(
            Duration::from_millis(50),
            svc.quote(&aapl(), QuoteMode::Streaming, Duration::from_secs(5)),
        )
        .await;

        assert!(result.is_err());
        let conn = gateway.last_connection().unwrap();
        assert_eq!(conn.cancelled.lock().len(), 1);
    }

    #[tokio::test]
    async fn connection_failure_is_error() {
        let gateway = FakeGateway::new();
        *gateway.refuse_with.lock() = Some(crate::application::ports::GatewayError::Rejected(
            "down".to_string(),
        ));
        let svc = service(&gateway, 7497);

        let err = svc
            .quote(&aapl(), QuoteMode::Snapshot, Duration::from_millis(10))
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::Connection(_)));
    }

    #[tokio::test]
    async fn paper_only_violation_passes_through() {
        let gateway = FakeGateway::new();
        let svc = service(&gateway, 7496);

        let err = svc
            .quote(&aapl(), QuoteMode::Snapshot, Duration::from_millis(10))
            .await
            .unwrap_err();

        assert_eq!(err, BridgeError::PaperOnlyViolation { port: 7496 });
        assert_eq!(gateway.connect_count(), 0);
    }

    #[tokio::test]
    async fn batch_keys_by_requested_symbol() {
        let gateway = FakeGateway::new();
        gateway.script.lock().quote = full_quote();
        let svc = service(&gateway, 7497);

        let contracts = vec![
            ("AAPL".to_string(), aapl()),
            (
                "7203.T".to_string(),
                resolve("7203.T", &ContractHints::default()).unwrap(),
            ),
        ];
        let quotes = svc
            .quotes(&contracts, QuoteMode::Snapshot, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes["7203.T"].symbol, "7203");
        assert_eq!(quotes["AAPL"].last, Some(dec!(190.5)));
        assert_eq!(gateway.connect_count(), 1);
    }
}
