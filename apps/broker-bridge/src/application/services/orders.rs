//! Order Execution Service
//!
//! Validates caller orders, translates them into broker order legs, places
//! them through the session of record and tracks the result.
//!
//! Submissions are not deduplicated: a caller that retries after a timeout
//! may place the same order twice.

use std::sync::Arc;
use std::time::Duration;

use crate::application::ports::{BrokerConnection, BrokerOrder, BrokerOrderKind};
use crate::application::services::poll::{Probe, poll_with_timeout};
use crate::application::services::session::SessionManager;
use crate::domain::contract::{Contract, resolve};
use crate::domain::order::{OrderRequest, OrderStatus, OrderType};
use crate::error::BridgeError;
use crate::infrastructure::metrics;

/// Order tracking and placement timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderConfig {
    /// Interval between status polls.
    pub poll_interval: Duration,
    /// Upper bound on tracking.
    pub max_wait: Duration,
    /// Upper bound on placing a single leg.
    pub placement_timeout: Duration,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_wait: Duration::from_secs(10),
            placement_timeout: Duration::from_secs(5),
        }
    }
}

/// Order execution service.
#[derive(Debug, Clone)]
pub struct OrderExecutionService {
    session: Arc<SessionManager>,
    config: OrderConfig,
}

impl OrderExecutionService {
    /// Create a service backed by `session`.
    #[must_use]
    pub const fn new(session: Arc<SessionManager>, config: OrderConfig) -> Self {
        Self { session, config }
    }

    /// Check field presence and positivity.
    ///
    /// # Errors
    ///
    /// Returns `Validation` naming the offending field.
    pub fn validate(&self, request: &OrderRequest) -> Result<(), BridgeError> {
        request.validate()
    }

    /// Validate, resolve and place an order.
    ///
    /// Returns the initial status: `Submitted` with nothing filled, keyed by
    /// the entry leg's order id.
    ///
    /// # Errors
    ///
    /// `Validation` for a malformed request, `PaperOnlyViolation` from the
    /// safety gate, `Connection` when no session is available or placement
    /// fails.
    pub async fn submit(&self, request: &OrderRequest) -> Result<OrderStatus, BridgeError> {
        self.validate(request)?;
        let contract = resolve(&request.symbol, &request.hints())?;

        // Checked here as well so a session opened under an older policy
        // can never carry an order to the live port.
        self.session.check_safety()?;
        let conn = self.session.connection().await?;

        let legs = build_legs(request, conn.as_ref());
        let entry_id = legs.first().map_or_else(|| conn.next_order_id(), |leg| leg.order_id);

        for leg in &legs {
            self.place(conn.as_ref(), &contract, leg).await?;
        }

        metrics::record_order_submitted(request.order_type);
        tracing::info!(
            order_id = entry_id,
            symbol = %contract.symbol,
            side = ?request.side,
            quantity = %request.quantity,
            order_type = request.order_type.as_str(),
            legs = legs.len(),
            "Order submitted"
        );

        Ok(OrderStatus::submitted(entry_id))
    }

    /// Poll the broker-reported status until terminal or `max_wait`.
    ///
    /// Never fails: on timeout or a lost session the last observed status
    /// is returned.
    pub async fn track(&self, submitted: OrderStatus) -> OrderStatus {
        let conn = match self.session.connection().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(order_id = submitted.order_id, error = %e, "Cannot track order");
                return submitted;
            }
        };

        let order_id = submitted.order_id;
        let polled = poll_with_timeout(self.config.poll_interval, self.config.max_wait, || {
            let conn = Arc::clone(&conn);
            async move {
                match conn.order_status(order_id).await {
                    Ok(Some(status)) if status.is_terminal() => Probe::Ready(status),
                    Ok(status) => Probe::Pending(status),
                    Err(e) => {
                        tracing::debug!(order_id, error = %e, "Order status probe failed");
                        Probe::Pending(None)
                    }
                }
            }
        })
        .await;

        let status = polled.value.unwrap_or(submitted);
        metrics::record_order_outcome(status.status);
        if !polled.completed {
            tracing::info!(
                order_id,
                status = status.status.as_str(),
                "Order not terminal before tracking deadline"
            );
        }
        status
    }

    /// Submit then track.
    ///
    /// # Errors
    ///
    /// Same as [`Self::submit`]; tracking never fails.
    pub async fn execute(&self, request: &OrderRequest) -> Result<OrderStatus, BridgeError> {
        let submitted = self.submit(request).await?;
        Ok(self.track(submitted).await)
    }

    async fn place(
        &self,
        conn: &dyn BrokerConnection,
        contract: &Contract,
        leg: &BrokerOrder,
    ) -> Result<(), BridgeError> {
        match tokio::time::timeout(self.config.placement_timeout, conn.place_order(contract, leg))
            .await
        {
            Ok(result) => result.map_err(BridgeError::from),
            Err(_) => Err(BridgeError::Connection(format!(
                "placing order {} timed out",
                leg.order_id
            ))),
        }
    }
}

/// Translate a validated request into broker legs. A bracket becomes an
/// entry, a take-profit limit and a stop-loss stop; only the last leg
/// transmits so the broker releases all three together.
fn build_legs(request: &OrderRequest, conn: &dyn BrokerConnection) -> Vec<BrokerOrder> {
    let single = |kind| {
        vec![BrokerOrder {
            order_id: conn.next_order_id(),
            side: request.side,
            quantity: request.quantity,
            kind,
            parent_id: None,
            transmit: true,
        }]
    };

    match (request.order_type, request.limit_price, request.stop_price) {
        (OrderType::Market, _, _) => single(BrokerOrderKind::Market),
        (OrderType::Limit, Some(limit), _) => single(BrokerOrderKind::Limit { limit }),
        (OrderType::Stop, _, Some(stop)) => single(BrokerOrderKind::Stop { stop }),
        (OrderType::StopLimit, Some(limit), Some(stop)) => {
            single(BrokerOrderKind::StopLimit { limit, stop })
        }
        (OrderType::Bracket, limit, Some(stop)) => {
            let Some(target) = request.target_price else {
                return Vec::new();
            };
            let parent_id = conn.next_order_id();
            let exit_side = request.side.opposite();
            let entry = limit.map_or(BrokerOrderKind::Market, |limit| BrokerOrderKind::Limit {
                limit,
            });

            vec![
                BrokerOrder {
                    order_id: parent_id,
                    side: request.side,
                    quantity: request.quantity,
                    kind: entry,
                    parent_id: None,
                    transmit: false,
                },
                BrokerOrder {
                    order_id: conn.next_order_id(),
                    side: exit_side,
                    quantity: request.quantity,
                    kind: BrokerOrderKind::Limit { limit: target },
                    parent_id: Some(parent_id),
                    transmit: false,
                },
                BrokerOrder {
                    order_id: conn.next_order_id(),
                    side: exit_side,
                    quantity: request.quantity,
                    kind: BrokerOrderKind::Stop { stop },
                    parent_id: Some(parent_id),
                    transmit: true,
                },
            ]
        }
        // Unreachable after validation.
        _ => Vec::new(),
    }
}
