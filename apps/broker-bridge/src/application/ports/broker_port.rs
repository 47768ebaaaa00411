//! Broker Port (Driven Port)
//!
//! Interface for opening and using a session on the broker gateway.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::watch;

use crate::domain::contract::Contract;
use crate::domain::order::{OrderId, OrderSide, OrderStatus, Position};
use crate::domain::quote::{MarketDataType, QuoteFields};
use crate::domain::session::{ClientId, GatewayEndpoint};
use crate::error::BridgeError;

/// Market data request identifier.
pub type RequestId = i32;

/// Broker port error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The operation did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Another session already holds this client id.
    #[error("client id {0} is already in use")]
    ClientIdInUse(ClientId),

    /// The gateway refused or dropped the session during setup.
    #[error("connection rejected: {0}")]
    Rejected(String),

    /// Socket level failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// The session is no longer connected.
    #[error("not connected")]
    NotConnected,
}

impl From<GatewayError> for BridgeError {
    fn from(err: GatewayError) -> Self {
        Self::Connection(err.to_string())
    }
}

/// Broker-side order shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerOrderKind {
    /// Market.
    Market,
    /// Limit at `limit`.
    Limit {
        /// Limit price.
        limit: Decimal,
    },
    /// Stop triggered at `stop`.
    Stop {
        /// Stop trigger price.
        stop: Decimal,
    },
    /// Stop triggered at `stop`, then limit at `limit`.
    StopLimit {
        /// Limit price.
        limit: Decimal,
        /// Stop trigger price.
        stop: Decimal,
    },
}

/// A single order leg as placed at the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerOrder {
    /// Client-assigned order id, from [`BrokerConnection::next_order_id`].
    pub order_id: OrderId,
    /// Side.
    pub side: OrderSide,
    /// Quantity.
    pub quantity: Decimal,
    /// Order shape.
    pub kind: BrokerOrderKind,
    /// Parent order for attached legs.
    pub parent_id: Option<OrderId>,
    /// Whether the broker should release the order (and any held siblings) now.
    pub transmit: bool,
}

/// Handle to an active market data request.
#[derive(Debug)]
pub struct MarketDataTicket {
    /// Request id, used to cancel streaming requests.
    pub request_id: RequestId,
    /// Fields populated so far; updated by the adapter as ticks arrive.
    pub fields: watch::Receiver<QuoteFields>,
}

/// One live session on the broker gateway.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Client id this session was opened with.
    fn client_id(&self) -> ClientId;

    /// Whether the underlying socket is still open.
    fn is_connected(&self) -> bool;

    /// Select live/frozen/delayed market data for subsequent requests.
    async fn set_market_data_type(&self, kind: MarketDataType) -> Result<(), GatewayError>;

    /// Start a market data request.
    async fn request_market_data(
        &self,
        contract: &Contract,
        snapshot: bool,
    ) -> Result<MarketDataTicket, GatewayError>;

    /// Release a streaming market data request. Must not block.
    fn cancel_market_data(&self, request_id: RequestId);

    /// Reserve the next order id.
    fn next_order_id(&self) -> OrderId;

    /// Place one order leg.
    async fn place_order(&self, contract: &Contract, order: &BrokerOrder)
    -> Result<(), GatewayError>;

    /// Latest status the broker has reported for `order_id`, if any.
    ///
    /// Adapters may forget an order once its terminal status has been
    /// returned.
    async fn order_status(&self, order_id: OrderId) -> Result<Option<OrderStatus>, GatewayError>;

    /// Accounts managed by this login.
    async fn managed_accounts(&self) -> Result<Vec<String>, GatewayError>;

    /// All account positions.
    async fn positions(&self) -> Result<Vec<Position>, GatewayError>;

    /// Broker server time. Used as the heartbeat query.
    async fn current_time(&self) -> Result<DateTime<Utc>, GatewayError>;

    /// Close the session.
    async fn disconnect(&self);
}

/// Opens sessions on the broker gateway.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Open a session with `client_id`, giving up after `timeout`.
    async fn connect(
        &self,
        endpoint: &GatewayEndpoint,
        client_id: ClientId,
        timeout: Duration,
    ) -> Result<Arc<dyn BrokerConnection>, GatewayError>;
}
