//! In-memory broker gateway used by service tests.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::application::ports::{
    BrokerConnection, BrokerGateway, BrokerOrder, GatewayError, MarketDataTicket, RequestId,
};
use crate::domain::contract::Contract;
use crate::domain::order::{OrderId, OrderState, OrderStatus, Position};
use crate::domain::quote::{MarketDataType, QuoteFields};
use crate::domain::session::{ClientId, GatewayEndpoint};

/// Behaviour shared by every connection the fake gateway hands out.
#[derive(Debug, Default)]
pub struct Script {
    /// Fields published for every market data request.
    pub quote: QuoteFields,
    /// Delay before `quote` is published.
    pub quote_delay: Duration,
    /// End snapshot requests right after publishing, as the broker does
    /// with its end-of-snapshot marker.
    pub snapshot_ends: bool,
    /// Order states returned by successive `order_status` calls. The last
    /// one repeats once the queue is drained.
    pub order_states: VecDeque<OrderState>,
    /// Fail every `current_time` call.
    pub heartbeat_fails: bool,
    /// Fail `set_market_data_type`.
    pub market_data_type_fails: bool,
    /// Positions returned by `positions`.
    pub positions: Vec<Position>,
}

/// Fake gateway that counts connection attempts.
#[derive(Debug, Default)]
pub struct FakeGateway {
    /// Number of `connect` calls.
    pub connects: AtomicUsize,
    /// Client ids that report a collision.
    pub ids_in_use: Mutex<HashSet<ClientId>>,
    /// Error returned by every `connect` call, if set.
    pub refuse_with: Mutex<Option<GatewayError>>,
    /// Delay inside `connect`.
    pub connect_delay: Mutex<Duration>,
    /// Connection behaviour.
    pub script: Arc<Mutex<Script>>,
    /// Every connection handed out.
    pub connections: Mutex<Vec<Arc<FakeConnection>>>,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn last_connection(&self) -> Option<Arc<FakeConnection>> {
        self.connections.lock().last().cloned()
    }
}

#[async_trait]
impl BrokerGateway for FakeGateway {
    async fn connect(
        &self,
        _endpoint: &GatewayEndpoint,
        client_id: ClientId,
        _timeout: Duration,
    ) -> Result<Arc<dyn BrokerConnection>, GatewayError> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        let delay = *self.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.refuse_with.lock().clone() {
            return Err(err);
        }
        if self.ids_in_use.lock().contains(&client_id) {
            return Err(GatewayError::ClientIdInUse(client_id));
        }

        let conn = Arc::new(FakeConnection::new(client_id, Arc::clone(&self.script)));
        self.connections.lock().push(Arc::clone(&conn));
        Ok(conn)
    }
}

/// Fake connection recording what services asked of it.
#[derive(Debug)]
pub struct FakeConnection {
    client_id: ClientId,
    script: Arc<Mutex<Script>>,
    pub connected: AtomicBool,
    pub market_data_type: Mutex<Option<MarketDataType>>,
    pub requests: Mutex<Vec<(Contract, bool)>>,
    pub cancelled: Mutex<Vec<RequestId>>,
    pub placed: Mutex<Vec<BrokerOrder>>,
    pub status_calls: AtomicUsize,
    next_request: AtomicI64,
    next_order: AtomicI64,
}

impl FakeConnection {
    fn new(client_id: ClientId, script: Arc<Mutex<Script>>) -> Self {
        Self {
            client_id,
            script,
            connected: AtomicBool::new(true),
            market_data_type: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            placed: Mutex::new(Vec::new()),
            status_calls: AtomicUsize::new(0),
            next_request: AtomicI64::new(1),
            next_order: AtomicI64::new(100),
        }
    }

    /// Simulate the socket closing.
    pub fn drop_socket(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl BrokerConnection for FakeConnection {
    fn client_id(&self) -> ClientId {
        self.client_id
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn set_market_data_type(&self, kind: MarketDataType) -> Result<(), GatewayError> {
        if self.script.lock().market_data_type_fails {
            return Err(GatewayError::Rejected("market data type unavailable".to_string()));
        }
        *self.market_data_type.lock() = Some(kind);
        Ok(())
    }

    async fn request_market_data(
        &self,
        contract: &Contract,
        snapshot: bool,
    ) -> Result<MarketDataTicket, GatewayError> {
        self.requests.lock().push((contract.clone(), snapshot));
        let request_id = RequestId::try_from(self.next_request.fetch_add(1, Ordering::SeqCst))
            .map_err(|e| GatewayError::Io(e.to_string()))?;

        let (tx, rx) = watch::channel(QuoteFields::default());
        let (quote, delay, ends) = {
            let script = self.script.lock();
            (script.quote, script.quote_delay, snapshot && script.snapshot_ends)
        };
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(quote);
            if !ends {
                // Hold the sender open like a live subscription would.
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
        });

        Ok(MarketDataTicket {
            request_id,
            fields: rx,
        })
    }

    fn cancel_market_data(&self, request_id: RequestId) {
        self.cancelled.lock().push(request_id);
    }

    fn next_order_id(&self) -> OrderId {
        self.next_order.fetch_add(1, Ordering::SeqCst)
    }

    async fn place_order(&self, _contract: &Contract, order: &BrokerOrder) -> Result<(), GatewayError> {
        self.placed.lock().push(order.clone());
        Ok(())
    }

    async fn order_status(&self, order_id: OrderId) -> Result<Option<OrderStatus>, GatewayError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock();
        let state = if script.order_states.len() > 1 {
            script.order_states.pop_front()
        } else {
            script.order_states.front().copied()
        };
        Ok(state.map(|status| OrderStatus {
            status,
            ..OrderStatus::submitted(order_id)
        }))
    }

    async fn managed_accounts(&self) -> Result<Vec<String>, GatewayError> {
        Ok(vec!["DU1234567".to_string()])
    }

    async fn positions(&self) -> Result<Vec<Position>, GatewayError> {
        Ok(self.script.lock().positions.clone())
    }

    async fn current_time(&self) -> Result<DateTime<Utc>, GatewayError> {
        if self.script.lock().heartbeat_fails {
            return Err(GatewayError::Timeout(Duration::from_secs(1)));
        }
        Ok(Utc::now())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}
