//! TWS Socket Client
//!
//! Implements the broker ports over a raw TWS API socket. Each connection
//! owns one reader task that decodes inbound frames into shared state and
//! one writer task that serializes outbound frames; callers only touch the
//! shared state and the outbound queue.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    BrokerConnection, BrokerGateway, BrokerOrder, GatewayError, MarketDataTicket, RequestId,
};
use crate::domain::contract::Contract;
use crate::domain::order::{OrderId, OrderStatus, Position};
use crate::domain::quote::{MarketDataType, QuoteFields};
use crate::domain::session::{ClientId, GatewayEndpoint};
use crate::infrastructure::tws::codec::{self, CodecError};
use crate::infrastructure::tws::messages::{
    self, Incoming, PriceField, SERVER_VERSION, codes, order_state, order_state_for_error,
};

/// Market data request ids start here so they never collide with order ids,
/// which share the error path.
const FIRST_REQUEST_ID: RequestId = 1_000_000;

/// Terminal orders kept for lookup before the oldest are pruned.
const MAX_TERMINAL_ORDERS: usize = 256;

// =============================================================================
// Gateway
// =============================================================================

/// Opens TWS API sessions over TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TwsGateway;

impl TwsGateway {
    /// Create a gateway.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BrokerGateway for TwsGateway {
    async fn connect(
        &self,
        endpoint: &GatewayEndpoint,
        client_id: ClientId,
        timeout: Duration,
    ) -> Result<Arc<dyn BrokerConnection>, GatewayError> {
        let address = endpoint.address();
        let session = tokio::time::timeout(timeout, handshake(&address, client_id))
            .await
            .map_err(|_| GatewayError::Timeout(timeout))??;

        tracing::debug!(
            address = %address,
            client_id,
            server_version = session.server_version,
            next_order_id = session.next_order_id,
            "TWS handshake complete"
        );

        Ok(Arc::new(TwsConnection::start(client_id, session)))
    }
}

/// Result of a completed handshake.
struct Handshake {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    server_version: i32,
    next_order_id: OrderId,
    accounts: Vec<String>,
}

async fn handshake(address: &str, client_id: ClientId) -> Result<Handshake, GatewayError> {
    let stream = TcpStream::connect(address).await.map_err(io_error)?;
    stream.set_nodelay(true).map_err(io_error)?;
    let (mut reader, mut writer) = stream.into_split();

    writer
        .write_all(&codec::encode_handshake(SERVER_VERSION, SERVER_VERSION))
        .await
        .map_err(io_error)?;

    let greeting = codec::read_frame(&mut reader)
        .await
        .map_err(codec_error)?
        .ok_or_else(|| GatewayError::Rejected("gateway closed the connection".to_string()))?;
    let server_version: i32 = greeting
        .first()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| GatewayError::Rejected(format!("unexpected greeting {greeting:?}")))?;

    writer
        .write_all(&codec::encode_fields(&messages::start_api(client_id)))
        .await
        .map_err(io_error)?;

    let mut accounts = Vec::new();
    loop {
        let Some(fields) = codec::read_frame(&mut reader).await.map_err(codec_error)? else {
            return Err(GatewayError::Rejected(
                "gateway closed the connection during session start".to_string(),
            ));
        };

        match messages::decode(&fields) {
            Ok(Incoming::NextValidId(next_order_id)) => {
                return Ok(Handshake {
                    reader,
                    writer,
                    server_version,
                    next_order_id,
                    accounts,
                });
            }
            Ok(Incoming::ManagedAccounts(list)) => accounts = list,
            Ok(Incoming::Error { code: codes::CLIENT_ID_IN_USE, .. }) => {
                return Err(GatewayError::ClientIdInUse(client_id));
            }
            Ok(Incoming::Error { code, message, .. }) if !codes::is_informational(code) => {
                tracing::debug!(code, reason = %message, "Notice during session start");
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "Undecodable frame during session start"),
        }
    }
}

fn io_error(e: std::io::Error) -> GatewayError {
    GatewayError::Io(e.to_string())
}

fn codec_error(e: CodecError) -> GatewayError {
    GatewayError::Io(e.to_string())
}

// =============================================================================
// Shared State
// =============================================================================

/// State written by the reader task and read by callers.
#[derive(Default)]
struct Inbox {
    quotes: HashMap<RequestId, watch::Sender<QuoteFields>>,
    orders: HashMap<OrderId, OrderStatus>,
    accounts: Vec<String>,
    account_waiters: Vec<oneshot::Sender<Vec<String>>>,
    time_waiters: VecDeque<oneshot::Sender<i64>>,
    positions: Vec<Position>,
    position_waiters: Vec<oneshot::Sender<Vec<Position>>>,
}

impl Inbox {
    /// Record `status`, then drop the oldest terminal entries beyond the
    /// retention bound. Order ids only grow, so the smallest are oldest.
    fn record_order(&mut self, status: OrderStatus) {
        self.orders.insert(status.order_id, status);

        let mut terminal: Vec<OrderId> = self
            .orders
            .values()
            .filter(|order| order.is_terminal())
            .map(|order| order.order_id)
            .collect();
        if terminal.len() <= MAX_TERMINAL_ORDERS {
            return;
        }
        terminal.sort_unstable();
        for order_id in &terminal[..terminal.len() - MAX_TERMINAL_ORDERS] {
            self.orders.remove(order_id);
        }
    }

    /// Current status of `order_id`. A terminal status is handed out once
    /// and then forgotten.
    fn take_order(&mut self, order_id: OrderId) -> Option<OrderStatus> {
        let status = self.orders.get(&order_id)?.clone();
        if status.is_terminal() {
            self.orders.remove(&order_id);
        }
        Some(status)
    }
}

struct Shared {
    inbox: Mutex<Inbox>,
    connected: AtomicBool,
    cancel: CancellationToken,
}

impl Shared {
    fn close(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            tracing::info!("TWS connection closed");
        }
        self.cancel.cancel();
        // Dropping the senders wakes every waiter with an error.
        let mut inbox = self.inbox.lock();
        inbox.quotes.clear();
        inbox.account_waiters.clear();
        inbox.time_waiters.clear();
        inbox.position_waiters.clear();
        inbox.positions.clear();
    }

    fn dispatch(&self, msg: Incoming, outgoing: &mpsc::UnboundedSender<Vec<u8>>) {
        match msg {
            Incoming::TickPrice {
                request_id,
                field: Some(field),
                price,
            } => {
                let inbox = self.inbox.lock();
                if let Some(tx) = inbox.quotes.get(&request_id) {
                    tx.send_modify(|fields| match field {
                        PriceField::Bid => fields.bid = price,
                        PriceField::Ask => fields.ask = price,
                        PriceField::Last => fields.last = price,
                        PriceField::Close => fields.close = price,
                    });
                }
            }
            Incoming::TickSnapshotEnd(request_id) => {
                self.inbox.lock().quotes.remove(&request_id);
            }
            Incoming::OrderStatus {
                order_id,
                status,
                filled,
                avg_fill_price,
            } => {
                let Some(state) = order_state(&status, filled) else {
                    tracing::debug!(order_id, status = %status, "Ignoring order status");
                    return;
                };
                tracing::debug!(order_id, status = state.as_str(), %filled, "Order status");
                self.inbox.lock().record_order(OrderStatus {
                    order_id,
                    status: state,
                    filled_quantity: filled,
                    average_fill_price: avg_fill_price,
                });
            }
            Incoming::Error { id, code, message } => self.on_error(id, code, &message),
            Incoming::ManagedAccounts(accounts) => {
                let mut inbox = self.inbox.lock();
                for waiter in inbox.account_waiters.drain(..) {
                    let _ = waiter.send(accounts.clone());
                }
                inbox.accounts = accounts;
            }
            Incoming::CurrentTime(secs) => {
                if let Some(waiter) = self.inbox.lock().time_waiters.pop_front() {
                    let _ = waiter.send(secs);
                }
            }
            Incoming::Position(position) => self.inbox.lock().positions.push(position),
            Incoming::PositionEnd => {
                let mut inbox = self.inbox.lock();
                let positions = std::mem::take(&mut inbox.positions);
                for waiter in inbox.position_waiters.drain(..) {
                    let _ = waiter.send(positions.clone());
                }
                drop(inbox);
                let _ = outgoing.send(codec::encode_fields(&messages::cancel_positions()));
            }
            Incoming::MarketDataType { request_id, code } => {
                tracing::trace!(request_id, code, "Market data type in effect");
            }
            Incoming::NextValidId(_) | Incoming::TickPrice { field: None, .. } | Incoming::Other(_) => {}
        }
    }

    fn on_error(&self, id: i64, code: i32, message: &str) {
        if codes::is_informational(code) {
            tracing::debug!(id, code, reason = message, "TWS notice");
            return;
        }

        let mut inbox = self.inbox.lock();
        if let Some(state) = order_state_for_error(code)
            && let Some(order) = inbox.orders.get(&id)
        {
            tracing::warn!(order_id = id, code, reason = message, "Order ended by broker error");
            let status = OrderStatus {
                status: state,
                ..order.clone()
            };
            inbox.record_order(status);
            return;
        }

        if let Ok(request_id) = RequestId::try_from(id)
            && inbox.quotes.contains_key(&request_id)
        {
            if codes::is_market_data_notice(code) {
                tracing::info!(request_id, code, reason = message, "Market data notice");
            } else {
                inbox.quotes.remove(&request_id);
                tracing::warn!(request_id, code, reason = message, "Market data request failed");
            }
            return;
        }
        drop(inbox);

        if code == codes::CONNECTIVITY_LOST {
            tracing::warn!(code, reason = message, "Gateway lost connectivity to the broker");
        } else {
            tracing::warn!(id, code, reason = message, "TWS error");
        }
    }
}

// =============================================================================
// Connection
// =============================================================================

/// One live TWS API session.
pub struct TwsConnection {
    client_id: ClientId,
    shared: Arc<Shared>,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    next_order_id: AtomicI64,
    next_request_id: AtomicI32,
}

impl std::fmt::Debug for TwsConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwsConnection")
            .field("client_id", &self.client_id)
            .field("connected", &self.shared.connected.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl TwsConnection {
    fn start(client_id: ClientId, session: Handshake) -> Self {
        let shared = Arc::new(Shared {
            inbox: Mutex::new(Inbox {
                accounts: session.accounts,
                ..Inbox::default()
            }),
            connected: AtomicBool::new(true),
            cancel: CancellationToken::new(),
        });
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(session.writer, outgoing_rx, Arc::clone(&shared)));
        tokio::spawn(read_loop(session.reader, outgoing.clone(), Arc::clone(&shared)));

        Self {
            client_id,
            shared,
            outgoing,
            next_order_id: AtomicI64::new(session.next_order_id),
            next_request_id: AtomicI32::new(FIRST_REQUEST_ID),
        }
    }

    fn send(&self, fields: &[String]) -> Result<(), GatewayError> {
        if !self.is_connected() {
            return Err(GatewayError::NotConnected);
        }
        self.outgoing
            .send(codec::encode_fields(fields))
            .map_err(|_| GatewayError::NotConnected)
    }
}

impl Drop for TwsConnection {
    fn drop(&mut self) {
        self.shared.close();
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    shared: Arc<Shared>,
) {
    loop {
        tokio::select! {
            () = shared.cancel.cancelled() => break,
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = writer.write_all(&frame).await {
                    tracing::warn!(error = %e, "TWS write failed");
                    break;
                }
            }
        }
    }
    let _ = writer.shutdown().await;
    shared.close();
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    shared: Arc<Shared>,
) {
    loop {
        let frame = tokio::select! {
            () = shared.cancel.cancelled() => break,
            frame = codec::read_frame(&mut reader) => frame,
        };

        match frame {
            Ok(Some(fields)) => match messages::decode(&fields) {
                Ok(msg) => shared.dispatch(msg, &outgoing),
                Err(e) => tracing::debug!(error = %e, "Skipping undecodable TWS frame"),
            },
            Ok(None) => {
                tracing::warn!("TWS gateway closed the connection");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "TWS read failed");
                break;
            }
        }
    }
    shared.close();
}

#[async_trait]
impl BrokerConnection for TwsConnection {
    fn client_id(&self) -> ClientId {
        self.client_id
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    async fn set_market_data_type(&self, kind: MarketDataType) -> Result<(), GatewayError> {
        self.send(&messages::req_market_data_type(kind))
    }

    async fn request_market_data(
        &self,
        contract: &Contract,
        snapshot: bool,
    ) -> Result<MarketDataTicket, GatewayError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = watch::channel(QuoteFields::default());
        self.shared.inbox.lock().quotes.insert(request_id, tx);

        if let Err(e) = self.send(&messages::req_mkt_data(request_id, contract, snapshot)) {
            self.shared.inbox.lock().quotes.remove(&request_id);
            return Err(e);
        }

        Ok(MarketDataTicket {
            request_id,
            fields: rx,
        })
    }

    fn cancel_market_data(&self, request_id: RequestId) {
        let was_active = self.shared.inbox.lock().quotes.remove(&request_id).is_some();
        if was_active || self.is_connected() {
            let _ = self.send(&messages::cancel_mkt_data(request_id));
        }
    }

    fn next_order_id(&self) -> OrderId {
        self.next_order_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn place_order(&self, contract: &Contract, order: &BrokerOrder) -> Result<(), GatewayError> {
        self.shared
            .inbox
            .lock()
            .record_order(OrderStatus::submitted(order.order_id));
        self.send(&messages::place_order(contract, order))
    }

    async fn order_status(&self, order_id: OrderId) -> Result<Option<OrderStatus>, GatewayError> {
        Ok(self.shared.inbox.lock().take_order(order_id))
    }

    async fn managed_accounts(&self) -> Result<Vec<String>, GatewayError> {
        let rx = {
            let mut inbox = self.shared.inbox.lock();
            if !inbox.accounts.is_empty() {
                return Ok(inbox.accounts.clone());
            }
            let (tx, rx) = oneshot::channel();
            inbox.account_waiters.push(tx);
            rx
        };
        self.send(&messages::req_managed_accts())?;
        rx.await.map_err(|_| GatewayError::NotConnected)
    }

    async fn positions(&self) -> Result<Vec<Position>, GatewayError> {
        let (tx, rx) = oneshot::channel();
        self.shared.inbox.lock().position_waiters.push(tx);
        self.send(&messages::req_positions())?;
        rx.await.map_err(|_| GatewayError::NotConnected)
    }

    async fn current_time(&self) -> Result<DateTime<Utc>, GatewayError> {
        let (tx, rx) = oneshot::channel();
        self.shared.inbox.lock().time_waiters.push_back(tx);
        self.send(&messages::req_current_time())?;
        let secs = rx.await.map_err(|_| GatewayError::NotConnected)?;
        DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| GatewayError::Rejected(format!("invalid server time {secs}")))
    }

    async fn disconnect(&self) {
        self.shared.close();
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn shared() -> Shared {
        Shared {
            inbox: Mutex::new(Inbox::default()),
            connected: AtomicBool::new(true),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn ticks_populate_quote_fields() {
        let shared = shared();
        let (out, _rx) = mpsc::unbounded_channel();
        let (tx, rx) = watch::channel(QuoteFields::default());
        shared.inbox.lock().quotes.insert(4, tx);

        shared.dispatch(
            Incoming::TickPrice {
                request_id: 4,
                field: Some(PriceField::Bid),
                price: Some(dec!(10.5)),
            },
            &out,
        );
        shared.dispatch(Incoming::TickSnapshotEnd(4), &out);

        assert_eq!(rx.borrow().bid, Some(dec!(10.5)));
        assert!(shared.inbox.lock().quotes.is_empty());
    }

    #[test]
    fn order_error_marks_rejected() {
        let shared = shared();
        shared
            .inbox
            .lock()
            .orders
            .insert(12, OrderStatus::submitted(12));

        shared.on_error(12, 201, "Order rejected - reason: margin");

        let status = shared.inbox.lock().orders[&12].clone();
        assert_eq!(status.status, crate::domain::order::OrderState::Rejected);
    }

    #[test]
    fn delayed_data_notice_keeps_subscription() {
        let shared = shared();
        let (out, _out_rx) = mpsc::unbounded_channel();
        let (tx, rx) = watch::channel(QuoteFields::default());
        shared.inbox.lock().quotes.insert(FIRST_REQUEST_ID, tx);

        shared.on_error(
            i64::from(FIRST_REQUEST_ID),
            codes::DELAYED_DATA_FOLLOWS,
            "Requested market data is not subscribed. Displaying delayed market data.",
        );
        shared.dispatch(
            Incoming::TickPrice {
                request_id: FIRST_REQUEST_ID,
                field: PriceField::from_tick_type(68),
                price: Some(dec!(190.5)),
            },
            &out,
        );

        assert_eq!(rx.borrow().last, Some(dec!(190.5)));
        assert!(rx.has_changed().is_ok());
    }

    #[test]
    fn failed_market_data_request_ends_subscription() {
        let shared = shared();
        let (tx, rx) = watch::channel(QuoteFields::default());
        shared.inbox.lock().quotes.insert(FIRST_REQUEST_ID, tx);

        shared.on_error(
            i64::from(FIRST_REQUEST_ID),
            10168,
            "Requested market data is not subscribed. Delayed market data is not enabled.",
        );

        assert!(shared.inbox.lock().quotes.is_empty());
        assert!(rx.has_changed().is_err());
    }

    #[test]
    fn order_warning_leaves_quotes_alone() {
        let shared = shared();
        let (tx, _rx) = watch::channel(QuoteFields::default());
        shared.inbox.lock().quotes.insert(FIRST_REQUEST_ID, tx);
        shared.inbox.lock().record_order(OrderStatus::submitted(7));

        shared.on_error(7, 399, "Order message: warning");

        let inbox = shared.inbox.lock();
        assert_eq!(inbox.quotes.len(), 1);
        assert_eq!(inbox.orders[&7].status, crate::domain::order::OrderState::Submitted);
    }

    #[test]
    fn terminal_order_is_forgotten_once_read() {
        let shared = shared();
        let (out, _out_rx) = mpsc::unbounded_channel();
        shared.inbox.lock().record_order(OrderStatus::submitted(3));

        assert!(shared.inbox.lock().take_order(3).is_some());
        assert!(shared.inbox.lock().orders.contains_key(&3));

        shared.dispatch(
            Incoming::OrderStatus {
                order_id: 3,
                status: "Filled".to_string(),
                filled: dec!(5),
                avg_fill_price: Some(dec!(190.05)),
            },
            &out,
        );

        let status = shared.inbox.lock().take_order(3).unwrap();
        assert!(status.is_terminal());
        assert!(shared.inbox.lock().take_order(3).is_none());
        assert!(shared.inbox.lock().orders.is_empty());
    }

    #[test]
    fn unread_terminal_orders_are_bounded() {
        let shared = shared();
        let mut inbox = shared.inbox.lock();
        inbox.record_order(OrderStatus::submitted(1));
        let filled = OrderId::try_from(MAX_TERMINAL_ORDERS + 10).unwrap();
        for order_id in 2..filled + 2 {
            inbox.record_order(OrderStatus {
                status: crate::domain::order::OrderState::Filled,
                ..OrderStatus::submitted(order_id)
            });
        }

        assert_eq!(inbox.orders.len(), MAX_TERMINAL_ORDERS + 1);
        assert!(inbox.orders.contains_key(&1), "working orders are never pruned");
        assert!(!inbox.orders.contains_key(&2));
    }

    #[tokio::test]
    async fn request_ids_do_not_overlap_order_ids() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (_server, _) = listener.accept().await.unwrap();
        let (reader, writer) = client.into_split();

        let conn = TwsConnection::start(
            7,
            Handshake {
                reader,
                writer,
                server_version: SERVER_VERSION,
                next_order_id: 1,
                accounts: Vec::new(),
            },
        );
        let contract = crate::domain::contract::resolve(
            "AAPL",
            &crate::domain::contract::ContractHints::default(),
        )
        .unwrap();

        let ticket = conn.request_market_data(&contract, true).await.unwrap();

        assert_eq!(conn.next_order_id(), 1);
        assert_eq!(ticket.request_id, FIRST_REQUEST_ID);
    }

    #[test]
    fn close_wakes_waiters() {
        let shared = shared();
        let (tx, mut rx) = oneshot::channel();
        shared.inbox.lock().time_waiters.push_back(tx);

        shared.close();

        assert!(!shared.connected.load(Ordering::SeqCst));
        assert!(shared.cancel.is_cancelled());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn position_end_answers_waiters_and_cancels() {
        let shared = shared();
        let (out, mut out_rx) = mpsc::unbounded_channel();
        let (tx, mut rx) = oneshot::channel();
        shared.inbox.lock().position_waiters.push(tx);

        shared.dispatch(
            Incoming::Position(Position {
                account: "DU1".to_string(),
                symbol: "AAPL".to_string(),
                quantity: dec!(3),
                average_cost: dec!(150),
            }),
            &out,
        );
        shared.dispatch(Incoming::PositionEnd, &out);

        assert_eq!(rx.try_recv().unwrap().len(), 1);
        assert!(out_rx.try_recv().is_ok());
    }
}
