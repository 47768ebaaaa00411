//! TWS Message Types
//!
//! Encoders for the requests the bridge sends and a decoder for the
//! messages it reacts to. Field layouts follow API server version 100; the
//! client advertises exactly that version so the gateway never sends a
//! newer layout.

use rust_decimal::Decimal;

use crate::application::ports::{BrokerOrder, BrokerOrderKind, RequestId};
use crate::domain::contract::{AssetClass, Contract, DEFAULT_EXCHANGE};
use crate::domain::order::{OrderId, OrderSide, OrderState, Position};
use crate::domain::quote::MarketDataType;
use crate::domain::session::ClientId;
use crate::infrastructure::tws::codec::{CodecError, FieldReader};

/// Server version pinned by the handshake.
pub const SERVER_VERSION: i32 = 100;

/// Exchange used for currency pairs.
pub const FOREX_EXCHANGE: &str = "IDEALPRO";

// =============================================================================
// Message Ids
// =============================================================================

/// Outgoing message ids.
pub mod outgoing {
    /// Request market data.
    pub const REQ_MKT_DATA: i32 = 1;
    /// Cancel market data.
    pub const CANCEL_MKT_DATA: i32 = 2;
    /// Place order.
    pub const PLACE_ORDER: i32 = 3;
    /// Request managed accounts.
    pub const REQ_MANAGED_ACCTS: i32 = 17;
    /// Request server time.
    pub const REQ_CURRENT_TIME: i32 = 49;
    /// Select market data type.
    pub const REQ_MARKET_DATA_TYPE: i32 = 59;
    /// Request positions.
    pub const REQ_POSITIONS: i32 = 61;
    /// Stop position updates.
    pub const CANCEL_POSITIONS: i32 = 64;
    /// Start the API session.
    pub const START_API: i32 = 71;
}

/// Incoming message ids.
pub mod incoming {
    /// Price tick.
    pub const TICK_PRICE: i32 = 1;
    /// Order status.
    pub const ORDER_STATUS: i32 = 3;
    /// Error or notice.
    pub const ERR_MSG: i32 = 4;
    /// Next valid order id.
    pub const NEXT_VALID_ID: i32 = 9;
    /// Managed accounts list.
    pub const MANAGED_ACCTS: i32 = 15;
    /// Server time.
    pub const CURRENT_TIME: i32 = 49;
    /// Snapshot complete.
    pub const TICK_SNAPSHOT_END: i32 = 57;
    /// Market data type in effect.
    pub const MARKET_DATA_TYPE: i32 = 58;
    /// Position row.
    pub const POSITION_DATA: i32 = 61;
    /// End of positions.
    pub const POSITION_END: i32 = 62;
}

/// Error codes with special handling.
pub mod codes {
    /// Order rejected.
    pub const ORDER_REJECTED: i32 = 201;
    /// Order cancelled.
    pub const ORDER_CANCELLED: i32 = 202;
    /// Security not available or not allowed for this account.
    pub const ORDER_NOT_ALLOWED: i32 = 203;
    /// Client id already in use.
    pub const CLIENT_ID_IN_USE: i32 = 326;
    /// Connectivity between gateway and IB lost.
    pub const CONNECTIVITY_LOST: i32 = 1100;
    /// Part of the requested market data is not subscribed.
    pub const PARTIALLY_SUBSCRIBED: i32 = 10090;
    /// Not subscribed; delayed data follows on the same request.
    pub const DELAYED_DATA_FOLLOWS: i32 = 10167;
    /// Live data held by a competing session; delayed data follows.
    pub const COMPETING_LIVE_SESSION: i32 = 10197;

    /// Whether `code` is an informational notice (farm status and similar).
    #[must_use]
    pub const fn is_informational(code: i32) -> bool {
        matches!(code, 2100..=2199)
    }

    /// Whether `code` warns about a market data request that keeps
    /// streaming (typically switching to delayed ticks).
    #[must_use]
    pub const fn is_market_data_notice(code: i32) -> bool {
        matches!(
            code,
            PARTIALLY_SUBSCRIBED | DELAYED_DATA_FOLLOWS | COMPETING_LIVE_SESSION
        )
    }
}

// =============================================================================
// Outgoing
// =============================================================================

fn bool_field(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

fn side_field(side: OrderSide) -> String {
    match side {
        OrderSide::Buy => "BUY",
        OrderSide::Sell => "SELL",
    }
    .to_string()
}

/// Contract description fields shared by market data and order requests:
/// conId, symbol, secType, expiry, strike, right, multiplier, exchange,
/// primary exchange, currency, local symbol, trading class.
fn contract_fields(contract: &Contract) -> Vec<String> {
    let (sec_type, exchange) = match contract.asset_class {
        AssetClass::Equity => (
            "STK",
            contract
                .exchange
                .clone()
                .unwrap_or_else(|| DEFAULT_EXCHANGE.to_string()),
        ),
        AssetClass::CurrencyPair => ("CASH", FOREX_EXCHANGE.to_string()),
    };

    vec![
        "0".to_string(),
        contract.symbol.clone(),
        sec_type.to_string(),
        String::new(),
        "0".to_string(),
        String::new(),
        String::new(),
        exchange,
        String::new(),
        contract.currency.clone(),
        String::new(),
        String::new(),
    ]
}

/// `START_API` with the client id.
#[must_use]
pub fn start_api(client_id: ClientId) -> Vec<String> {
    vec![
        outgoing::START_API.to_string(),
        "2".to_string(),
        client_id.to_string(),
        String::new(),
    ]
}

/// Select the market data type for subsequent requests.
#[must_use]
pub fn req_market_data_type(kind: MarketDataType) -> Vec<String> {
    vec![
        outgoing::REQ_MARKET_DATA_TYPE.to_string(),
        "1".to_string(),
        kind.code().to_string(),
    ]
}

/// Request market data for `contract`.
#[must_use]
pub fn req_mkt_data(request_id: RequestId, contract: &Contract, snapshot: bool) -> Vec<String> {
    let mut fields = vec![
        outgoing::REQ_MKT_DATA.to_string(),
        "11".to_string(),
        request_id.to_string(),
    ];
    fields.extend(contract_fields(contract));
    fields.extend([
        bool_field(false), // delta neutral
        String::new(),     // generic tick list
        bool_field(snapshot),
        String::new(), // options
    ]);
    fields
}

/// Cancel a streaming market data request.
#[must_use]
pub fn cancel_mkt_data(request_id: RequestId) -> Vec<String> {
    vec![
        outgoing::CANCEL_MKT_DATA.to_string(),
        "2".to_string(),
        request_id.to_string(),
    ]
}

/// Request server time.
#[must_use]
pub fn req_current_time() -> Vec<String> {
    vec![outgoing::REQ_CURRENT_TIME.to_string(), "1".to_string()]
}

/// Request all positions.
#[must_use]
pub fn req_positions() -> Vec<String> {
    vec![outgoing::REQ_POSITIONS.to_string(), "1".to_string()]
}

/// Stop position updates.
#[must_use]
pub fn cancel_positions() -> Vec<String> {
    vec![outgoing::CANCEL_POSITIONS.to_string(), "1".to_string()]
}

/// Request the managed accounts list.
#[must_use]
pub fn req_managed_accts() -> Vec<String> {
    vec![outgoing::REQ_MANAGED_ACCTS.to_string(), "1".to_string()]
}

/// Place one order leg.
///
/// Every optional order attribute the bridge does not use is sent as its
/// unset value: empty strings for prices and text, `0` for flags.
#[must_use]
pub fn place_order(contract: &Contract, order: &BrokerOrder) -> Vec<String> {
    let (order_type, limit, aux) = match order.kind {
        BrokerOrderKind::Market => ("MKT", None, None),
        BrokerOrderKind::Limit { limit } => ("LMT", Some(limit), None),
        BrokerOrderKind::Stop { stop } => ("STP", None, Some(stop)),
        BrokerOrderKind::StopLimit { limit, stop } => ("STP LMT", Some(limit), Some(stop)),
    };
    let price = |p: Option<Decimal>| p.map(|p| p.normalize().to_string()).unwrap_or_default();
    let empty = String::new;
    let zero = || "0".to_string();

    let mut fields = vec![
        outgoing::PLACE_ORDER.to_string(),
        "45".to_string(),
        order.order_id.to_string(),
    ];
    fields.extend(contract_fields(contract));
    fields.extend([empty(), empty()]); // sec id type, sec id

    // Main order fields.
    fields.extend([
        side_field(order.side),
        order.quantity.normalize().to_string(),
        order_type.to_string(),
        price(limit),
        price(aux),
    ]);

    // Extended fields: tif, oca group, account, open/close, origin, order
    // ref, transmit, parent id, block, sweep, display size, trigger method,
    // outside rth, hidden.
    fields.extend([
        "DAY".to_string(),
        empty(),
        empty(),
        empty(),
        zero(),
        empty(),
        bool_field(order.transmit),
        order.parent_id.unwrap_or(0).to_string(),
        bool_field(false),
        bool_field(false),
        zero(),
        zero(),
        bool_field(false),
        bool_field(false),
    ]);

    // Shares allocation (deprecated), discretionary amount, good after,
    // good till, FA group, FA method, FA percentage, FA profile.
    fields.extend([empty(), zero(), empty(), empty(), empty(), empty(), empty(), empty()]);

    // Short sale slot, designated location, exempt code, OCA type, rule
    // 80A, settling firm, all-or-none, min qty, percent offset, e-trade
    // only, firm quote only, NBBO price cap, auction strategy, starting
    // price, stock ref price, delta, stock range lower/upper, override
    // constraints, volatility, volatility type, delta neutral type/aux.
    fields.extend([
        zero(),
        empty(),
        "-1".to_string(),
        zero(),
        empty(),
        empty(),
        bool_field(false),
        empty(),
        empty(),
        bool_field(false),
        bool_field(false),
        empty(),
        zero(),
        empty(),
        empty(),
        empty(),
        empty(),
        empty(),
        bool_field(false),
        empty(),
        empty(),
        empty(),
        empty(),
    ]);

    // Continuous update, reference price type, trail stop price, trailing
    // percent, scale init/subs level size, scale price increment, scale
    // table, active start/stop, hedge type, opt out smart routing, clearing
    // account, clearing intent, not held, delta neutral contract, algo
    // strategy, algo id, what-if, misc options, solicited, randomize
    // size/price.
    fields.extend([
        bool_field(false),
        empty(),
        empty(),
        empty(),
        empty(),
        empty(),
        empty(),
        empty(),
        empty(),
        empty(),
        empty(),
        bool_field(false),
        empty(),
        empty(),
        bool_field(false),
        bool_field(false),
        empty(),
        empty(),
        bool_field(false),
        empty(),
        bool_field(false),
        bool_field(false),
        bool_field(false),
    ]);

    fields
}

// =============================================================================
// Incoming
// =============================================================================

/// Price fields carried by `tickPrice`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceField {
    /// Bid (live or delayed).
    Bid,
    /// Ask (live or delayed).
    Ask,
    /// Last (live or delayed).
    Last,
    /// Previous close (live or delayed).
    Close,
}

impl PriceField {
    /// Map a tick type to the field it populates.
    #[must_use]
    pub const fn from_tick_type(tick_type: i32) -> Option<Self> {
        match tick_type {
            1 | 66 => Some(Self::Bid),
            2 | 67 => Some(Self::Ask),
            4 | 68 => Some(Self::Last),
            9 | 75 => Some(Self::Close),
            _ => None,
        }
    }
}

/// Decoded inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// Price tick. `price` is `None` for non-positive values.
    TickPrice {
        /// Market data request.
        request_id: RequestId,
        /// Populated field, if this tick type is tracked.
        field: Option<PriceField>,
        /// Price.
        price: Option<Decimal>,
    },
    /// Order status report.
    OrderStatus {
        /// Order id.
        order_id: OrderId,
        /// Broker status string.
        status: String,
        /// Filled quantity.
        filled: Decimal,
        /// Average fill price.
        avg_fill_price: Option<Decimal>,
    },
    /// Error or notice. `id` is the request or order id, or -1.
    Error {
        /// Request or order id.
        id: i64,
        /// Error code.
        code: i32,
        /// Error text.
        message: String,
    },
    /// Next valid order id.
    NextValidId(OrderId),
    /// Managed accounts.
    ManagedAccounts(Vec<String>),
    /// Server time in seconds since the epoch.
    CurrentTime(i64),
    /// Snapshot request complete.
    TickSnapshotEnd(RequestId),
    /// Market data type in effect for a request.
    MarketDataType {
        /// Market data request.
        request_id: RequestId,
        /// Type code.
        code: i32,
    },
    /// Position row.
    Position(Position),
    /// End of positions.
    PositionEnd,
    /// A message the bridge does not use.
    Other(i32),
}

/// Decode a frame.
///
/// # Errors
///
/// Returns an error if a used message is truncated or malformed.
pub fn decode(fields: &[String]) -> Result<Incoming, CodecError> {
    let mut r = FieldReader::new(fields);
    let msg_id: i32 = r.int("message id")?;

    let msg = match msg_id {
        incoming::TICK_PRICE => {
            r.skip(1);
            let request_id = r.int("request id")?;
            let tick_type: i32 = r.int("tick type")?;
            let price = r.decimal("price")?.filter(|p| *p > Decimal::ZERO);
            Incoming::TickPrice {
                request_id,
                field: PriceField::from_tick_type(tick_type),
                price,
            }
        }
        incoming::ORDER_STATUS => {
            r.skip(1);
            let order_id = r.int("order id")?;
            let status = r.string("status")?.to_string();
            let filled = r.decimal("filled")?.unwrap_or_default();
            r.skip(1); // remaining
            let avg_fill_price = r.decimal("average fill price")?.filter(|p| *p > Decimal::ZERO);
            Incoming::OrderStatus {
                order_id,
                status,
                filled,
                avg_fill_price,
            }
        }
        incoming::ERR_MSG => {
            r.skip(1);
            Incoming::Error {
                id: r.int("id")?,
                code: r.int("code")?,
                message: r.string("message")?.to_string(),
            }
        }
        incoming::NEXT_VALID_ID => {
            r.skip(1);
            Incoming::NextValidId(r.int("order id")?)
        }
        incoming::MANAGED_ACCTS => {
            r.skip(1);
            let accounts = r
                .string("accounts")?
                .split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string)
                .collect();
            Incoming::ManagedAccounts(accounts)
        }
        incoming::CURRENT_TIME => {
            r.skip(1);
            Incoming::CurrentTime(r.int("time")?)
        }
        incoming::TICK_SNAPSHOT_END => {
            r.skip(1);
            Incoming::TickSnapshotEnd(r.int("request id")?)
        }
        incoming::MARKET_DATA_TYPE => {
            r.skip(1);
            Incoming::MarketDataType {
                request_id: r.int("request id")?,
                code: r.int("market data type")?,
            }
        }
        incoming::POSITION_DATA => Incoming::Position(decode_position(&mut r)?),
        incoming::POSITION_END => Incoming::PositionEnd,
        other => Incoming::Other(other),
    };

    Ok(msg)
}

fn decode_position(r: &mut FieldReader<'_>) -> Result<Position, CodecError> {
    let version: i32 = r.int("version")?;
    let account = r.string("account")?.to_string();
    r.skip(1); // con id
    let symbol = r.string("symbol")?;
    let sec_type = r.string("sec type")?;
    r.skip(4); // expiry, strike, right, multiplier
    r.skip(1); // exchange
    let currency = r.string("currency")?;
    r.skip(1); // local symbol
    if version >= 2 {
        r.skip(1); // trading class
    }
    let quantity = r.decimal("position")?.unwrap_or_default();
    let average_cost = if version >= 3 {
        r.decimal("average cost")?.unwrap_or_default()
    } else {
        Decimal::ZERO
    };

    let symbol = if sec_type == "CASH" {
        format!("{symbol}.{currency}")
    } else {
        symbol.to_string()
    };

    Ok(Position {
        account,
        symbol,
        quantity,
        average_cost,
    })
}

/// Map a broker status string to an order state.
///
/// Returns `None` for statuses that carry no lifecycle information.
#[must_use]
pub fn order_state(status: &str, filled: Decimal) -> Option<OrderState> {
    match status {
        "Filled" => Some(OrderState::Filled),
        "Cancelled" | "ApiCancelled" => Some(OrderState::Cancelled),
        "Inactive" => Some(OrderState::Rejected),
        "PreSubmitted" | "Submitted" | "ApiPending" | "PendingSubmit" | "PendingCancel" => {
            if filled > Decimal::ZERO {
                Some(OrderState::PartiallyFilled)
            } else {
                Some(OrderState::Submitted)
            }
        }
        _ => None,
    }
}

/// Order state implied by an order-scoped error code, if any.
#[must_use]
pub const fn order_state_for_error(code: i32) -> Option<OrderState> {
    match code {
        codes::ORDER_REJECTED | codes::ORDER_NOT_ALLOWED => Some(OrderState::Rejected),
        codes::ORDER_CANCELLED => Some(OrderState::Cancelled),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use test_case::test_case;

    use super::*;
    use crate::domain::contract::{ContractHints, resolve};

    fn frame(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn market_data_request_for_equity() {
        let contract = resolve("AAPL", &ContractHints::default()).unwrap();
        let fields = req_mkt_data(5, &contract, true);

        assert_eq!(
            fields,
            frame(&[
                "1", "11", "5", "0", "AAPL", "STK", "", "0", "", "", "SMART", "", "USD", "", "",
                "0", "", "1", ""
            ])
        );
    }

    #[test]
    fn currency_pair_routes_to_idealpro() {
        let contract = resolve("EUR.USD", &ContractHints::default()).unwrap();
        let fields = req_mkt_data(1, &contract, false);

        assert_eq!(fields[4], "EUR");
        assert_eq!(fields[5], "CASH");
        assert_eq!(fields[10], "IDEALPRO");
        assert_eq!(fields[12], "USD");
        assert_eq!(fields[17], "0");
    }

    #[test]
    fn place_order_layout() {
        let contract = resolve("AAPL", &ContractHints::default()).unwrap();
        let order = BrokerOrder {
            order_id: 12,
            side: OrderSide::Sell,
            quantity: dec!(10),
            kind: BrokerOrderKind::StopLimit {
                limit: dec!(99.50),
                stop: dec!(100),
            },
            parent_id: Some(11),
            transmit: false,
        };

        let fields = place_order(&contract, &order);

        assert_eq!(&fields[..3], &frame(&["3", "45", "12"])[..]);
        // 3 header + 12 contract + 2 sec id
        let main = &fields[17..22];
        assert_eq!(main, &frame(&["SELL", "10", "STP LMT", "99.5", "100"])[..]);
        assert_eq!(fields[22], "DAY");
        assert_eq!(fields[28], "0"); // transmit
        assert_eq!(fields[29], "11"); // parent id
        assert_eq!(fields.len(), 17 + 5 + 14 + 8 + 23 + 23);
    }

    #[test]
    fn decodes_tick_price() {
        let msg = decode(&frame(&["1", "6", "3", "2", "101.25", "100", "0"])).unwrap();
        assert_eq!(
            msg,
            Incoming::TickPrice {
                request_id: 3,
                field: Some(PriceField::Ask),
                price: Some(dec!(101.25)),
            }
        );
    }

    #[test]
    fn non_positive_tick_is_unset() {
        let msg = decode(&frame(&["1", "6", "3", "1", "-1", "0", "0"])).unwrap();
        assert!(matches!(msg, Incoming::TickPrice { price: None, .. }));
    }

    #[test_case(1, Some(PriceField::Bid))]
    #[test_case(67, Some(PriceField::Ask))]
    #[test_case(68, Some(PriceField::Last))]
    #[test_case(75, Some(PriceField::Close))]
    #[test_case(14, None)]
    fn tick_type_mapping(tick_type: i32, expected: Option<PriceField>) {
        assert_eq!(PriceField::from_tick_type(tick_type), expected);
    }

    #[test]
    fn decodes_order_status() {
        let msg = decode(&frame(&[
            "3", "1", "12", "Filled", "10", "0", "190.5", "1234", "0", "190.5", "7", "",
        ]))
        .unwrap();
        assert_eq!(
            msg,
            Incoming::OrderStatus {
                order_id: 12,
                status: "Filled".to_string(),
                filled: dec!(10),
                avg_fill_price: Some(dec!(190.5)),
            }
        );
    }

    #[test]
    fn decodes_error() {
        let msg = decode(&frame(&[
            "4",
            "2",
            "-1",
            "326",
            "Unable to connect as the client id is already in use.",
        ]))
        .unwrap();
        assert!(matches!(
            msg,
            Incoming::Error {
                id: -1,
                code: codes::CLIENT_ID_IN_USE,
                ..
            }
        ));
    }

    #[test]
    fn decodes_managed_accounts() {
        let msg = decode(&frame(&["15", "1", "DU111,DU222,"])).unwrap();
        assert_eq!(
            msg,
            Incoming::ManagedAccounts(vec!["DU111".to_string(), "DU222".to_string()])
        );
    }

    #[test]
    fn decodes_cash_position() {
        let msg = decode(&frame(&[
            "61", "3", "DU111", "12087792", "EUR", "CASH", "", "0", "", "", "IDEALPRO", "USD",
            "EUR.USD", "EUR.USD", "25000", "1.0842",
        ]))
        .unwrap();
        assert_eq!(
            msg,
            Incoming::Position(Position {
                account: "DU111".to_string(),
                symbol: "EUR.USD".to_string(),
                quantity: dec!(25000),
                average_cost: dec!(1.0842),
            })
        );
    }

    #[test]
    fn unknown_message_is_other() {
        assert_eq!(decode(&frame(&["74", "1"])).unwrap(), Incoming::Other(74));
    }

    #[test]
    fn truncated_message_is_error() {
        assert!(decode(&frame(&["4", "2", "-1"])).is_err());
    }

    #[test_case("PreSubmitted", dec!(0), Some(OrderState::Submitted))]
    #[test_case("Submitted", dec!(5), Some(OrderState::PartiallyFilled))]
    #[test_case("Filled", dec!(10), Some(OrderState::Filled))]
    #[test_case("ApiCancelled", dec!(0), Some(OrderState::Cancelled))]
    #[test_case("Inactive", dec!(0), Some(OrderState::Rejected))]
    #[test_case("Unknown", dec!(0), None)]
    fn status_mapping(status: &str, filled: Decimal, expected: Option<OrderState>) {
        assert_eq!(order_state(status, filled), expected);
    }

    #[test]
    fn error_codes_map_to_order_states() {
        assert_eq!(order_state_for_error(201), Some(OrderState::Rejected));
        assert_eq!(order_state_for_error(202), Some(OrderState::Cancelled));
        assert_eq!(order_state_for_error(203), Some(OrderState::Rejected));
        assert_eq!(order_state_for_error(2104), None);
        assert!(codes::is_informational(2104));
        assert!(!codes::is_informational(326));
    }
}
