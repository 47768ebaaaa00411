//! Order Domain Types
//!
//! Order requests as received from callers, their field-presence rules, and
//! the status record observed from the broker.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::contract::ContractHints;
use crate::error::BridgeError;

/// Broker-assigned order identifier.
pub type OrderId = i64;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderSide {
    /// Buy.
    Buy,
    /// Sell.
    Sell,
}

impl OrderSide {
    /// The side that closes a position opened by `self`.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderType {
    /// Market order.
    Market,
    /// Limit order.
    Limit,
    /// Stop order.
    Stop,
    /// Stop-limit order.
    StopLimit,
    /// Entry with attached take-profit and stop-loss exits.
    Bracket,
}

impl OrderType {
    /// Get the order type name for metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::Limit => "limit",
            Self::Stop => "stop",
            Self::StopLimit => "stop_limit",
            Self::Bracket => "bracket",
        }
    }

    const fn requires_limit_price(self) -> bool {
        matches!(self, Self::Limit | Self::StopLimit)
    }

    const fn requires_stop_price(self) -> bool {
        matches!(self, Self::Stop | Self::StopLimit | Self::Bracket)
    }
}

/// An order as submitted by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    /// Ticker, resolved through the contract resolver.
    pub symbol: String,
    /// Side.
    pub side: OrderSide,
    /// Quantity, must be positive.
    pub quantity: Decimal,
    /// Order type.
    #[serde(rename = "type")]
    pub order_type: OrderType,
    /// Limit price (Limit, StopLimit, optional Bracket entry).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
    /// Stop trigger (Stop, StopLimit, Bracket stop-loss).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<Decimal>,
    /// Take-profit price (Bracket only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_price: Option<Decimal>,
    /// Optional exchange hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
    /// Optional currency hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    /// Optional asset-class hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_class: Option<String>,
}

impl OrderRequest {
    /// Create a market order request.
    #[must_use]
    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            order_type: OrderType::Market,
            limit_price: None,
            stop_price: None,
            target_price: None,
            exchange: None,
            currency: None,
            asset_class: None,
        }
    }

    /// Create a limit order request.
    #[must_use]
    pub fn limit(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        limit_price: Decimal,
    ) -> Self {
        Self {
            order_type: OrderType::Limit,
            limit_price: Some(limit_price),
            ..Self::market(symbol, side, quantity)
        }
    }

    /// Create a bracket order request. `limit_price` of `None` enters at market.
    #[must_use]
    pub fn bracket(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        limit_price: Option<Decimal>,
        stop_price: Decimal,
        target_price: Decimal,
    ) -> Self {
        Self {
            order_type: OrderType::Bracket,
            limit_price,
            stop_price: Some(stop_price),
            target_price: Some(target_price),
            ..Self::market(symbol, side, quantity)
        }
    }

    /// Routing hints for contract resolution.
    #[must_use]
    pub fn hints(&self) -> ContractHints {
        ContractHints {
            exchange: self.exchange.clone(),
            currency: self.currency.clone(),
            asset_class: self.asset_class.clone(),
        }
    }

    /// Check quantity and field-presence rules for the order type.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Validation`] naming the first offending field.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.symbol.trim().is_empty() {
            return Err(BridgeError::validation("symbol", "must not be empty"));
        }
        if self.quantity <= Decimal::ZERO {
            return Err(BridgeError::validation(
                "quantity",
                format!("must be greater than zero, got {}", self.quantity),
            ));
        }

        let kind = self.order_type;
        check_price("limitPrice", self.limit_price, kind.requires_limit_price(), kind)?;
        check_price("stopPrice", self.stop_price, kind.requires_stop_price(), kind)?;

        match (kind, self.target_price) {
            (OrderType::Bracket, None) => Err(BridgeError::validation(
                "targetPrice",
                "required for Bracket orders",
            )),
            (OrderType::Bracket, Some(price)) => ensure_positive("targetPrice", price),
            (_, Some(_)) => Err(BridgeError::validation(
                "targetPrice",
                "only valid for Bracket orders",
            )),
            (_, None) => Ok(()),
        }
    }
}

fn check_price(
    field: &'static str,
    value: Option<Decimal>,
    required: bool,
    kind: OrderType,
) -> Result<(), BridgeError> {
    match value {
        Some(price) => ensure_positive(field, price),
        None if required => Err(BridgeError::validation(
            field,
            format!("required for {kind:?} orders"),
        )),
        None => Ok(()),
    }
}

fn ensure_positive(field: &'static str, price: Decimal) -> Result<(), BridgeError> {
    if price > Decimal::ZERO {
        Ok(())
    } else {
        Err(BridgeError::validation(
            field,
            format!("must be greater than zero, got {price}"),
        ))
    }
}

/// Lifecycle state of a submitted order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderState {
    /// Accepted by the bridge, working at the broker.
    Submitted,
    /// Some quantity filled, remainder still working.
    PartiallyFilled,
    /// Completely filled.
    Filled,
    /// Cancelled.
    Cancelled,
    /// Rejected by the broker.
    Rejected,
}

impl OrderState {
    /// Whether no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected)
    }

    /// Get the state name for metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::PartiallyFilled => "partially_filled",
            Self::Filled => "filled",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
        }
    }
}

/// Last observed status of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatus {
    /// Broker order id.
    pub order_id: OrderId,
    /// Lifecycle state.
    pub status: OrderState,
    /// Quantity filled so far.
    pub filled_quantity: Decimal,
    /// Average fill price, once anything has filled.
    pub average_fill_price: Option<Decimal>,
}

impl OrderStatus {
    /// Status recorded at submission time.
    #[must_use]
    pub const fn submitted(order_id: OrderId) -> Self {
        Self {
            order_id,
            status: OrderState::Submitted,
            filled_quantity: Decimal::ZERO,
            average_fill_price: None,
        }
    }

    /// Whether the order has reached a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// An account position as reported by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    /// Account code.
    pub account: String,
    /// Instrument symbol.
    pub symbol: String,
    /// Signed position size.
    pub quantity: Decimal,
    /// Average cost per unit.
    pub average_cost: Decimal,
}
