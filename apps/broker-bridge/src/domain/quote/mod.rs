//! Quote Types
//!
//! Point-in-time price snapshot for one instrument plus the market data
//! preferences that shape how it is requested.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Price snapshot. Every price is optional: a field the broker did not
/// populate within the wait budget is `None`, never an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    /// Requested symbol.
    pub symbol: String,
    /// Last traded price.
    pub last: Option<Decimal>,
    /// Best bid.
    pub bid: Option<Decimal>,
    /// Best ask.
    pub ask: Option<Decimal>,
    /// Previous close.
    pub close: Option<Decimal>,
    /// When the snapshot was taken.
    pub observed_at: DateTime<Utc>,
}

impl Quote {
    /// Build a quote from the fields observed so far.
    #[must_use]
    pub fn from_fields(symbol: impl Into<String>, fields: &QuoteFields) -> Self {
        Self {
            symbol: symbol.into(),
            last: fields.last,
            bid: fields.bid,
            ask: fields.ask,
            close: fields.close,
            observed_at: Utc::now(),
        }
    }
}

/// Price fields accumulated from a market data subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuoteFields {
    /// Last traded price.
    pub last: Option<Decimal>,
    /// Best bid.
    pub bid: Option<Decimal>,
    /// Best ask.
    pub ask: Option<Decimal>,
    /// Previous close.
    pub close: Option<Decimal>,
}

impl QuoteFields {
    /// Whether every field has been populated.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.last.is_some() && self.bid.is_some() && self.ask.is_some() && self.close.is_some()
    }
}

/// How a quote is requested from the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QuoteMode {
    /// One-shot request that completes on its own.
    #[default]
    Snapshot,
    /// Subscription that must be cancelled once the quote is taken.
    Streaming,
}

impl QuoteMode {
    /// Get the mode name for metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::Streaming => "streaming",
        }
    }
}

/// Market data type preference, numbered as the broker API numbers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MarketDataType {
    /// Real-time streaming data.
    #[default]
    Live,
    /// Last recorded data at market close.
    Frozen,
    /// Delayed data for accounts without subscriptions.
    Delayed,
    /// Delayed data frozen at close.
    DelayedFrozen,
}

impl MarketDataType {
    /// Parse a preference name. Unknown values fall back to `Live`.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "frozen" | "2" => Self::Frozen,
            "delayed" | "3" => Self::Delayed,
            "delayed-frozen" | "4" => Self::DelayedFrozen,
            _ => Self::Live,
        }
    }

    /// Broker API code.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::Live => 1,
            Self::Frozen => 2,
            Self::Delayed => 3,
            Self::DelayedFrozen => 4,
        }
    }

    /// Get the preference name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Frozen => "frozen",
            Self::Delayed => "delayed",
            Self::DelayedFrozen => "delayed-frozen",
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn market_data_type_parsing() {
        assert_eq!(
            MarketDataType::from_str_case_insensitive("LIVE"),
            MarketDataType::Live
        );
        assert_eq!(
            MarketDataType::from_str_case_insensitive("frozen"),
            MarketDataType::Frozen
        );
        assert_eq!(
            MarketDataType::from_str_case_insensitive("delayed"),
            MarketDataType::Delayed
        );
        assert_eq!(
            MarketDataType::from_str_case_insensitive("delayed_frozen"),
            MarketDataType::DelayedFrozen
        );
        assert_eq!(
            MarketDataType::from_str_case_insensitive("4"),
            MarketDataType::DelayedFrozen
        );
        assert_eq!(
            MarketDataType::from_str_case_insensitive("bogus"),
            MarketDataType::Live
        );
    }

    #[test]
    fn market_data_type_codes() {
        assert_eq!(MarketDataType::Live.code(), 1);
        assert_eq!(MarketDataType::Frozen.code(), 2);
        assert_eq!(MarketDataType::Delayed.code(), 3);
        assert_eq!(MarketDataType::DelayedFrozen.code(), 4);
    }

    #[test]
    fn completeness_requires_all_fields() {
        let mut fields = QuoteFields {
            last: Some(dec!(10)),
            bid: Some(dec!(9.9)),
            ask: Some(dec!(10.1)),
            close: None,
        };
        assert!(!fields.is_complete());
        fields.close = Some(dec!(9.5));
        assert!(fields.is_complete());
    }

    #[test]
    fn empty_quote_serializes_nulls() {
        let quote = Quote::from_fields("AAPL", &QuoteFields::default());
        let json = serde_json::to_value(&quote).unwrap();
        assert_eq!(json["symbol"], "AAPL");
        assert!(json["last"].is_null());
        assert!(json["bid"].is_null());
        assert!(json["ask"].is_null());
        assert!(json["close"].is_null());
        assert!(json["observedAt"].is_string());
    }
}
