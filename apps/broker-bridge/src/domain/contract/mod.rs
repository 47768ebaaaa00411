//! Contract Resolution
//!
//! Deterministic mapping from a ticker string (plus optional routing hints)
//! to a structured instrument descriptor.
//!
//! # Rules
//!
//! - Default: equity, `SMART` routing, `USD`.
//! - `EUR.USD`, `EUR/USD`, or `EURUSD` with a currency-pair hint resolve to
//!   a currency pair with no exchange.
//! - Known regional suffixes (`7203.T`, `0700.HK`, ...) map to their venue and
//!   currency and are stripped from the symbol.
//! - Unknown suffixes (`BRK.B`) fall through to the default equity mapping.

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// Smart-routing venue used for equities without a regional suffix.
pub const DEFAULT_EXCHANGE: &str = "SMART";

/// Home currency for equities without a regional suffix.
pub const DEFAULT_CURRENCY: &str = "USD";

/// Regional suffix table: suffix, exchange, currency.
const REGIONAL_SUFFIXES: &[(&str, &str, &str)] = &[
    ("T", "TSEJ", "JPY"),
    ("HK", "SEHK", "HKD"),
    ("L", "LSE", "GBP"),
    ("TO", "TSE", "CAD"),
    ("AX", "ASX", "AUD"),
];

/// Instrument asset class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssetClass {
    /// Listed equity.
    #[default]
    Equity,
    /// Spot currency pair.
    CurrencyPair,
}

impl AssetClass {
    /// Parse an asset-class hint. Unknown hints return `None`.
    #[must_use]
    pub fn from_hint(hint: &str) -> Option<Self> {
        match hint.trim().to_lowercase().as_str() {
            "equity" | "stock" | "stk" => Some(Self::Equity),
            "currencypair" | "currency_pair" | "forex" | "fx" | "cash" => {
                Some(Self::CurrencyPair)
            }
            _ => None,
        }
    }

    /// Get the asset class name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Equity => "equity",
            Self::CurrencyPair => "currencyPair",
        }
    }
}

/// Resolved instrument descriptor. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    /// Broker-side symbol (base currency for pairs).
    pub symbol: String,
    /// Asset class.
    pub asset_class: AssetClass,
    /// Listing or routing venue. `None` for currency pairs.
    pub exchange: Option<String>,
    /// Trading currency (quote currency for pairs).
    pub currency: String,
}

/// Optional routing hints supplied alongside a symbol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractHints {
    /// Explicit exchange override.
    pub exchange: Option<String>,
    /// Explicit currency override.
    pub currency: Option<String>,
    /// Asset-class hint (`equity`, `currencyPair`, `forex`, ...).
    pub asset_class: Option<String>,
}

impl ContractHints {
    fn exchange(&self) -> Option<String> {
        non_empty_upper(self.exchange.as_deref())
    }

    fn currency(&self) -> Option<String> {
        non_empty_upper(self.currency.as_deref())
    }

    fn asset_class(&self) -> Option<AssetClass> {
        self.asset_class.as_deref().and_then(AssetClass::from_hint)
    }
}

/// Resolve `symbol` into a [`Contract`].
///
/// # Errors
///
/// Returns [`BridgeError::Validation`] only when the symbol is empty.
pub fn resolve(symbol: &str, hints: &ContractHints) -> Result<Contract, BridgeError> {
    let symbol = symbol.trim().to_uppercase();
    if symbol.is_empty() {
        return Err(BridgeError::validation("symbol", "must not be empty"));
    }

    if let Some((base, quote)) = split_currency_pair(&symbol, hints.asset_class()) {
        return Ok(Contract {
            symbol: base,
            asset_class: AssetClass::CurrencyPair,
            exchange: None,
            currency: hints.currency().unwrap_or(quote),
        });
    }

    let (symbol, exchange, currency) = match regional_suffix(&symbol) {
        Some((root, exchange, currency)) => (root, exchange.to_string(), currency.to_string()),
        None => (
            symbol,
            DEFAULT_EXCHANGE.to_string(),
            DEFAULT_CURRENCY.to_string(),
        ),
    };

    Ok(Contract {
        symbol,
        asset_class: AssetClass::Equity,
        exchange: Some(hints.exchange().unwrap_or(exchange)),
        currency: hints.currency().unwrap_or(currency),
    })
}

/// Split `EUR.USD`, `EUR/USD` (always) or `EURUSD` (only with a pair hint).
fn split_currency_pair(symbol: &str, hint: Option<AssetClass>) -> Option<(String, String)> {
    if hint == Some(AssetClass::Equity) {
        return None;
    }

    if let Some((base, quote)) = symbol.split_once(['.', '/'])
        && is_currency_code(base)
        && is_currency_code(quote)
    {
        return Some((base.to_string(), quote.to_string()));
    }

    if hint == Some(AssetClass::CurrencyPair)
        && symbol.len() == 6
        && symbol.chars().all(|c| c.is_ascii_alphabetic())
    {
        let (base, quote) = symbol.split_at(3);
        return Some((base.to_string(), quote.to_string()));
    }

    None
}

fn regional_suffix(symbol: &str) -> Option<(String, &'static str, &'static str)> {
    let (root, suffix) = symbol.rsplit_once('.')?;
    if root.is_empty() {
        return None;
    }
    REGIONAL_SUFFIXES
        .iter()
        .find(|(known, _, _)| *known == suffix)
        .map(|(_, exchange, currency)| (root.to_string(), *exchange, *currency))
}

fn is_currency_code(s: &str) -> bool {
    s.len() == 3 && s.chars().all(|c| c.is_ascii_alphabetic())
}

fn non_empty_upper(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_uppercase)
}
