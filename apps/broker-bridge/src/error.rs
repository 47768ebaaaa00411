//! Error taxonomy for the broker bridge.
//!
//! | Variant | Raised by | HTTP |
//! |---------|-----------|------|
//! | `Connection` | Session Manager (unreachable, timeout, rejected) | 503 |
//! | `PaperOnlyViolation` | Session Manager, Order Execution | 403 |
//! | `Validation` | Contract Resolver, Order Execution | 400 |
//! | `Auth` | Auth Gate | 401 |
//! | `Watchdog` | Health Watchdog (never surfaced over HTTP) | 500 |
//!
//! `Validation` and `Auth` are terminal and never retried. `Connection` is
//! only retried inside the client-id ladder.

use thiserror::Error;

/// Errors produced by the bridge services.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// The broker gateway was unreachable, timed out, or rejected the session.
    #[error("broker connection error: {0}")]
    Connection(String),

    /// Live access attempted while the bridge is restricted to paper trading.
    #[error("paper-only policy forbids connecting to live port {port}")]
    PaperOnlyViolation {
        /// The live port that was requested.
        port: u16,
    },

    /// A request field failed validation.
    #[error("invalid {field}: {message}")]
    Validation {
        /// Name of the offending field.
        field: &'static str,
        /// What was wrong with it.
        message: String,
    },

    /// Missing or incorrect shared secret.
    #[error("missing or invalid API key")]
    Auth,

    /// Internal heartbeat failure.
    #[error("watchdog heartbeat failed: {0}")]
    Watchdog(String),
}

impl BridgeError {
    /// Build a validation error for `field`.
    #[must_use]
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// Stable machine-readable code used in HTTP error bodies.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Connection(_) => "CONNECTION_ERROR",
            Self::PaperOnlyViolation { .. } => "PAPER_ONLY_VIOLATION",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Auth => "AUTH_ERROR",
            Self::Watchdog(_) => "WATCHDOG_FAILURE",
        }
    }

    /// Whether the caller may retry the whole request later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}
