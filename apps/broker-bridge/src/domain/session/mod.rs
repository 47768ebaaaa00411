//! Session Descriptor
//!
//! The one broker session of record and the safety policy that governs it.

use serde::Serialize;

/// Broker client identifier.
pub type ClientId = i32;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No live connection.
    #[default]
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// Connected and usable.
    Connected,
}

impl SessionState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }

    /// Numeric value used for the session state gauge.
    #[must_use]
    pub const fn gauge_value(&self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Connected => 2.0,
        }
    }
}

/// Where the broker gateway listens and which ports are live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayEndpoint {
    /// Gateway host.
    pub host: String,
    /// Gateway API port.
    pub port: u16,
    /// The port designated for live (real money) sessions.
    pub live_port: u16,
}

impl GatewayEndpoint {
    /// Create a new endpoint.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, live_port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            live_port,
        }
    }

    /// Whether this endpoint targets the live port.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        self.port == self.live_port
    }

    /// `host:port` address string.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Paper/live safety policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetyPolicy {
    /// Forbid any session on the live port.
    pub paper_only: bool,
}

impl SafetyPolicy {
    /// Whether the policy forbids connecting to `endpoint`.
    #[must_use]
    pub const fn forbids(&self, endpoint: &GatewayEndpoint) -> bool {
        self.paper_only && endpoint.is_live()
    }
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self { paper_only: true }
    }
}

/// Observable view of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Current state.
    pub state: SessionState,
    /// Gateway host.
    pub host: String,
    /// Gateway port.
    pub port: u16,
    /// Client id in use (after any collision retries), or the configured one.
    pub client_id: ClientId,
    /// Paper-only policy flag.
    pub paper_only: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paper_only_forbids_live_port_only() {
        let policy = SafetyPolicy { paper_only: true };
        assert!(policy.forbids(&GatewayEndpoint::new("127.0.0.1", 7496, 7496)));
        assert!(!policy.forbids(&GatewayEndpoint::new("127.0.0.1", 7497, 7496)));
    }

    #[test]
    fn live_policy_allows_live_port() {
        let policy = SafetyPolicy { paper_only: false };
        assert!(!policy.forbids(&GatewayEndpoint::new("127.0.0.1", 7496, 7496)));
    }

    #[test]
    fn default_policy_is_paper_only() {
        assert!(SafetyPolicy::default().paper_only);
    }

    #[test]
    fn endpoint_address() {
        let endpoint = GatewayEndpoint::new("gateway.local", 4002, 4001);
        assert_eq!(endpoint.address(), "gateway.local:4002");
        assert!(!endpoint.is_live());
    }
}
