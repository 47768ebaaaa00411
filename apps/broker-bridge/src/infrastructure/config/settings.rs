//! Bridge Configuration Settings
//!
//! Configuration types for the broker bridge, loaded from environment
//! variables. Every value except the shared secret has a default.

use std::time::Duration;

use subtle::ConstantTimeEq;

use crate::application::services::{LadderConfig, OrderConfig, SessionConfig, WatchdogConfig};
use crate::domain::quote::MarketDataType;
use crate::domain::session::{ClientId, GatewayEndpoint, SafetyPolicy};

/// Shared secret expected in the `X-API-Key` header.
#[derive(Clone)]
pub struct SharedSecret(String);

impl SharedSecret {
    /// Wrap a secret value.
    #[must_use]
    pub const fn new(secret: String) -> Self {
        Self(secret)
    }

    /// Constant-time comparison against a presented key.
    #[must_use]
    pub fn matches(&self, presented: &str) -> bool {
        self.0.as_bytes().ct_eq(presented.as_bytes()).into()
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret([REDACTED])")
    }
}

/// Broker gateway connection settings.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// Gateway host.
    pub host: String,
    /// Gateway API port.
    pub port: u16,
    /// Port designated for live sessions.
    pub live_port: u16,
    /// Preferred client id.
    pub client_id: ClientId,
    /// Forbid sessions on the live port.
    pub paper_only: bool,
    /// Market data type applied after connecting.
    pub market_data_type: MarketDataType,
    /// Per-attempt connect timeout.
    pub connect_timeout: Duration,
    /// Extra client ids to try on collision.
    pub client_id_retries: u32,
    /// Delay between client-id attempts.
    pub client_id_backoff: Duration,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7497,
            live_port: 7496,
            client_id: 7,
            paper_only: true,
            market_data_type: MarketDataType::Live,
            connect_timeout: Duration::from_secs(10),
            client_id_retries: 3,
            client_id_backoff: Duration::from_millis(500),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// HTTP port.
    pub http_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { http_port: 8787 }
    }
}

/// Quote and order timings.
#[derive(Debug, Clone)]
pub struct TimingSettings {
    /// Wait budget for quote fields.
    pub quote_wait: Duration,
    /// Interval between order status polls.
    pub order_poll_interval: Duration,
    /// Upper bound on order tracking.
    pub order_max_wait: Duration,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            quote_wait: Duration::from_millis(2000),
            order_poll_interval: Duration::from_millis(500),
            order_max_wait: Duration::from_secs(10),
        }
    }
}

/// Health watchdog settings.
#[derive(Debug, Clone)]
pub struct WatchdogSettings {
    /// Run the watchdog inside the bridge process.
    pub enabled: bool,
    /// Interval between heartbeats.
    pub interval: Duration,
    /// Consecutive failures that trigger a restart.
    pub failure_threshold: u32,
    /// Client id reserved for heartbeat sessions.
    pub client_id: ClientId,
    /// Upper bound on one heartbeat.
    pub heartbeat_timeout: Duration,
    /// Process restarted at the threshold.
    pub restart_target: String,
    /// Restart command; the target is appended as the last argument.
    /// Empty means log only.
    pub restart_command: Vec<String>,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
            failure_threshold: 3,
            client_id: 999,
            heartbeat_timeout: Duration::from_secs(10),
            restart_target: "ibgateway".to_string(),
            restart_command: vec!["systemctl".to_string(), "restart".to_string()],
        }
    }
}

/// Complete bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Broker connection settings.
    pub broker: BrokerSettings,
    /// HTTP server settings.
    pub server: ServerSettings,
    /// Quote and order timings.
    pub timing: TimingSettings,
    /// Watchdog settings.
    pub watchdog: WatchdogSettings,
    /// Shared secret for privileged endpoints.
    pub shared_secret: SharedSecret,
}

impl BridgeConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `BRIDGE_SHARED_SECRET` is missing or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if `BRIDGE_SHARED_SECRET` is missing or empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let secret = env
            .get("BRIDGE_SHARED_SECRET")
            .ok_or_else(|| ConfigError::MissingEnvVar("BRIDGE_SHARED_SECRET".to_string()))?;
        if secret.trim().is_empty() {
            return Err(ConfigError::EmptyValue("BRIDGE_SHARED_SECRET".to_string()));
        }

        let server = ServerSettings {
            http_port: env.parse("BRIDGE_HTTP_PORT", ServerSettings::default().http_port),
        };

        let defaults = TimingSettings::default();
        let timing = TimingSettings {
            quote_wait: env.millis("QUOTE_WAIT_MS", defaults.quote_wait),
            order_poll_interval: env.millis("ORDER_POLL_INTERVAL_MS", defaults.order_poll_interval),
            order_max_wait: env.secs("ORDER_MAX_WAIT_SECS", defaults.order_max_wait),
        };

        let broker = broker_settings(&env);
        let watchdog = watchdog_settings(&env);

        Ok(Self {
            broker,
            server,
            timing,
            watchdog,
            shared_secret: SharedSecret::new(secret),
        })
    }

    /// Gateway endpoint for the session of record and the watchdog.
    #[must_use]
    pub fn endpoint(&self) -> GatewayEndpoint {
        endpoint(&self.broker)
    }

    /// Session manager configuration.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            endpoint: self.endpoint(),
            safety: SafetyPolicy {
                paper_only: self.broker.paper_only,
            },
            ladder: LadderConfig::new(
                self.broker.client_id,
                self.broker.client_id_retries,
                self.broker.client_id_backoff,
            )
            .with_jitter(0.1),
            connect_timeout: self.broker.connect_timeout,
            market_data_type: self.broker.market_data_type,
        }
    }

    /// Order service configuration.
    #[must_use]
    pub fn order_config(&self) -> OrderConfig {
        OrderConfig {
            poll_interval: self.timing.order_poll_interval,
            max_wait: self.timing.order_max_wait,
            ..OrderConfig::default()
        }
    }

    /// Watchdog configuration.
    #[must_use]
    pub fn watchdog_config(&self) -> WatchdogConfig {
        watchdog_config(&self.broker, &self.watchdog)
    }
}

/// Settings for the standalone watchdog process. No shared secret needed.
#[derive(Debug, Clone)]
pub struct WatchdogProcessConfig {
    /// Broker gateway the watchdog heartbeats.
    pub broker: BrokerSettings,
    /// Watchdog settings.
    pub watchdog: WatchdogSettings,
}

impl WatchdogProcessConfig {
    /// Create configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        Self {
            broker: broker_settings(&env),
            watchdog: watchdog_settings(&env),
        }
    }

    /// Watchdog configuration.
    #[must_use]
    pub fn watchdog_config(&self) -> WatchdogConfig {
        watchdog_config(&self.broker, &self.watchdog)
    }
}

fn broker_settings<F>(env: &Env<F>) -> BrokerSettings
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = BrokerSettings::default();
    BrokerSettings {
        host: env
            .get("BROKER_HOST")
            .filter(|h| !h.trim().is_empty())
            .unwrap_or(defaults.host),
        port: env.parse("BROKER_PORT", defaults.port),
        live_port: env.parse("BROKER_LIVE_PORT", defaults.live_port),
        client_id: env.parse("BROKER_CLIENT_ID", defaults.client_id),
        paper_only: env.flag("BROKER_PAPER_ONLY", defaults.paper_only),
        market_data_type: env
            .get("BROKER_MARKET_DATA_TYPE")
            .map_or(defaults.market_data_type, |s| {
                MarketDataType::from_str_case_insensitive(&s)
            }),
        connect_timeout: env.secs("BROKER_CONNECT_TIMEOUT_SECS", defaults.connect_timeout),
        client_id_retries: env.parse("BROKER_CLIENT_ID_RETRIES", defaults.client_id_retries),
        client_id_backoff: env.millis("BROKER_CLIENT_ID_BACKOFF_MS", defaults.client_id_backoff),
    }
}

fn watchdog_settings<F>(env: &Env<F>) -> WatchdogSettings
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = WatchdogSettings::default();
    WatchdogSettings {
        enabled: env.flag("WATCHDOG_ENABLED", defaults.enabled),
        interval: env.secs("WATCHDOG_INTERVAL_SECS", defaults.interval),
        failure_threshold: env
            .parse("WATCHDOG_FAILURE_THRESHOLD", defaults.failure_threshold)
            .max(1),
        client_id: env.parse("WATCHDOG_CLIENT_ID", defaults.client_id),
        heartbeat_timeout: env.secs("WATCHDOG_HEARTBEAT_TIMEOUT_SECS", defaults.heartbeat_timeout),
        restart_target: env
            .get("WATCHDOG_RESTART_TARGET")
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(defaults.restart_target),
        restart_command: env
            .get("WATCHDOG_RESTART_COMMAND")
            .map_or(defaults.restart_command, |cmd| {
                cmd.split_whitespace().map(str::to_string).collect()
            }),
    }
}

fn endpoint(broker: &BrokerSettings) -> GatewayEndpoint {
    GatewayEndpoint::new(&broker.host, broker.port, broker.live_port)
}

fn watchdog_config(broker: &BrokerSettings, watchdog: &WatchdogSettings) -> WatchdogConfig {
    WatchdogConfig {
        endpoint: endpoint(broker),
        client_id: watchdog.client_id,
        interval: watchdog.interval,
        heartbeat_timeout: watchdog.heartbeat_timeout,
        failure_threshold: watchdog.failure_threshold,
        restart_target: watchdog.restart_target.clone(),
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

/// Typed reads over a key lookup. Unparsable values fall back to defaults.
struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .and_then(|v| match v.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => None,
            })
            .unwrap_or(default)
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}
