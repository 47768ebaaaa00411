//! Configuration Module
//!
//! Configuration loading for the bridge and the standalone watchdog.

use std::path::Path;

mod settings;

pub use settings::{
    BridgeConfig, BrokerSettings, ConfigError, ServerSettings, SharedSecret, TimingSettings,
    WatchdogProcessConfig, WatchdogSettings,
};

/// Load `.env` from the current directory or the nearest ancestor that has
/// one. Variables already set in the environment win.
pub fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let Ok(cwd) = std::env::current_dir() else {
        return;
    };
    let mut dir: &Path = cwd.as_path();
    while let Some(parent) = dir.parent() {
        let env_path = parent.join(".env");
        if env_path.exists() {
            if let Err(e) = dotenvy::from_path(&env_path) {
                tracing::debug!(path = %env_path.display(), error = %e, "Ignoring unreadable .env");
            }
            return;
        }
        dir = parent;
    }
}
