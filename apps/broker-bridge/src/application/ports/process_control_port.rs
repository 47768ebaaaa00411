//! Process Control Port (Driven Port)
//!
//! Capability to restart the broker gateway process. The watchdog depends
//! only on this trait so the mechanism can differ per deployment.

use async_trait::async_trait;

/// Process control error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessControlError {
    /// The restart command could not be started.
    #[error("failed to launch restart command: {0}")]
    Launch(String),

    /// The restart command ran but reported failure.
    #[error("restart of {target} failed with {status}")]
    Failed {
        /// Restart target.
        target: String,
        /// Exit status description.
        status: String,
    },

    /// The restart command did not finish in time.
    #[error("restart of {0} timed out")]
    Timeout(String),
}

/// Restarts an external process.
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Restart the process identified by `target`.
    async fn restart(&self, target: &str) -> Result<(), ProcessControlError>;
}
