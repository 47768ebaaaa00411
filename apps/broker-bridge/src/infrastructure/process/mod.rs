//! Process Control Adapters
//!
//! [`ProcessControl`] implementations used by the health watchdog to restart
//! the broker gateway.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::application::ports::{ProcessControl, ProcessControlError};

/// Default upper bound on one restart command.
pub const DEFAULT_RESTART_TIMEOUT: Duration = Duration::from_secs(60);

// =============================================================================
// Command
// =============================================================================

/// Restarts a process by running an external command with the target
/// appended as the last argument, e.g. `systemctl restart ibgateway`.
#[derive(Debug, Clone)]
pub struct CommandProcessControl {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandProcessControl {
    /// Build from a command line split into words. Returns `None` for an
    /// empty command.
    #[must_use]
    pub fn from_words(words: &[String]) -> Option<Self> {
        let (program, args) = words.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout: DEFAULT_RESTART_TIMEOUT,
        })
    }

    /// Override the command timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ProcessControl for CommandProcessControl {
    async fn restart(&self, target: &str) -> Result<(), ProcessControlError> {
        tracing::info!(
            program = %self.program,
            args = ?self.args,
            restart_target = target,
            "Running restart command"
        );

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(target)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|e| ProcessControlError::Launch(e.to_string()))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ProcessControlError::Timeout(target.to_string()))?
            .map_err(|e| ProcessControlError::Launch(e.to_string()))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::warn!(
            restart_target = target,
            status = %output.status,
            stderr = %stderr.trim(),
            "Restart command failed"
        );
        Err(ProcessControlError::Failed {
            target: target.to_string(),
            status: output.status.to_string(),
        })
    }
}

// =============================================================================
// Logging
// =============================================================================

/// Records the restart request without acting on it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingProcessControl;

#[async_trait]
impl ProcessControl for LoggingProcessControl {
    async fn restart(&self, target: &str) -> Result<(), ProcessControlError> {
        tracing::warn!(
            restart_target = target,
            "Restart requested but no restart command is configured"
        );
        Ok(())
    }
}

/// Pick the adapter for a configured command line.
#[must_use]
pub fn from_command(words: &[String]) -> Arc<dyn ProcessControl> {
    match CommandProcessControl::from_words(words) {
        Some(command) => Arc::new(command),
        None => Arc::new(LoggingProcessControl),
    }
}
