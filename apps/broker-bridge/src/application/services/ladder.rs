//! Client-Id Ladder
//!
//! The broker allows one session per client id. When the configured id is
//! taken (a stale session from a previous run, typically), the session
//! manager walks upward through a short range of ids with a small backoff
//! between attempts.

use std::time::Duration;

use rand::Rng;

use crate::domain::session::ClientId;

/// Configuration for the client-id ladder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LadderConfig {
    /// First id to try.
    pub base: ClientId,
    /// How many additional ids to try after `base`.
    pub retries: u32,
    /// Delay before each retry.
    pub backoff: Duration,
    /// Jitter factor as a fraction (e.g., 0.1 = ±10% randomization).
    pub jitter_factor: f64,
}

impl LadderConfig {
    /// Ladder starting at `base` with `retries` extra rungs and no jitter.
    #[must_use]
    pub const fn new(base: ClientId, retries: u32, backoff: Duration) -> Self {
        Self {
            base,
            retries,
            backoff,
            jitter_factor: 0.0,
        }
    }

    /// Set the jitter factor.
    #[must_use]
    pub const fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }
}

impl Default for LadderConfig {
    fn default() -> Self {
        Self {
            base: 7,
            retries: 3,
            backoff: Duration::from_millis(500),
            jitter_factor: 0.1,
        }
    }
}

/// One rung of the ladder: the id to try and how long to wait first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rung {
    /// Client id to connect with.
    pub client_id: ClientId,
    /// Delay before the attempt. Zero for the first rung.
    pub delay: Duration,
}

/// Yields `base, base+1, ..., base+retries`.
///
/// # Example
///
/// ```rust
/// use broker_bridge::application::services::{ClientIdLadder, LadderConfig};
/// use std::time::Duration;
///
/// let ladder = ClientIdLadder::new(LadderConfig::new(7, 2, Duration::ZERO));
/// let ids: Vec<i32> = ladder.map(|rung| rung.client_id).collect();
/// assert_eq!(ids, vec![7, 8, 9]);
/// ```
#[derive(Debug, Clone)]
pub struct ClientIdLadder {
    config: LadderConfig,
    step: u32,
}

impl ClientIdLadder {
    /// Create a ladder positioned before its first rung.
    #[must_use]
    pub const fn new(config: LadderConfig) -> Self {
        Self { config, step: 0 }
    }

    /// Total number of rungs.
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.config.retries + 1
    }

    /// A ladder always has at least one rung.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 || duration.is_zero() {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

impl Iterator for ClientIdLadder {
    type Item = Rung;

    fn next(&mut self) -> Option<Rung> {
        if self.step > self.config.retries {
            return None;
        }

        let offset = ClientId::try_from(self.step).ok()?;
        let client_id = self.config.base.checked_add(offset)?;
        let delay = if self.step == 0 {
            Duration::ZERO
        } else {
            self.apply_jitter(self.config.backoff)
        };
        self.step += 1;

        Some(Rung { client_id, delay })
    }
}
