//! Poll With Timeout
//!
//! The one bounded polling loop shared by quote waits and order tracking.
//! A probe is called immediately and then once per interval until it reports
//! completion or the deadline passes. Each probe is itself bounded by the
//! time remaining, so a stalled probe cannot extend the wait.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, timeout};

/// Result of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T> {
    /// The awaited condition holds; stop polling.
    Ready(T),
    /// Not done yet. Carries the latest observation, if any.
    Pending(Option<T>),
}

/// Outcome of a polling run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Polled<T> {
    /// Last value observed, from either a ready or a pending probe.
    pub value: Option<T>,
    /// Whether a probe reported ready before the deadline.
    pub completed: bool,
    /// Number of probes that ran.
    pub probes: u32,
}

/// Poll `probe` every `interval` until it is ready or `max_wait` elapses.
///
/// The probe always runs at least once, even with a zero `max_wait`.
pub async fn poll_with_timeout<T, F, Fut>(interval: Duration, max_wait: Duration, mut probe: F) -> Polled<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Probe<T>>,
{
    let deadline = Instant::now() + max_wait;
    let mut last = None;
    let mut probes = 0;

    loop {
        probes += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());
        let outcome = if probes == 1 && remaining.is_zero() {
            Some(probe().await)
        } else {
            timeout(remaining, probe()).await.ok()
        };

        match outcome {
            Some(Probe::Ready(value)) => {
                return Polled {
                    value: Some(value),
                    completed: true,
                    probes,
                };
            }
            Some(Probe::Pending(Some(value))) => last = Some(value),
            Some(Probe::Pending(None)) | None => {}
        }

        let now = Instant::now();
        if now >= deadline {
            break;
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }

    Polled {
        value: last,
        completed: false,
        probes,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn returns_as_soon_as_ready() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let polled = poll_with_timeout(Duration::from_millis(5), Duration::from_secs(5), || {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n >= 3 {
                    Probe::Ready(n)
                } else {
                    Probe::Pending(Some(n))
                }
            }
        })
        .await;

        assert!(polled.completed);
        assert_eq!(polled.value, Some(3));
        assert_eq!(polled.probes, 3);
    }

    #[tokio::test]
    async fn zero_budget_still_probes_once() {
        let polled = poll_with_timeout(Duration::from_millis(5), Duration::ZERO, || async {
            Probe::<u32>::Pending(None)
        })
        .await;

        assert!(!polled.completed);
        assert_eq!(polled.probes, 1);
        assert!(polled.value.is_none());
    }

    #[tokio::test]
    async fn keeps_last_observation_on_timeout() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let polled = poll_with_timeout(Duration::from_millis(10), Duration::from_millis(60), || {
            let counter = Arc::clone(&counter);
            async move { Probe::Pending(Some(counter.fetch_add(1, Ordering::SeqCst))) }
        })
        .await;

        assert!(!polled.completed);
        assert!(polled.probes >= 2);
        assert_eq!(polled.value, Some(polled.probes - 1));
    }

    #[tokio::test]
    async fn stalled_probe_is_bounded_by_deadline() {
        let started = std::time::Instant::now();
        let polled = poll_with_timeout(Duration::from_millis(10), Duration::from_millis(50), || async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Probe::Ready(1)
        })
        .await;

        assert!(!polled.completed);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
