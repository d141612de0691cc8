//! # Retry Envelope
//!
//! Exponential backoff with jitter for the task sync loop. The parameters
//! are fixed by contract: 4 attempts, 30 s initial delay, factor 2.0,
//! jitter 0.1, sleeping only between attempts, so `steps = 1` never
//! sleeps and `steps = 4` sleeps 30 s, 60 s, 120 s (±10 %).

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Backoff schedule. `next_delay` mutates the schedule, mirroring the
/// semantics of the control plane's wait helpers: each call consumes one
/// step and doubles the base duration.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    /// Total attempts, including the first.
    pub steps: u32,
    /// Delay before the second attempt.
    pub duration: Duration,
    /// Multiplier applied after each step.
    pub factor: f64,
    /// Fraction of the base delay added uniformly at random.
    pub jitter: f64,
}

impl Backoff {
    /// The executor's fixed sync envelope.
    pub fn sync_envelope() -> Self {
        Self {
            steps: 4,
            duration: Duration::from_secs(30),
            factor: 2.0,
            jitter: 0.1,
        }
    }

    /// Delay before the next attempt, or `None` once the schedule is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.steps <= 1 {
            return None;
        }
        self.steps -= 1;

        let base = self.duration;
        if self.factor > 0.0 {
            self.duration = base.mul_f64(self.factor);
        }
        let jittered = if self.jitter > 0.0 {
            base.mul_f64(1.0 + self.jitter * fastrand::f64())
        } else {
            base
        };
        Some(jittered)
    }
}

/// Run `attempt` under `backoff`, retrying on `Err` until the schedule is
/// spent. Returns the last error when every attempt fails.
pub async fn retry<T, E, F, Fut>(mut backoff: Backoff, mut attempt: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) => match backoff.next_delay() {
                Some(delay) => {
                    debug!(delay_secs = delay.as_secs_f64(), error = %err, "attempt failed, backing off");
                    tokio::time::sleep(delay).await;
                }
                None => return Err(err),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_single_step_never_sleeps() {
        let mut backoff = Backoff {
            steps: 1,
            duration: Duration::from_secs(30),
            factor: 2.0,
            jitter: 0.1,
        };
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn test_sync_envelope_delay_ladder() {
        let mut backoff = Backoff::sync_envelope();

        let d1 = backoff.next_delay().unwrap();
        let d2 = backoff.next_delay().unwrap();
        let d3 = backoff.next_delay().unwrap();
        assert_eq!(backoff.next_delay(), None);

        let within = |d: Duration, base: u64| {
            let secs = d.as_secs_f64();
            secs >= base as f64 && secs <= base as f64 * 1.1
        };
        assert!(within(d1, 30), "first delay {d1:?} outside 30s +10%");
        assert!(within(d2, 60), "second delay {d2:?} outside 60s +10%");
        assert!(within(d3, 120), "third delay {d3:?} outside 120s +10%");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_returns_first_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();

        let result: Result<u32, String> = retry(Backoff::sync_envelope(), move || {
            let calls = calls_in.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(format!("attempt {n} failed"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausts_and_surfaces_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();

        let result: Result<(), String> = retry(Backoff::sync_envelope(), move || {
            let calls = calls_in.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Err(format!("attempt {n}"))
            }
        })
        .await;

        assert_eq!(result.unwrap_err(), "attempt 4");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
