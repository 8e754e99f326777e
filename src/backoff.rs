//! Bounded retry with a pluggable backoff strategy.
//!
//! [`retry_notify`] keeps calling an async operation until it succeeds or the
//! strategy stops handing out delays. [`ExponentialBackoff`] is the strategy
//! used for broker connects; its `max_elapsed` is the hard ceiling on how long
//! a connect may keep retrying.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep, Instant};

use crate::error::{RelayError, Result};

pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_MULTIPLIER: f64 = 1.5;
pub const DEFAULT_RANDOMIZATION_FACTOR: f64 = 0.5;
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(60);
/// Kept below the host orchestrator's own startup deadline. Retune it when
/// the host's deadline changes.
pub const DEFAULT_MAX_ELAPSED: Duration = Duration::from_secs(120);

/// Decides how long to wait before the next attempt.
pub trait BackoffStrategy: Send + Sync {
    /// `attempt` is the number of attempts made so far (1 after the first
    /// failure); `elapsed` is measured from the start of the first attempt.
    /// Returning `None` stops retrying.
    fn next_delay(&self, attempt: u32, elapsed: Duration) -> Option<Duration>;
}

#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub randomization_factor: f64,
    pub max_interval: Duration,
    pub max_elapsed: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            multiplier: DEFAULT_MULTIPLIER,
            randomization_factor: DEFAULT_RANDOMIZATION_FACTOR,
            max_interval: DEFAULT_MAX_INTERVAL,
            max_elapsed: DEFAULT_MAX_ELAPSED,
        }
    }
}

impl ExponentialBackoff {
    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }

    /// Un-jittered interval for the given attempt, capped at `max_interval`.
    fn base_interval(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let secs = self.initial_interval.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_interval.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32, elapsed: Duration) -> Option<Duration> {
        if elapsed >= self.max_elapsed {
            return None;
        }

        let base = self.base_interval(attempt).as_secs_f64();
        let delay = if self.randomization_factor > 0.0 {
            let delta = base * self.randomization_factor;
            rand::thread_rng().gen_range((base - delta)..=(base + delta))
        } else {
            base
        };

        // Never sleep past the ceiling.
        let remaining = self.max_elapsed - elapsed;
        Some(Duration::from_secs_f64(delay.max(0.0)).min(remaining))
    }
}

/// Runs `operation` until it succeeds or `strategy` gives up. `notify` is
/// called after every failed attempt that will be retried, with the error and
/// the delay before the next attempt.
///
/// On exhaustion the last error's text is carried in
/// [`RelayError::ConnectExhausted`].
pub async fn retry_notify<T, F, Fut, N>(
    strategy: &dyn BackoffStrategy,
    mut operation: F,
    mut notify: N,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    N: FnMut(&RelayError, u32, Duration),
{
    let started = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let elapsed = started.elapsed();
        match strategy.next_delay(attempts, elapsed) {
            Some(delay) => {
                notify(&err, attempts, delay);
                sleep(delay).await;
            }
            None => {
                return Err(RelayError::ConnectExhausted {
                    attempts,
                    elapsed,
                    last: err.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deterministic() -> ExponentialBackoff {
        ExponentialBackoff {
            randomization_factor: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_delays_grow_multiplicatively() {
        let b = deterministic();
        let zero = Duration::ZERO;
        assert_eq!(b.next_delay(1, zero), Some(Duration::from_millis(500)));
        assert_eq!(b.next_delay(2, zero), Some(Duration::from_millis(750)));
        assert_eq!(b.next_delay(3, zero), Some(Duration::from_millis(1125)));
    }

    #[test]
    fn test_delay_capped_at_max_interval() {
        let b = deterministic();
        assert_eq!(b.next_delay(40, Duration::ZERO), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_stops_at_ceiling() {
        let b = deterministic();
        assert_eq!(b.next_delay(3, Duration::from_secs(120)), None);
        assert_eq!(b.next_delay(3, Duration::from_secs(500)), None);
    }

    #[test]
    fn test_last_delay_clamped_to_remaining_budget() {
        let b = deterministic();
        let delay = b.next_delay(40, Duration::from_secs(110));
        assert_eq!(delay, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_jitter_stays_within_band() {
        let b = ExponentialBackoff::default();
        for _ in 0..100 {
            let d = b.next_delay(1, Duration::ZERO).unwrap();
            assert!(d >= Duration::from_millis(250) && d <= Duration::from_millis(750));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_returns_first_success() {
        let mut calls = 0;
        let mut notified = Vec::new();
        let result = retry_notify(
            &deterministic(),
            || {
                calls += 1;
                let n = calls;
                async move {
                    if n < 3 {
                        Err(RelayError::Connect(format!("attempt {}", n)))
                    } else {
                        Ok(n)
                    }
                }
            },
            |_, attempt, delay| notified.push((attempt, delay)),
        )
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(
            notified,
            vec![
                (1, Duration::from_millis(500)),
                (2, Duration::from_millis(750))
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_with_last_error() {
        let strategy = deterministic().with_max_elapsed(Duration::from_secs(5));
        let started = Instant::now();
        let result: Result<()> = retry_notify(
            &strategy,
            || async { Err(RelayError::Connect("refused".to_string())) },
            |_, _, _| {},
        )
        .await;

        match result {
            Err(RelayError::ConnectExhausted { attempts, last, .. }) => {
                assert!(attempts > 1);
                assert_eq!(last, "Broker connection error: refused");
            }
            other => panic!("Expected ConnectExhausted, got {:?}", other),
        }
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(5));
        assert!(elapsed < Duration::from_millis(5_050));
    }
}
