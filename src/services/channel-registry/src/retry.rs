//! Bounded retry policy
//!
//! Sleeps go through `tokio::time`, so a paused test runtime drives the
//! backoff without real waiting.

use crate::config::IngestConfig;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio_retry::Retry;
use tracing::warn;

/// Backoff strategy between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackoffStrategy {
    /// Same delay after every failure
    Fixed { delay_ms: u64 },
    /// `base_ms * attempt` after the n-th failure
    Linear { base_ms: u64 },
    /// `base_ms * 2^(attempt - 1)`, capped at `max_ms`
    Exponential { base_ms: u64, max_ms: u64 },
}

impl BackoffStrategy {
    /// Delay to wait after the given failed attempt (1-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1) as u64;
        let delay_ms = match *self {
            BackoffStrategy::Fixed { delay_ms } => delay_ms,
            BackoffStrategy::Linear { base_ms } => base_ms.saturating_mul(attempt),
            BackoffStrategy::Exponential { base_ms, max_ms } => base_ms
                .saturating_mul(1u64 << (attempt - 1).min(32))
                .min(max_ms),
        };
        Duration::from_millis(delay_ms)
    }
}

/// Maximum attempt count plus the wait between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    strategy: BackoffStrategy,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, strategy: BackoffStrategy) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            strategy,
        }
    }

    /// Linearly increasing backoff: `base`, `2 * base`, ...
    pub fn linear(max_attempts: u32, base: Duration) -> Self {
        Self::new(
            max_attempts,
            BackoffStrategy::Linear {
                base_ms: base.as_millis() as u64,
            },
        )
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::linear(config.retry_attempts, config.retry_base_delay())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.strategy.calculate_delay(attempt)
    }

    /// Waits between consecutive attempts; one fewer than `max_attempts`
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let policy = *self;
        (1..policy.max_attempts).map(move |attempt| policy.delay_for(attempt))
    }

    /// Run `action` until it succeeds or the attempts are exhausted.
    ///
    /// The closure receives the 1-based attempt number; the last error is
    /// returned when every attempt fails.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut action: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let max_attempts = self.max_attempts;
        let mut attempt = 0;

        Retry::spawn(self.delays(), || {
            attempt += 1;
            let current = attempt;
            let fut = action(current);
            async move {
                fut.await.map_err(|e| {
                    warn!(
                        "{} failed (attempt {}/{}): {}",
                        operation, current, max_attempts, e
                    );
                    e
                })
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[test]
    fn test_linear_delays() {
        let policy = RetryPolicy::linear(3, Duration::from_millis(100));
        let delays: Vec<_> = policy.delays().collect();
        assert_eq!(
            delays,
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[test]
    fn test_strategy_delays() {
        let fixed = BackoffStrategy::Fixed { delay_ms: 50 };
        assert_eq!(fixed.calculate_delay(4), Duration::from_millis(50));

        let exp = BackoffStrategy::Exponential {
            base_ms: 100,
            max_ms: 500,
        };
        assert_eq!(exp.calculate_delay(1), Duration::from_millis(100));
        assert_eq!(exp.calculate_delay(3), Duration::from_millis(400));
        assert_eq!(exp.calculate_delay(10), Duration::from_millis(500));
    }

    #[test]
    fn test_zero_attempts_still_runs_once() {
        let policy = RetryPolicy::linear(0, Duration::from_millis(100));
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.delays().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt() {
        let policy = RetryPolicy::linear(3, Duration::from_millis(100));
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let counter = calls.clone();
        let result: Result<u32, String> = policy
            .run("flaky write", |attempt| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(format!("attempt {} failed", attempt))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let policy = RetryPolicy::linear(3, Duration::from_millis(100));
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: Result<(), String> = policy
            .run("doomed write", |attempt| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Err(format!("attempt {}", attempt)) }
            })
            .await;

        assert_eq!(result, Err("attempt 3".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
