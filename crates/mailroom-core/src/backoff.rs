//! Exponential backoff with jitter for transient-fault retries.
//!
//! Shared by the external provider client (transport failures) and the
//! webhook pipeline (domain/storage calls). Only errors classified
//! [`ServiceUnavailable`](crate::error::ErrorKind::ServiceUnavailable) are
//! retried; every wait is interruptible through a cancellation token.

use std::{future::Future, time::Duration};

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Result;

/// Retry policy for transient faults.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the initial one.
    pub max_attempts: u32,

    /// Base delay for the exponential backoff calculation.
    pub base_delay: Duration,

    /// Cap applied to the computed delay.
    pub max_delay: Duration,

    /// Jitter fraction (0.0 to 1.0) applied as ± randomization.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            jitter_factor: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Policy with no delay between attempts, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_factor: 0.0,
        }
    }

    /// Delay before the retry following `attempt` (1-based).
    ///
    /// `base * 2^(attempt-1)` capped at `max_delay`, with ±`jitter_factor`
    /// randomization to avoid synchronized retry storms across instances.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let multiplier = 2_u32.saturating_pow(exponent);
        let capped = std::cmp::min(self.base_delay.saturating_mul(multiplier), self.max_delay);
        apply_jitter(capped, self.jitter_factor)
    }
}

/// Applies ±`jitter_factor` randomization to a duration.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 || duration.is_zero() {
        return duration;
    }

    let clamped = jitter_factor.clamp(0.0, 1.0);
    let mut rng = rand::rng();
    let range = duration.as_secs_f64() * clamped;
    let offset = rng.random_range(-range..=range);

    Duration::from_secs_f64((duration.as_secs_f64() + offset).max(0.0))
}

/// Runs `operation` with bounded exponential-backoff retries.
///
/// Retries only while the returned error is retryable and attempts remain.
/// A cancelled token aborts any in-flight wait immediately and surfaces the
/// last error.
///
/// # Errors
///
/// Returns the final error once attempts are exhausted, the error is
/// non-retryable, or the token is cancelled mid-wait.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);

    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, backing off"
                );

                tokio::select! {
                    () = tokio::time::sleep(delay) => {},
                    () = cancel.cancelled() => {
                        return Err(err.context("retry cancelled"));
                    },
                }
                attempt += 1;
            },
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    use super::*;
    use crate::error::Error;

    #[test]
    fn exponential_progression_without_jitter() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(512),
            jitter_factor: 0.0,
        };

        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
    }

    #[test]
    fn delay_capped_at_max() {
        let policy = RetryPolicy {
            max_attempts: 30,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.0,
        };

        assert_eq!(policy.delay_for(20), Duration::from_secs(60));
    }

    #[test]
    fn jitter_stays_within_band() {
        let base = Duration::from_secs(10);
        for _ in 0..50 {
            let jittered = apply_jitter(base, 0.25);
            assert!(jittered >= Duration::from_millis(7_500), "too small: {jittered:?}");
            assert!(jittered <= Duration::from_millis(12_500), "too large: {jittered:?}");
        }
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry(&RetryPolicy::immediate(5), &CancellationToken::new(), move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::unavailable("flaky"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_fails_fast() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> =
            retry(&RetryPolicy::immediate(5), &CancellationToken::new(), move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(Error::conflict("taken"))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error() {
        let result: Result<()> =
            retry(&RetryPolicy::immediate(3), &CancellationToken::new(), || async {
                Err(Error::unavailable("still down"))
            })
            .await;

        assert!(result.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn cancellation_aborts_wait() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.0,
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let started = std::time::Instant::now();
        let result: Result<()> =
            retry(&policy, &cancel, || async { Err(Error::unavailable("down")) }).await;

        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
