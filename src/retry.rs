//! Bounded retry with exponential backoff and jitter
//!
//! Wraps an operation returning an exit code. An exit code of 0 is terminal
//! success; a non-zero code and a raised error are the same class of
//! retryable failure, so a mix of the two across attempts is fine.

use crate::error::{SetupError, SetupResult};
use crate::workflow;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info};

/// Retry tuning for one operation
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Number of retries after the initial attempt (0 = single attempt)
    pub retries: u32,
    /// Base delay before the first retry, in milliseconds
    pub base_delay_ms: u64,
    /// Jitter applied to each delay, in percent of the computed delay
    pub jitter_pct: u32,
    /// Multiplier applied to the delay for each subsequent attempt
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Delay before the retry following `attempt` (0-indexed), jittered by
    /// up to ±jitter_pct percent and floored at zero
    fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let jitter = delay * (self.jitter_pct as f64 / 100.0) * (fastrand::f64() * 2.0 - 1.0);
        Duration::from_millis((delay + jitter).max(0.0) as u64)
    }
}

/// Run `operation` up to `retries + 1` times.
///
/// With `retries == 0` the operation is invoked exactly once and its result
/// returned verbatim. Otherwise a non-zero exit code on the final attempt is
/// returned (not raised), and an error on the final attempt is re-raised.
pub async fn with_retry<F, Fut>(
    mut operation: F,
    name: &str,
    config: &RetryConfig,
) -> SetupResult<i32>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SetupResult<i32>>,
{
    if config.retries == 0 {
        return operation().await;
    }

    for attempt in 0..=config.retries {
        match operation().await {
            Ok(0) => {
                if attempt > 0 {
                    info!("{name} succeeded on attempt {}", attempt + 1);
                }
                return Ok(0);
            }
            Ok(code) => {
                if attempt == config.retries {
                    error!(
                        "{name} failed after {} attempts with exit code {code}",
                        config.retries + 1
                    );
                    return Ok(code);
                }
                let delay = config.delay_for(attempt);
                workflow::warning(&format!(
                    "{name} failed with exit code {code} on attempt {}, retrying in {}ms...",
                    attempt + 1,
                    delay.as_millis()
                ));
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if attempt == config.retries {
                    error!("{name} failed after {} attempts: {e}", config.retries + 1);
                    return Err(e);
                }
                let delay = config.delay_for(attempt);
                workflow::warning(&format!(
                    "{name} failed on attempt {}: {e}, retrying in {}ms...",
                    attempt + 1,
                    delay.as_millis()
                ));
                tokio::time::sleep(delay).await;
            }
        }
    }

    Err(SetupError::Internal(format!(
        "{name} failed after all retries"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(retries: u32) -> RetryConfig {
        RetryConfig {
            retries,
            base_delay_ms: 0,
            jitter_pct: 0,
            backoff_multiplier: 1.0,
        }
    }

    #[tokio::test]
    async fn zero_retries_invokes_once_on_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let code = with_retry(
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(0)
                }
            },
            "op",
            &fast(0),
        )
        .await
        .unwrap();

        assert_eq!(code, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_retries_invokes_once_on_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let code = with_retry(
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                }
            },
            "op",
            &fast(0),
        )
        .await
        .unwrap();

        assert_eq!(code, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn always_failing_runs_retries_plus_one_times() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let code = with_retry(
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                }
            },
            "op",
            &fast(3),
        )
        .await
        .unwrap();

        assert_eq!(code, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn succeeds_midway_stops_early() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let code = with_retry(
            move || {
                let counter = counter.clone();
                async move {
                    let attempt = counter.fetch_add(1, Ordering::SeqCst);
                    if attempt < 2 {
                        Ok(1)
                    } else {
                        Ok(0)
                    }
                }
            },
            "op",
            &fast(5),
        )
        .await
        .unwrap();

        assert_eq!(code, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn final_error_is_raised() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let err = with_retry(
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(SetupError::Internal("boom".to_string()))
                }
            },
            "op",
            &fast(2),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, SetupError::Internal(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn mixes_error_and_exit_code_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let code = with_retry(
            move || {
                let counter = counter.clone();
                async move {
                    match counter.fetch_add(1, Ordering::SeqCst) {
                        0 => Err(SetupError::Internal("transient".to_string())),
                        1 => Ok(2),
                        _ => Ok(0),
                    }
                }
            },
            "op",
            &fast(4),
        )
        .await
        .unwrap();

        assert_eq!(code, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn delay_grows_exponentially_without_jitter() {
        let config = RetryConfig {
            retries: 3,
            base_delay_ms: 100,
            jitter_pct: 0,
            backoff_multiplier: 2.0,
        };
        assert_eq!(config.delay_for(0), Duration::from_millis(100));
        assert_eq!(config.delay_for(1), Duration::from_millis(200));
        assert_eq!(config.delay_for(2), Duration::from_millis(400));
    }

    #[test]
    fn jittered_delay_stays_within_bounds() {
        let config = RetryConfig {
            retries: 1,
            base_delay_ms: 1000,
            jitter_pct: 10,
            backoff_multiplier: 1.0,
        };
        for _ in 0..100 {
            let delay = config.delay_for(0).as_millis() as i64;
            assert!((900..=1100).contains(&delay), "delay out of bounds: {delay}");
        }
    }
}
