//! Retry utilities for record-source fetches.
//!
//! The aggregation engine itself never retries. Callers that fetch records
//! from a flaky source wrap the fetch in [`retry_with_backoff`], which only
//! retries errors that report themselves as [`Retryable`].
//!
//! ## Example
//!
//! ```no_run
//! use bqspend_core::recovery::{retry_with_backoff, RetryConfig, Retryable};
//!
//! #[derive(Debug)]
//! struct Flaky;
//! impl Retryable for Flaky {
//!     fn is_retryable(&self) -> bool { true }
//! }
//!
//! let outcome = retry_with_backoff(RetryConfig::for_source(), || Err::<(), _>(Flaky));
//! assert!(outcome.result.is_err());
//! ```

use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, info, warn};

/// Trait for determining if an error is retryable.
pub trait Retryable {
    /// Returns true if the operation that caused this error should be retried.
    fn is_retryable(&self) -> bool;
}

/// Configuration for retry behavior with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Initial delay before first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries (caps exponential growth).
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 doubles each time).
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Config for record-source fetches (moderate retries).
    pub fn for_source() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }

    /// Config that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Backoff before retry number `retry` (0-based), capped at `max_delay`,
    /// with ±25% jitter.
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let cap = self.max_delay.as_secs_f64();
        let base = (self.initial_delay.as_secs_f64() * self.multiplier.powi(retry as i32)).min(cap);
        let spread = base * 0.25;
        let jitter = if spread > 0.0 {
            rand::rng().random_range(-spread..spread)
        } else {
            0.0
        };
        Duration::from_secs_f64((base + jitter).clamp(0.0, cap))
    }
}

/// Outcome of [`retry_with_backoff`].
#[derive(Debug)]
pub struct RetryResult<T> {
    /// Last result: the success, or the error that ended retrying
    pub result: T,
    pub attempts: u32,
    /// Wall time including backoff sleeps
    pub total_duration: Duration,
}

/// Call `operation` until it succeeds, fails with a non-retryable error, or
/// has been retried `max_retries` times.
pub fn retry_with_backoff<T, E, F>(config: RetryConfig, mut operation: F) -> RetryResult<Result<T, E>>
where
    F: FnMut() -> Result<T, E>,
    E: Retryable + std::fmt::Debug,
{
    let start = Instant::now();
    let mut attempts = 0;

    let result = loop {
        attempts += 1;
        let err = match operation() {
            Ok(value) => break Ok(value),
            Err(e) => e,
        };

        if !err.is_retryable() {
            debug!(attempts, error = ?err, "Fetch failed permanently");
            break Err(err);
        }
        if attempts > config.max_retries {
            warn!(
                attempts,
                max_retries = config.max_retries,
                elapsed_ms = start.elapsed().as_millis(),
                error = ?err,
                "Giving up after retries"
            );
            break Err(err);
        }

        let delay = config.delay_for_attempt(attempts - 1);
        debug!(attempts, delay_ms = delay.as_millis(), error = ?err, "Retrying after backoff");
        thread::sleep(delay);
    };

    if result.is_ok() && attempts > 1 {
        info!(attempts, elapsed_ms = start.elapsed().as_millis(), "Succeeded after retry");
    }
    RetryResult {
        result,
        attempts,
        total_duration: start.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum FetchError {
        Timeout,
        Missing,
    }

    impl Retryable for FetchError {
        fn is_retryable(&self) -> bool {
            *self == FetchError::Timeout
        }
    }

    fn quick(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            multiplier: 1.0,
        }
    }

    #[test]
    fn test_delay_grows_and_is_capped() {
        let config = RetryConfig::for_source();
        let first = config.delay_for_attempt(0);
        assert!(first >= Duration::from_millis(375) && first <= Duration::from_millis(625));

        let second = config.delay_for_attempt(1);
        assert!(second >= Duration::from_millis(750) && second <= Duration::from_millis(1250));

        assert!(config.delay_for_attempt(64) <= config.max_delay);
    }

    #[test]
    fn test_first_success_is_one_attempt() {
        let outcome = retry_with_backoff(quick(3), || Ok::<_, FetchError>("rows"));
        assert_eq!(outcome.result, Ok("rows"));
        assert_eq!(outcome.attempts, 1);
    }

    #[test]
    fn test_recovers_after_timeouts() {
        let mut calls = 0;
        let outcome = retry_with_backoff(quick(3), || {
            calls += 1;
            if calls < 3 { Err(FetchError::Timeout) } else { Ok(calls) }
        });
        assert_eq!(outcome.result, Ok(3));
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.total_duration >= Duration::from_millis(1));
    }

    #[test]
    fn test_exhausted_retries_return_last_error() {
        let outcome = retry_with_backoff(quick(2), || Err::<(), _>(FetchError::Timeout));
        assert_eq!(outcome.result, Err(FetchError::Timeout));
        assert_eq!(outcome.attempts, 3);
    }

    #[test]
    fn test_missing_data_is_not_retried() {
        let mut calls = 0;
        let outcome = retry_with_backoff(quick(5), || {
            calls += 1;
            Err::<(), _>(FetchError::Missing)
        });
        assert_eq!(outcome.result, Err(FetchError::Missing));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_none_makes_a_single_attempt() {
        let outcome = retry_with_backoff(RetryConfig::none(), || Err::<(), _>(FetchError::Timeout));
        assert_eq!(outcome.attempts, 1);
    }
}
