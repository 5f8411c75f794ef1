//! Retry policy
//!
//! One policy object describes how often and how patiently an operation is
//! retried. The frontier uses it to schedule re-attempts of fetch tasks; the
//! fusion engine and the coordinator use `RetryPolicy::run` around inference
//! stages and storage commits.

use crate::config::RetryConfig;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Errors that know whether repeating the operation can help
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// The run was cancelled before the operation finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("cancelled")
    }
}

/// Exponential backoff with an attempt cap
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Growth factor per further attempt
    pub multiplier: f64,
    /// Upper bound for a single delay
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Builds the policy from validated settings
    ///
    /// Settings that would flatten the backoff fall back to the defaults.
    pub fn from_config(config: &RetryConfig) -> Self {
        let defaults = RetryConfig::default();
        let multiplier = if config.multiplier > 1.0 && config.multiplier.is_finite() {
            config.multiplier
        } else {
            defaults.multiplier
        };
        let base_delay_ms = if config.base_delay_ms > 0 {
            config.base_delay_ms
        } else {
            defaults.base_delay_ms
        };

        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(base_delay_ms),
            multiplier,
            max_delay: Duration::from_millis(config.max_delay_ms.max(base_delay_ms)),
        }
    }

    /// Same backoff schedule with a different attempt cap
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// A policy that never waits and never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay to wait before starting attempt number `attempt` (1-based)
    ///
    /// The first attempt starts immediately; attempt `n >= 2` waits
    /// `base_delay * multiplier^(n - 2)`, capped at `max_delay`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2).min(32) as i32;
        let millis = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Whether another attempt is allowed after `attempts_made` attempts failed with `error`
    pub fn should_retry<E: Retryable + ?Sized>(&self, error: &E, attempts_made: u32) -> bool {
        error.is_retryable() && attempts_made < self.max_attempts
    }

    /// Runs `operation` until it succeeds, fails permanently, or the attempt cap is hit
    ///
    /// The closure receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if self.should_retry(&e, attempt) => {
                    tokio::time::sleep(self.backoff(what, attempt, &e)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Like `run`, but every attempt and every backoff sleep races `cancel`
    ///
    /// An attempt in flight when the token fires is dropped and the call
    /// returns the error built from `Cancelled`.
    pub async fn run_cancellable<T, E, F, Fut>(
        &self,
        what: &str,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display + From<Cancelled>,
    {
        let mut attempt = 1;
        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Cancelled.into()),
                outcome = operation(attempt) => outcome,
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if self.should_retry(&e, attempt) => {
                    let delay = self.backoff(what, attempt, &e);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(Cancelled.into()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn backoff<E: Display>(&self, what: &str, attempt: u32, error: &E) -> Duration {
        let delay = self.delay_before(attempt + 1);
        tracing::debug!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "{} failed, retrying: {}",
            what,
            error
        );
        delay
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Flaky(bool);

    impl Retryable for Flaky {
        fn is_retryable(&self) -> bool {
            self.0
        }
    }

    impl From<Cancelled> for Flaky {
        fn from(_: Cancelled) -> Self {
            Flaky(false)
        }
    }

    impl Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky(retryable={})", self.0)
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            multiplier: 2.0,
            max_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_backoff_grows() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_before(3), Duration::from_millis(2000));
        assert!(policy.delay_before(3) > policy.delay_before(2));
    }

    #[test]
    fn test_flat_settings_still_grow() {
        let config = RetryConfig {
            multiplier: 1.0,
            ..RetryConfig::default()
        };
        let policy = RetryPolicy::from_config(&config);
        assert!(policy.delay_before(3) > policy.delay_before(2));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_before(40), Duration::from_millis(30_000));
    }

    #[test]
    fn test_should_retry_respects_cap_and_predicate() {
        let policy = fast_policy(3);
        assert!(policy.should_retry(&Flaky(true), 1));
        assert!(policy.should_retry(&Flaky(true), 2));
        assert!(!policy.should_retry(&Flaky(true), 3));
        assert!(!policy.should_retry(&Flaky(false), 1));
    }

    #[tokio::test]
    async fn test_run_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, Flaky> = fast_policy(3)
            .run("flaky op", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(Flaky(true))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_stops_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Flaky> = fast_policy(5)
            .run("permanent op", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Flaky(false)) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_gives_up_at_cap() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Flaky> = fast_policy(2)
            .run("always failing op", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Flaky(true)) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        };
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result: Result<(), Flaky> = policy
            .run_cancellable("slow op", &cancel, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Flaky(true)) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<(), Flaky> = fast_policy(3)
            .run_cancellable("hanging op", &cancel, |_| std::future::pending())
            .await;
        assert!(matches!(result, Err(Flaky(false))));
    }
}
