//! Bounded exponential-backoff retry for transient network failures.
//!
//! [`RetryExecutor::run_with`] invokes an operation, retries it while it
//! fails with a transient error (see [`Transient`]), and gives up after
//! `max_attempts`. Non-transient errors are returned after the first
//! attempt without any delay.
//!
//! The executor publishes a "retrying" flag on a `watch` channel so a UI
//! can show that a mutation is being retried.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Classifies an error as worth retrying.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for CoreError {
    fn is_transient(&self) -> bool {
        CoreError::is_transient(self)
    }
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(10_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Load the policy from environment variables.
    ///
    /// | Variable              | Default |
    /// |-----------------------|---------|
    /// | `RETRY_MAX_ATTEMPTS`  | `3`     |
    /// | `RETRY_BASE_DELAY_MS` | `1000`  |
    /// | `RETRY_MAX_DELAY_MS`  | `10000` |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let read = |key: &str| std::env::var(key).ok().and_then(|v| v.parse::<u64>().ok());
        Self {
            max_attempts: read("RETRY_MAX_ATTEMPTS")
                .map(|n| n.max(1) as u32)
                .unwrap_or(defaults.max_attempts),
            base_delay: read("RETRY_BASE_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
            max_delay: read("RETRY_MAX_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
        }
    }

    /// Wait after the failed attempt number `attempt` (1-based):
    /// `min(base_delay * 2^(attempt - 1), max_delay)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

// ---------------------------------------------------------------------------
// RetryExecutor
// ---------------------------------------------------------------------------

/// Passed to the `on_retry` hook before each backoff sleep.
#[derive(Debug)]
pub struct RetryAttempt<'a, E> {
    /// The attempt that just failed (1-based).
    pub attempt: u32,
    pub max_attempts: u32,
    pub delay: Duration,
    pub error: &'a E,
}

pub struct RetryExecutor {
    policy: RetryPolicy,
    retrying: watch::Sender<bool>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        let (retrying, _) = watch::channel(false);
        Self { policy, retrying }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Whether a backoff is currently in progress.
    pub fn is_retrying(&self) -> bool {
        *self.retrying.borrow()
    }

    /// Observe the retrying flag.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.retrying.subscribe()
    }

    /// Run `op` with retries and no hooks.
    pub async fn run<T, E, F, Fut>(&self, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + std::fmt::Display,
    {
        self.run_with(op, |_| {}, |_| {}).await
    }

    /// Run `op` with retries.
    ///
    /// `on_retry` fires before every backoff sleep. `on_error` fires once
    /// with the terminal error (retries exhausted or a non-transient
    /// failure) before it is returned; callers use it for compensation.
    pub async fn run_with<T, E, F, Fut, R, X>(
        &self,
        mut op: F,
        mut on_retry: R,
        on_error: X,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + std::fmt::Display,
        R: FnMut(RetryAttempt<'_, E>),
        X: FnOnce(&E),
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => {
                    self.retrying.send_replace(false);
                    return Ok(value);
                }
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.policy.delay_after(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient failure, retrying"
                    );
                    on_retry(RetryAttempt {
                        attempt,
                        max_attempts,
                        delay,
                        error: &err,
                    });
                    self.retrying.send_replace(true);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    self.retrying.send_replace(false);
                    if err.is_transient() {
                        tracing::error!(attempts = attempt, error = %err, "Retries exhausted");
                    }
                    on_error(&err);
                    return Err(err);
                }
            }
        }
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn executor() -> RetryExecutor {
        RetryExecutor::new(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(150),
        })
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 6,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(3000),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_after(4), Duration::from_millis(3000));
        assert_eq!(policy.delay_after(60), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_then_success_take_k_plus_one_calls() {
        let calls = Arc::new(AtomicU32::new(0));
        let retries = AtomicU32::new(0);
        let exec = executor();

        let result = exec
            .run_with(
                || {
                    let calls = Arc::clone(&calls);
                    async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                        if n <= 2 {
                            Err(CoreError::Network("offline".into()))
                        } else {
                            Ok(n)
                        }
                    }
                },
                |_| {
                    retries.fetch_add(1, Ordering::SeqCst);
                },
                |_| panic!("on_error must not fire on success"),
            )
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(retries.load(Ordering::SeqCst), 2);
        assert!(!exec.is_retrying());
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let exec = executor();
        let started = Instant::now();
        let mut compensated = false;

        let result: Result<(), CoreError> = exec
            .run_with(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(CoreError::Validation("missing title".into())) }
                },
                |_| panic!("on_retry must not fire"),
                |_| compensated = true,
            )
            .await;

        assert!(matches!(result, Err(CoreError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(compensated);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_call_on_error_and_return_last_error() {
        let calls = AtomicU32::new(0);
        let exec = executor();
        let started = Instant::now();
        let mut seen_delays = Vec::new();
        let mut terminal = None;

        let result: Result<(), CoreError> = exec
            .run_with(
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    async move { Err(CoreError::Network(format!("attempt {n}"))) }
                },
                |attempt| seen_delays.push(attempt.delay),
                |err| terminal = Some(err.to_string()),
            )
            .await;

        assert!(matches!(result, Err(CoreError::Network(ref m)) if m == "attempt 3"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            seen_delays,
            vec![Duration::from_millis(100), Duration::from_millis(150)]
        );
        assert_eq!(started.elapsed(), Duration::from_millis(250));
        assert_eq!(terminal.as_deref(), Some("Network error: attempt 3"));
    }

    #[tokio::test(start_paused = true)]
    async fn retrying_flag_is_raised_during_backoff() {
        let exec = Arc::new(executor());
        let mut flag = exec.subscribe();
        let calls = Arc::new(AtomicU32::new(0));

        let task = {
            let exec = Arc::clone(&exec);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                exec.run(|| {
                    let calls = Arc::clone(&calls);
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                            Err(CoreError::Network("reset".into()))
                        } else {
                            Ok(())
                        }
                    }
                })
                .await
            })
        };

        flag.changed().await.unwrap();
        assert!(*flag.borrow_and_update());

        task.await.unwrap().unwrap();
        assert!(!exec.is_retrying());
    }
}
