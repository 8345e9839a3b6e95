//! Outbound send rate limiter.
//!
//! Enforces a per-minute cap, a per-hour cap and a minimum spacing between
//! consecutive sends. Windows are rolling: the limiter keeps the instants of
//! the sends made during the last hour and counts the ones that fall inside
//! each trailing window, so no 60 s span ever holds more than
//! `per_minute` sends and no 3600 s span more than `per_hour`.
//!
//! State is process-local. Each [`RateLimiter`] is an independent budget.
//!
//! Time comes from [`tokio::time::Instant`] so limits can be exercised on a
//! paused test clock.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Default sends allowed in any trailing minute.
pub const DEFAULT_PER_MINUTE: u32 = 20;

/// Default sends allowed in any trailing hour.
pub const DEFAULT_PER_HOUR: u32 = 300;

/// Default minimum spacing between two sends.
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_millis(1000);

/// Rate limiter caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub per_minute: u32,
    pub per_hour: u32,
    pub min_delay: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: DEFAULT_PER_MINUTE,
            per_hour: DEFAULT_PER_HOUR,
            min_delay: DEFAULT_MIN_DELAY,
        }
    }
}

impl RateLimitConfig {
    /// Load caps from environment variables.
    ///
    /// | Variable                | Default |
    /// |-------------------------|---------|
    /// | `EMAIL_RATE_PER_MINUTE` | `20`    |
    /// | `EMAIL_RATE_PER_HOUR`   | `300`   |
    /// | `EMAIL_MIN_DELAY_MS`    | `1000`  |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            per_minute: env_parse("EMAIL_RATE_PER_MINUTE").unwrap_or(defaults.per_minute),
            per_hour: env_parse("EMAIL_RATE_PER_HOUR").unwrap_or(defaults.per_hour),
            min_delay: env_parse("EMAIL_MIN_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.min_delay),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// Which limit blocked a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitReason {
    PerMinuteCap,
    PerHourCap,
    MinDelay,
}

impl fmt::Display for RateLimitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RateLimitReason::PerMinuteCap => "per-minute cap reached",
            RateLimitReason::PerHourCap => "per-hour cap reached",
            RateLimitReason::MinDelay => "minimum delay not elapsed",
        })
    }
}

/// A send was refused; retrying after `retry_after` will clear this reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("rate limited: {reason} (retry in {retry_after:?})")]
pub struct RateLimited {
    pub reason: RateLimitReason,
    pub retry_after: Duration,
}

/// Counters as seen at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterState {
    pub sent_this_minute: u32,
    pub sent_this_hour: u32,
    pub last_sent_at: Option<Instant>,
}

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

/// Thread-safe sliding-window send limiter.
pub struct RateLimiter {
    config: RateLimitConfig,
    sent: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            sent: Mutex::new(VecDeque::with_capacity(config.per_hour as usize)),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Check whether a send is allowed right now without recording one.
    pub fn can_send(&self) -> Result<(), RateLimited> {
        let now = Instant::now();
        let mut sent = self.lock();
        prune(&mut sent, now);
        self.check(&sent, now)
    }

    /// Record a send that happened now.
    pub fn register_sent(&self) {
        let now = Instant::now();
        let mut sent = self.lock();
        prune(&mut sent, now);
        sent.push_back(now);
    }

    /// Check and record in one step, so two callers cannot both pass the
    /// check for the last free slot.
    pub fn try_acquire(&self) -> Result<(), RateLimited> {
        let now = Instant::now();
        let mut sent = self.lock();
        prune(&mut sent, now);
        self.check(&sent, now)?;
        sent.push_back(now);
        Ok(())
    }

    pub fn state(&self) -> RateLimiterState {
        let now = Instant::now();
        let mut sent = self.lock();
        prune(&mut sent, now);
        RateLimiterState {
            sent_this_minute: count_within(&sent, now, MINUTE) as u32,
            sent_this_hour: sent.len() as u32,
            last_sent_at: sent.back().copied(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Instant>> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self, sent: &VecDeque<Instant>, now: Instant) -> Result<(), RateLimited> {
        if sent.len() >= self.config.per_hour as usize {
            let oldest = oldest_of_last(sent, self.config.per_hour as usize, now);
            return Err(RateLimited {
                reason: RateLimitReason::PerHourCap,
                retry_after: (oldest + HOUR).saturating_duration_since(now),
            });
        }

        let in_minute = count_within(sent, now, MINUTE);
        if in_minute >= self.config.per_minute as usize {
            // The oldest send inside the minute window has to age out.
            let oldest = oldest_of_last(sent, in_minute, now);
            return Err(RateLimited {
                reason: RateLimitReason::PerMinuteCap,
                retry_after: (oldest + MINUTE).saturating_duration_since(now),
            });
        }

        if let Some(&last) = sent.back() {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.config.min_delay {
                return Err(RateLimited {
                    reason: RateLimitReason::MinDelay,
                    retry_after: self.config.min_delay - elapsed,
                });
            }
        }

        Ok(())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

/// Drop sends older than the hour window.
fn prune(sent: &mut VecDeque<Instant>, now: Instant) {
    while let Some(&front) = sent.front() {
        if now.saturating_duration_since(front) >= HOUR {
            sent.pop_front();
        } else {
            break;
        }
    }
}

/// Instant of the oldest among the last `n` sends, or `now` when there are none.
fn oldest_of_last(sent: &VecDeque<Instant>, n: usize, now: Instant) -> Instant {
    match n {
        0 => now,
        n => sent.get(sent.len().saturating_sub(n)).copied().unwrap_or(now),
    }
}

/// Number of sends in the trailing `window`. `sent` is ordered oldest first.
fn count_within(sent: &VecDeque<Instant>, now: Instant, window: Duration) -> usize {
    sent.iter()
        .rev()
        .take_while(|&&at| now.saturating_duration_since(at) < window)
        .count()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn limiter(per_minute: u32, per_hour: u32, min_delay_ms: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            per_minute,
            per_hour,
            min_delay: Duration::from_millis(min_delay_ms),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_limiter_allows_a_send() {
        let limiter = limiter(5, 10, 1000);
        assert!(limiter.can_send().is_ok());
        assert_eq!(limiter.state().sent_this_hour, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn min_delay_blocks_back_to_back_sends() {
        let limiter = limiter(5, 10, 1000);
        limiter.register_sent();

        tokio::time::advance(Duration::from_millis(400)).await;
        let err = limiter.can_send().unwrap_err();
        assert_eq!(err.reason, RateLimitReason::MinDelay);
        assert_eq!(err.retry_after, Duration::from_millis(600));

        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(limiter.can_send().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn per_minute_cap_blocks_until_oldest_send_ages_out() {
        let limiter = limiter(3, 100, 0);
        for _ in 0..3 {
            limiter.try_acquire().unwrap();
            tokio::time::advance(Duration::from_secs(10)).await;
        }

        // Sends at t=0,10,20; now t=30.
        let err = limiter.try_acquire().unwrap_err();
        assert_eq!(err.reason, RateLimitReason::PerMinuteCap);
        assert_eq!(err.retry_after, Duration::from_secs(30));

        tokio::time::advance(err.retry_after).await;
        assert!(limiter.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn per_hour_cap_wins_over_per_minute() {
        let limiter = limiter(10, 2, 0);
        limiter.try_acquire().unwrap();
        tokio::time::advance(Duration::from_secs(120)).await;
        limiter.try_acquire().unwrap();

        tokio::time::advance(Duration::from_secs(120)).await;
        assert_matches!(
            limiter.try_acquire(),
            Err(RateLimited {
                reason: RateLimitReason::PerHourCap,
                ..
            })
        );

        // First send was at t=0; it leaves the hour window at t=3600.
        let err = limiter.can_send().unwrap_err();
        assert_eq!(err.retry_after, Duration::from_secs(3600 - 240));
    }

    #[tokio::test(start_paused = true)]
    async fn windows_roll_instead_of_resetting_on_boundaries() {
        let limiter = limiter(2, 100, 0);
        // Two sends late in the first minute...
        tokio::time::advance(Duration::from_secs(55)).await;
        limiter.try_acquire().unwrap();
        limiter.try_acquire().unwrap();
        // ...still count just after a fixed-clock boundary would have reset.
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_matches!(
            limiter.try_acquire(),
            Err(RateLimited {
                reason: RateLimitReason::PerMinuteCap,
                ..
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn trailing_windows_never_exceed_caps_under_pressure() {
        let limiter = limiter(4, 12, 250);
        let mut sends: Vec<Instant> = Vec::new();

        // Hammer the limiter every 100ms for two simulated hours.
        for _ in 0..72_000 {
            if limiter.try_acquire().is_ok() {
                sends.push(Instant::now());
            }
            tokio::time::advance(Duration::from_millis(100)).await;
        }

        assert!(!sends.is_empty());
        for (i, &at) in sends.iter().enumerate() {
            let minute = sends[i..]
                .iter()
                .take_while(|&&t| t.duration_since(at) < MINUTE)
                .count();
            let hour = sends[i..]
                .iter()
                .take_while(|&&t| t.duration_since(at) < HOUR)
                .count();
            assert!(minute <= 4, "minute window held {minute} sends");
            assert!(hour <= 12, "hour window held {hour} sends");
        }
        for pair in sends.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= Duration::from_millis(250));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn state_reports_counters() {
        let limiter = limiter(10, 10, 0);
        limiter.register_sent();
        tokio::time::advance(Duration::from_secs(90)).await;
        limiter.register_sent();

        let state = limiter.state();
        assert_eq!(state.sent_this_minute, 1);
        assert_eq!(state.sent_this_hour, 2);
        assert_eq!(state.last_sent_at, Some(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn sends_older_than_an_hour_are_forgotten() {
        let limiter = limiter(10, 1, 0);
        limiter.register_sent();
        tokio::time::advance(HOUR).await;
        assert!(limiter.can_send().is_ok());
        assert_eq!(limiter.state().sent_this_hour, 0);
    }
}
