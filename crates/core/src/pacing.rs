//! Adaptive spacing between the items of an email batch.
//!
//! The delay before each item is computed in four steps:
//!
//! 1. a base delay picked by batch size tier (small / medium / large);
//! 2. scaled up by `slowdown` for every `slowdown_every` items already sent;
//! 3. jittered by a random factor in `[-jitter, +jitter]`;
//! 4. clamped to `[min_delay, max_delay]`.

use std::time::Duration;

use rand::Rng;

/// Pacing parameters for batch sends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacingConfig {
    /// Batches up to this many items use `small_delay`.
    pub small_batch_max: usize,
    /// Batches up to this many items use `medium_delay`; larger use `large_delay`.
    pub medium_batch_max: usize,
    pub small_delay: Duration,
    pub medium_delay: Duration,
    pub large_delay: Duration,
    /// Every this many processed items the delay grows by `slowdown`.
    pub slowdown_every: usize,
    /// Fractional growth per step (0.5 = +50%).
    pub slowdown: f64,
    /// Maximum fractional jitter in either direction (0.3 = ±30%).
    pub jitter: f64,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            small_batch_max: 5,
            medium_batch_max: 15,
            small_delay: Duration::from_millis(2000),
            medium_delay: Duration::from_millis(3500),
            large_delay: Duration::from_millis(5000),
            slowdown_every: 10,
            slowdown: 0.5,
            jitter: 0.3,
            min_delay: Duration::from_millis(1500),
            max_delay: Duration::from_millis(10_000),
        }
    }
}

impl PacingConfig {
    /// Defaults with the floor/ceiling overridable from the environment.
    ///
    /// | Variable              | Default |
    /// |-----------------------|---------|
    /// | `EMAIL_PACING_MIN_MS` | `1500`  |
    /// | `EMAIL_PACING_MAX_MS` | `10000` |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let read_ms = |key: &str| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
        };
        Self {
            min_delay: read_ms("EMAIL_PACING_MIN_MS").unwrap_or(defaults.min_delay),
            max_delay: read_ms("EMAIL_PACING_MAX_MS").unwrap_or(defaults.max_delay),
            ..defaults
        }
    }

    /// Base delay for a batch of `batch_len` items.
    pub fn base_delay(&self, batch_len: usize) -> Duration {
        if batch_len <= self.small_batch_max {
            self.small_delay
        } else if batch_len <= self.medium_batch_max {
            self.medium_delay
        } else {
            self.large_delay
        }
    }

    /// Delay before the next item, with an explicit jitter sample in `[-1, 1]`.
    pub fn delay_with_sample(&self, processed: usize, batch_len: usize, sample: f64) -> Duration {
        let base = self.base_delay(batch_len).as_secs_f64();
        let steps = if self.slowdown_every == 0 {
            0
        } else {
            processed / self.slowdown_every
        };
        let scaled = base * (1.0 + self.slowdown * steps as f64);
        let jittered = scaled * (1.0 + self.jitter * sample.clamp(-1.0, 1.0));

        let (lo, hi) = (self.min_delay.as_secs_f64(), self.max_delay.as_secs_f64());
        let clamped = if lo <= hi {
            jittered.clamp(lo, hi)
        } else {
            lo
        };
        Duration::from_secs_f64(clamped.max(0.0))
    }

    /// Delay before the next item, jittered with the thread RNG.
    pub fn next_delay(&self, processed: usize, batch_len: usize) -> Duration {
        let sample = rand::rng().random_range(-1.0..=1.0);
        self.delay_with_sample(processed, batch_len, sample)
    }
}
