//! Resilience utilities: retry with exponential backoff.
//!
//! The batch sink uses [`RetryConfig`] to bound how hard it fights a
//! failing store before halting: transient hiccups (lock contention, a
//! brief restart) are absorbed, persistent failures surface loudly.
//!
//! # Example
//!
//! ```rust
//! use telemetry_engine::resilience::RetryConfig;
//! use std::time::Duration;
//!
//! let retry = RetryConfig::sink();
//! assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(100));
//! assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(200));
//! ```

use std::time::Duration;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first).
    pub max_attempts: usize,

    /// Initial delay before the first retry.
    pub initial_delay: Duration,

    /// Maximum delay between retries (ceiling for exponential backoff).
    pub max_delay: Duration,

    /// Backoff multiplier (e.g. 2.0 = double delay each retry).
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Retry policy for batch sink flushes.
    ///
    /// Three attempts spanning well under a second, so a retried window
    /// stays close to its deadline. If the store is still failing after
    /// this, the sink halts rather than buffering unboundedly.
    ///
    /// # Backoff Schedule
    ///
    /// ```text
    /// Attempt  Delay before it
    /// -------  ---------------
    /// 1        (immediate)
    /// 2        100ms
    /// 3        200ms
    /// ```
    pub fn sink() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
        }
    }

    /// Fast-fail retry for tests.
    pub fn testing() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            backoff_factor: 2.0,
        }
    }

    /// Calculate the delay before a given retry attempt (1-indexed:
    /// attempt 1 is the first *retry*).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        let multiplier = self.backoff_factor.powi((attempt - 1) as i32);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        let delay = Duration::from_secs_f64(delay_secs);

        std::cmp::min(delay, self.max_delay)
    }
}
