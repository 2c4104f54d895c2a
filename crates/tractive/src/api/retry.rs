//! Retry policy for rate-limited requests.
//!
//! The vendor throttles aggressively; a 429 is retried with exponential
//! backoff plus uniform jitter so that a fleet of clients does not
//! re-synchronize on the same retry instant.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

/// Delay function: maps a 1-based attempt number to a wait duration.
type DelayFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Policy controlling 429 retry behavior.
///
/// Immutable after construction; the delay function is a pure function of
/// the attempt number (modulo jitter).
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    delay: DelayFn,
}

impl RetryPolicy {
    /// Default number of retries after the initial attempt.
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// Policy with the vendor-appropriate default backoff:
    /// `4^attempt + uniform(0, 3)` seconds.
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries, delay: Arc::new(default_delay) }
    }

    /// Policy with a custom delay function of the 1-based attempt number.
    #[must_use]
    pub fn with_delay<F>(max_retries: u32, delay: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        Self { max_retries, delay: Arc::new(delay) }
    }

    /// Policy with the same delay before every retry. Used by tests to keep
    /// retry loops fast.
    #[must_use]
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self::with_delay(max_retries, move |_| delay)
    }

    /// Maximum number of retries after the initial attempt.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay to wait before the retry following `attempt` (1-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        (self.delay)(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_RETRIES)
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy").field("max_retries", &self.max_retries).finish()
    }
}

fn default_delay(attempt: u32) -> Duration {
    let base = 4f64.powi(attempt.min(8) as i32);
    let jitter = rand::thread_rng().gen_range(0.0..3.0);
    Duration::from_secs_f64(base + jitter)
}
