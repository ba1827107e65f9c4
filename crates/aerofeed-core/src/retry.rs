//! Retry logic with exponential backoff, jitter, and error-class aware eligibility.
//!
//! Eligibility is decided from the error's class before any delay is computed,
//! so attempts are never spent waiting on errors that waiting cannot fix.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// HTTP statuses that indicate a transient upstream condition.
pub const RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Backoff strategy for retrying failed requests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Uses a fixed delay between retries.
    Fixed {
        /// Delay between retries.
        delay: Duration,
    },
    /// Uses an exponential delay between retries.
    ///
    /// The delay after attempt `n` is `base * factor^(n-1)`, capped at `max`.
    Exponential {
        /// The delay after the first failed attempt.
        base: Duration,
        /// The multiplicative factor for each subsequent retry.
        factor: f64,
        /// The maximum duration to wait between retries.
        max: Duration,
        /// Whether to apply random jitter (+/- 25%) to the delay.
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_secs(1),
            factor: 2.0,
            max: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Delay to wait after failed attempt `attempt` (1-based).
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
                let seconds = base.as_secs_f64() * factor.powi(exponent);
                let capped_seconds = seconds.min(max.as_secs_f64());

                let mut delay = Duration::from_secs_f64(capped_seconds);

                if jitter {
                    let jitter_ms = (delay.as_millis() as f64 * 0.25) as u64;
                    let random_offset = fastrand::u64(0..=(jitter_ms * 2));
                    let total_ms =
                        delay.as_millis() as i64 + (random_offset as i64 - jitter_ms as i64);
                    delay = Duration::from_millis(total_ms.max(0) as u64);
                }

                delay
            }
        }
    }

    /// Upper bound applied to server-provided retry hints.
    pub fn max_delay(self) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential { max, .. } => max,
        }
    }
}

/// What the retry policy needs to know about an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Blocked by an automated challenge; waiting does not help.
    Blocked,
    RateLimited { retry_after: Option<Duration> },
    /// Malformed input or response.
    Validation,
    /// Connection reset, timeout, DNS failure.
    Network,
    /// Upstream answered with this HTTP status.
    Status(u16),
    Other,
}

/// Implemented by errors that the [`RetryPolicy`] can act on.
pub trait Classify {
    fn retry_class(&self) -> RetryClass;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    Abort,
}

/// Outcome of one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryableOperation {
    /// 1-based number of the attempt that just failed.
    pub attempt: u32,
    /// Wait before the next attempt; zero when aborting.
    pub delay: Duration,
    pub decision: RetryDecision,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Single attempt, never retries.
    pub fn no_retry() -> Self {
        Self::new(1, Backoff::default())
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Classifies a failure of attempt `attempt` (1-based).
    pub fn decide(&self, attempt: u32, class: RetryClass) -> RetryableOperation {
        let delay = match class {
            RetryClass::Blocked => None,
            RetryClass::RateLimited {
                retry_after: Some(hint),
            } => Some(hint.min(self.backoff.max_delay())),
            RetryClass::RateLimited { retry_after: None } => Some(self.backoff.delay(attempt)),
            RetryClass::Validation => None,
            RetryClass::Network => Some(self.backoff.delay(attempt)),
            RetryClass::Status(status) if RETRYABLE_STATUSES.contains(&status) => {
                Some(self.backoff.delay(attempt))
            }
            RetryClass::Status(_) | RetryClass::Other => None,
        };

        match delay {
            Some(delay) if attempt < self.max_attempts => RetryableOperation {
                attempt,
                delay,
                decision: RetryDecision::Retry,
            },
            _ => RetryableOperation {
                attempt,
                delay: Duration::ZERO,
                decision: RetryDecision::Abort,
            },
        }
    }

    /// Runs `operation` until it succeeds, fails with an ineligible error, or
    /// `max_attempts` is reached; returns the last error in the failure cases.
    ///
    /// `operation` receives the 1-based attempt number.
    pub async fn execute<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let mut attempt = 1;
        loop {
            let error = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let class = error.retry_class();
            let step = self.decide(attempt, class);
            match step.decision {
                RetryDecision::Retry => {
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = step.delay.as_millis() as u64,
                        class = ?class,
                        error = %error,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(step.delay).await;
                    attempt += 1;
                }
                RetryDecision::Abort => {
                    tracing::debug!(
                        attempt,
                        max_attempts = self.max_attempts,
                        class = ?class,
                        error = %error,
                        "giving up"
                    );
                    return Err(error);
                }
            }
        }
    }
}
