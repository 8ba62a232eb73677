//! Retry policy: decides whether a failed attempt is retried and after how long.

use std::time::Duration;

use crate::error::QueueError;

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// Sleep `delay` on the worker, then re-enqueue at the original priority.
    Retry { delay: Duration },

    /// Retries exhausted; the task fails.
    GiveUp,
}

/// Per-task retry policy.
///
/// `max_retries` counts retries, not attempts: a task may run at most
/// `max_retries + 1` times.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,

    /// Delay before the first retry.
    pub retry_delay: Duration,

    /// Growth factor applied per further retry. `1.0` keeps the delay constant.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            multiplier: 1.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
            multiplier: 1.0,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub(crate) fn validate(&self) -> Result<(), QueueError> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(QueueError::invalid(format!(
                "backoff multiplier must be a finite number >= 1.0, got {}",
                self.multiplier
            )));
        }
        Ok(())
    }

    /// Delay after the `attempts`-th failed attempt (1-indexed):
    /// `retry_delay * multiplier^(attempts - 1)`, saturating at `Duration::MAX`.
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.retry_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Decide the next step once `attempts` attempts have failed.
    pub fn decide(&self, attempts: u32) -> Decision {
        if attempts > self.max_retries {
            Decision::GiveUp
        } else {
            Decision::Retry {
                delay: self.next_delay(attempts),
            }
        }
    }
}
