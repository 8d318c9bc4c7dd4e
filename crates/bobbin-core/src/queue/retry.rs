//! Retry policy: decides whether and when a failed request runs again.

use std::time::Duration;

use crate::config::OrchestratorConfig;
use crate::domain::FailureClass;

/// The next action for a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Requeue at high priority after `delay`.
    Retry { delay: Duration, reason: String },

    /// Give up and reject the submitter.
    Fail { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the second attempt.
    pub base_delay: Duration,

    /// Growth factor per further attempt.
    pub multiplier: f64,

    /// Ceiling for any computed delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            base_delay: config.retry_delay(),
            multiplier: config.backoff_multiplier,
            max_delay: config.max_delay(),
        }
    }

    /// Delay after attempt number `attempts` (1-indexed) failed:
    /// `min(base_delay * multiplier^(attempts - 1), max_delay)`.
    ///
    /// With base=1s, multiplier=2.0, max=30s:
    /// 1 -> 1s, 2 -> 2s, 3 -> 4s, ..., 6 -> 30s
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = i32::try_from(attempts.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let max = self.max_delay.as_secs_f64();
        if secs.is_finite() && secs < max {
            Duration::from_secs_f64(secs)
        } else {
            self.max_delay
        }
    }

    /// Pure decision: retry while the error is retriable and attempts remain.
    pub fn decide(&self, attempts: u32, max_attempts: u32, class: FailureClass) -> Decision {
        if !class.retriable {
            Decision::Fail {
                reason: "non-retriable error".to_string(),
            }
        } else if attempts >= max_attempts {
            Decision::Fail {
                reason: format!("max attempts reached: {attempts}/{max_attempts}"),
            }
        } else {
            let delay = self.next_delay(attempts);
            Decision::Retry {
                delay,
                reason: format!(
                    "retry attempt {}/{} after {:?}",
                    attempts + 1,
                    max_attempts,
                    delay
                ),
            }
        }
    }
}
