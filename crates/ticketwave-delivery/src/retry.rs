//! Bounded retry with exponential backoff.
//!
//! Failed attempts wait `base * 2^(k-1)` after the k-th failure: 5 s then
//! 10 s with the defaults. A rate-limit response does not consume an
//! attempt; the channel's `retry_after` is honoured instead, up to
//! `max_rate_limit_waits` times, after which it counts as a normal failure.
//! Rejections end the loop immediately.

use std::future::Future;
use std::time::Duration;

use crate::transport::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Counted attempts, including the first.
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_rate_limit_waits: u32,
}

impl RetryPolicy {
    pub const DEFAULT: Self = Self {
        max_attempts: 3,
        base_backoff: Duration::from_secs(5),
        max_rate_limit_waits: 5,
    };

    /// Wait after the `failures`-th failed attempt (1-based).
    pub fn delay_after_failure(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(1 << exponent)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Delivered {
        /// Counted attempts, including the successful one.
        attempts: u32,
    },
    /// Permanent rejection; not retried.
    Rejected { error: TransportError, attempts: u32 },
    /// Every counted attempt failed on a recoverable error.
    Exhausted {
        last_error: TransportError,
        attempts: u32,
    },
}

impl AttemptOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            AttemptOutcome::Delivered { attempts }
            | AttemptOutcome::Rejected { attempts, .. }
            | AttemptOutcome::Exhausted { attempts, .. } => *attempts,
        }
    }
}

/// Run `operation` until it succeeds, is rejected, or the policy gives up.
///
/// `operation` receives the 1-based number of the attempt about to be made.
pub async fn attempt_with_policy<F, Fut>(policy: RetryPolicy, mut operation: F) -> AttemptOutcome
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<(), TransportError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut failures = 0;
    let mut rate_limit_waits = 0;

    loop {
        let error = match operation(failures + 1).await {
            Ok(()) => {
                return AttemptOutcome::Delivered {
                    attempts: failures + 1,
                }
            }
            Err(e) => e,
        };

        match error {
            TransportError::Rejected(_) => {
                return AttemptOutcome::Rejected {
                    error,
                    attempts: failures + 1,
                }
            }
            TransportError::RateLimited { retry_after }
                if rate_limit_waits < policy.max_rate_limit_waits =>
            {
                rate_limit_waits += 1;
                tracing::warn!(?retry_after, rate_limit_waits, "rate limited, waiting");
                tokio::time::sleep(retry_after).await;
            }
            _ => {
                failures += 1;
                if failures >= max_attempts {
                    return AttemptOutcome::Exhausted {
                        last_error: error,
                        attempts: failures,
                    };
                }
                let delay = policy.delay_after_failure(failures);
                tracing::debug!(attempt = failures, ?delay, error = %error, "send failed, backing off");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
