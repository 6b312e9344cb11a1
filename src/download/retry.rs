//! Retry policy for transient repository errors.
//!
//! Repository calls fail transiently in a small set of recognizable ways;
//! the classifier matches the failure text against that set, and the
//! policy retries up to 3 attempts with a linearly growing delay
//! (1s x attempt) plus a little jitter to avoid retry alignment across
//! concurrent tasks.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use super::DownloadError;

/// Maximum attempts, including the initial one.
pub const MAX_ATTEMPTS: u32 = 3;

/// Base delay multiplied by the attempt number.
const BASE_DELAY: Duration = Duration::from_secs(1);

/// Maximum jitter added to each delay.
const MAX_JITTER: Duration = Duration::from_millis(250);

/// Failure substrings considered transient.
const RETRYABLE_MARKERS: [&str; 5] = [
    "timeout",
    "connection reset",
    "temporary failure",
    "network is unreachable",
    "no such host",
];

/// Decision on whether to retry a failed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the given delay; `attempt` is the upcoming attempt
    /// number (1-indexed).
    Retry {
        /// Delay before the next attempt.
        delay: Duration,
        /// Upcoming attempt number.
        attempt: u32,
    },
    /// Give up.
    DoNotRetry {
        /// Why no further attempt is made.
        reason: String,
    },
}

/// Returns true when the failure text matches the transient set.
#[must_use]
pub fn is_retryable(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    RETRYABLE_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Linear-backoff retry policy over the transient failure set.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base_delay: BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with explicit attempt cap and base delay.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Decides whether `attempt` (1-indexed, just failed) is retried.
    #[must_use]
    pub fn should_retry(&self, failure_message: &str, attempt: u32) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::DoNotRetry {
                reason: format!("exhausted {} attempts", self.max_attempts),
            };
        }
        if !is_retryable(failure_message) {
            return RetryDecision::DoNotRetry {
                reason: "failure is not transient".to_string(),
            };
        }

        let delay = self.base_delay * attempt + jitter();
        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Runs `operation` under this policy, retrying transient
    /// [`DownloadError::Network`] failures.
    ///
    /// # Errors
    ///
    /// Returns the last error once attempts are exhausted or the failure
    /// is not transient.
    pub async fn run<T, F, Fut>(&self, name: &str, operation: F) -> Result<T, DownloadError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, DownloadError>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    let message = error.to_string();
                    let transient = matches!(error, DownloadError::Network { .. });
                    let decision = if transient {
                        self.should_retry(&message, attempt)
                    } else {
                        RetryDecision::DoNotRetry {
                            reason: "error class is not retryable".to_string(),
                        }
                    };

                    match decision {
                        RetryDecision::Retry { delay, attempt: next } => {
                            debug!(
                                operation = name,
                                attempt,
                                delay_ms = delay.as_millis(),
                                error = %message,
                                "transient failure, retrying"
                            );
                            tokio::time::sleep(delay).await;
                            attempt = next;
                        }
                        RetryDecision::DoNotRetry { reason } => {
                            warn!(operation = name, attempt, %reason, error = %message, "giving up");
                            return Err(error);
                        }
                    }
                }
            }
        }
    }
}

fn jitter() -> Duration {
    #[allow(clippy::cast_possible_truncation)]
    let cap = MAX_JITTER.as_millis() as u64;
    Duration::from_millis(rand::thread_rng().gen_range(0..=cap))
}
