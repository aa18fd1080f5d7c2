//! Retry with a fixed pause.
//!
//! Deliveries retry on any failure with a constant pause between
//! attempts; the remote end going away briefly looks the same as a slow
//! disk, and a flat schedule keeps worst-case wait predictable.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Retry behavior for deliveries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    pub attempts: u32,
    /// Pause between failed attempts.
    pub pause: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            pause: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Create a policy. At least one attempt is always made.
    pub fn new(attempts: u32, pause: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            pause,
        }
    }
}

/// Result of a retried operation.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    /// Operation succeeded on the `attempts`-th try.
    Success { value: T, attempts: u32 },
    /// All attempts failed; `error` is the last failure.
    Exhausted { error: E, attempts: u32 },
}

impl<T, E> RetryOutcome<T, E> {
    /// Returns true if the operation succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Success { .. })
    }
}

/// Execute an async operation under the policy.
///
/// Every failure counts against the budget regardless of cause. The pause
/// runs between attempts, never after the last one.
pub async fn retry_fixed<F, Fut, T, E>(
    policy: &RetryPolicy,
    name: &str,
    operation: F,
) -> RetryOutcome<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                return RetryOutcome::Success {
                    value,
                    attempts: attempt,
                }
            }
            Err(e) if attempt < policy.attempts => {
                debug!(
                    "{} attempt {}/{} failed, retrying in {:?}: {}",
                    name, attempt, policy.attempts, policy.pause, e
                );
                tokio::time::sleep(policy.pause).await;
            }
            Err(error) => {
                warn!("{} failed after {} attempts: {}", name, attempt, error);
                return RetryOutcome::Exhausted {
                    error,
                    attempts: attempt,
                };
            }
        }
    }
}
