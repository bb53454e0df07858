//! Bounded retry with a fixed delay between attempts.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Attempt count and spacing for a retryable step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub attempts: u32,
    /// Delay between consecutive attempts
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }
}

/// All attempts failed; carries the error from the final attempt
#[derive(Debug)]
pub struct RetriesExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// Run `op` until it succeeds or the policy's attempts are used up
///
/// `op` receives the 1-based attempt number. No delay follows the final
/// attempt.
pub async fn retry_fixed<T, E, F, Fut>(
    policy: RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, RetriesExhausted<E>>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!("{} succeeded on attempt {}", label, attempt);
                }
                return Ok(value);
            }
            Err(e) if attempt >= attempts => {
                tracing::warn!("{} failed after {} attempts: {}", label, attempts, e);
                return Err(RetriesExhausted {
                    attempts,
                    last_error: e,
                });
            }
            Err(e) => {
                tracing::warn!(
                    "{} failed, retrying... ({} left): {}",
                    label,
                    attempts - attempt,
                    e
                );
                sleep(policy.delay).await;
                attempt += 1;
            }
        }
    }
}
