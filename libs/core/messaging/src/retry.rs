//! Bounded retry with backoff, shared by the publish, consume and connect paths.

use std::fmt::Display;
use std::future::Future;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::RetryPolicy;

/// Why [`retry_with_backoff`] gave up.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RetryError<E> {
    /// The operation returned an error the caller marked as not retryable
    #[error("{error}")]
    Aborted { attempts: u32, error: E },

    /// Every attempt failed; `last` is the final error
    #[error("failed after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Aborted { attempts, .. } | RetryError::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryError::Aborted { error, .. } => error,
            RetryError::Exhausted { last, .. } => last,
        }
    }
}

/// Run `operation` until it succeeds, `is_retryable` rejects its error, or
/// `policy.max_attempts` attempts have been made.
///
/// The operation receives the 1-based attempt number. Between attempts the
/// task sleeps for [`RetryPolicy::delay_after`].
///
/// # Example
/// ```ignore
/// let ack = retry_with_backoff(
///     &RetryPolicy::publish(),
///     |attempt| async move { broker.publish(request.clone()).await },
///     BrokerError::is_transient,
/// )
/// .await?;
/// ```
pub async fn retry_with_backoff<F, Fut, T, E, R>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: R,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    R: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) if !is_retryable(&error) => {
                debug!(attempt, error = %error, "Operation failed with non-retryable error");
                return Err(RetryError::Aborted {
                    attempts: attempt,
                    error,
                });
            }
            Err(error) if attempt >= max_attempts => {
                warn!(attempts = attempt, error = %error, "Operation failed, giving up");
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }
            Err(error) => {
                let delay = policy.delay_after(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
