//! Bounded, sequential retry that cooperates with cancellation.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cancel::sleep_cancellable;
use crate::{ParleyError, Result};

/// Base backoff; attempt `n` sleeps `n * BACKOFF_STEP` before retrying.
pub const BACKOFF_STEP: Duration = Duration::from_millis(150);

/// How many attempts to make and which HTTP statuses deserve another try
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retryable_status: fn(u16) -> bool,
}

impl RetryPolicy {
    /// Single attempt; used by the OpenAI-compatible path.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            retryable_status: |_| false,
        }
    }

    /// Two attempts on 429 / 5xx; used by the Gemini path.
    pub fn transient() -> Self {
        Self {
            max_attempts: 2,
            retryable_status: is_transient_status,
        }
    }

    pub fn is_retryable(&self, err: &ParleyError) -> bool {
        err.http_status()
            .map(|s| (self.retryable_status)(s))
            .unwrap_or(false)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::no_retry()
    }
}

pub fn is_transient_status(status: u16) -> bool {
    status == 429 || status >= 500
}

/// Run `op` up to `policy.max_attempts` times.
///
/// Abort-like errors and non-retryable statuses are returned immediately.
/// Between attempts the loop sleeps `150ms * attempt` (no jitter); the sleep
/// observes `token`, so cancelling during backoff prevents any further attempt.
pub async fn with_retry<T, F, Fut>(
    token: &CancellationToken,
    policy: RetryPolicy,
    mut op: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    let mut last_error: Option<ParleyError> = None;

    while attempt < policy.max_attempts {
        attempt += 1;
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(err) => {
                if err.is_abort_like() {
                    debug!(target: "retry", attempt, error = %err, "Aborted; not retrying");
                    return Err(err);
                }
                if !policy.is_retryable(&err) {
                    return Err(err);
                }
                if attempt >= policy.max_attempts {
                    last_error = Some(err);
                    break;
                }
                let backoff = BACKOFF_STEP * attempt;
                warn!(
                    target: "retry",
                    attempt,
                    status = ?err.http_status(),
                    backoff_ms = backoff.as_millis() as u64,
                    "Retryable failure; backing off"
                );
                sleep_cancellable(token, backoff).await?;
                last_error = Some(err);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        ParleyError::RetryExhausted(format!("no successful attempt out of {}", policy.max_attempts))
    }))
}
