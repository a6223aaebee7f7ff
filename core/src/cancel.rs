//! Deadline-derived cancellation.
//!
//! Every outbound call runs under a [`Deadline`]: a child of the caller's
//! token (if any) that is also cancelled when a timer fires. Child tokens give
//! the OR of both signals without any global abort flag.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{ParleyError, Result};

/// Cancellation token that fires after a fixed timeout or when its parent fires.
pub struct Deadline {
    token: CancellationToken,
    timed_out: Arc<AtomicBool>,
    timeout: Duration,
    timer: JoinHandle<()>,
}

impl Deadline {
    /// Start a deadline with no external cancellation source.
    pub fn start(timeout: Duration) -> Self {
        Self::with_parent(timeout, None)
    }

    /// Start a deadline linked to an optional caller-supplied token.
    pub fn with_parent(timeout: Duration, parent: Option<&CancellationToken>) -> Self {
        let token = match parent {
            Some(p) => p.child_token(),
            None => CancellationToken::new(),
        };
        let timed_out = Arc::new(AtomicBool::new(false));
        let timer = {
            let token = token.clone();
            let timed_out = Arc::clone(&timed_out);
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {
                        timed_out.store(true, Ordering::SeqCst);
                        token.cancel();
                    }
                    _ = token.cancelled() => {}
                }
            })
        };
        Self {
            token,
            timed_out,
            timeout,
            timer,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// True once the timer (not the parent) cancelled the token.
    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }

    /// Re-label an abort caused by this deadline's timer as `TimedOut`.
    ///
    /// Caller-initiated aborts and ordinary failures pass through unchanged.
    pub fn relabel(&self, err: ParleyError) -> ParleyError {
        if self.timed_out() && err.is_abort_like() {
            ParleyError::TimedOut(self.timeout.as_millis() as u64)
        } else {
            err
        }
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

/// Run `fut` until it completes or `token` fires.
///
/// Fails fast when the token is already cancelled, before `fut` is polled.
/// Dropping `fut` on cancellation aborts any in-flight HTTP request it owns.
pub async fn run_cancellable<T, F>(token: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if token.is_cancelled() {
        return Err(ParleyError::Cancelled("operation cancelled before start".into()));
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(ParleyError::Cancelled("The operation was aborted.".into())),
        res = fut => res,
    }
}

/// Sleep that wakes early with a cancellation error when `token` fires.
pub async fn sleep_cancellable(token: &CancellationToken, duration: Duration) -> Result<()> {
    run_cancellable(token, async {
        tokio::time::sleep(duration).await;
        Ok(())
    })
    .await
}

/// Run `op` under a fresh deadline of `timeout`, linked to `parent` if given.
pub async fn with_timeout<T, F, Fut>(
    timeout: Duration,
    parent: Option<&CancellationToken>,
    op: F,
) -> Result<T>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let deadline = Deadline::with_parent(timeout, parent);
    let token = deadline.token().clone();
    run_cancellable(&token, op(token.clone())).await
}
