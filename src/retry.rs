//! Generic retry-with-backoff for calls to unreliable external services.
//!
//! Every outbound integration (weather, lightning, topology feeds) goes
//! through [`with_retry`] instead of growing its own sleep/attempt-counting
//! loop. A retryable-error predicate separates transient network failures
//! (reset, timeout, disconnect) from terminal ones (bad request, auth,
//! missing dependency); terminal failures return on attempt 1 without
//! sleeping. After the attempt budget is exhausted the last error is
//! returned to the caller, who logs and continues -- a failing integration
//! must never take down the task that drives unrelated work.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use log::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Run `op` up to `policy.max_attempts` times, doubling the delay after each
/// retryable failure starting from `policy.base_delay`.
pub async fn with_retry<T, E, Op, Fut, Pred>(
    label: &str,
    policy: RetryPolicy,
    is_retryable: Pred,
    mut op: Op,
) -> Result<T, E>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    Pred: Fn(&E) -> bool,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delay = policy.base_delay;
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{}: succeeded on attempt {}", label, attempt);
                }
                return Ok(value);
            }
            Err(e) if !is_retryable(&e) => {
                warn!("{}: terminal error, not retrying: {}", label, e);
                return Err(e);
            }
            Err(e) if attempt >= max_attempts => {
                warn!(
                    "{}: giving up after {} attempt(s): {}",
                    label, attempt, e
                );
                return Err(e);
            }
            Err(e) => {
                warn!(
                    "{}: attempt {} failed ({}), retrying in {:?}",
                    label, attempt, e, delay
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
        }
    }
}

/// Retryable-error predicate for reqwest call sites: timeouts, connection
/// failures, and 5xx responses are transient; everything else (4xx, decode
/// errors, bad URLs) is terminal.
pub fn is_transient_http(err: &reqwest::Error) -> bool {
    if err.is_timeout() || err.is_connect() {
        return true;
    }
    if let Some(status) = err.status() {
        return status.is_server_error();
    }
    false
}
