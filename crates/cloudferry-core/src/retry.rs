//! Bounded retry with a fixed delay between attempts.

use std::future::Future;
use std::time::Duration;

use crate::errors::{ProviderError, ProviderResult};

/// Default per-call timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Fixed pause between attempts.
    pub delay: Duration,
    /// Upper bound on a single attempt; expiry counts as a timeout.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(5),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            delay,
            ..Self::default()
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Total number of attempts allowed.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Run `op` until it succeeds, fails fatally, or the retry budget is spent.
///
/// Retryable errors are retried up to `policy.max_retries` times with
/// `policy.delay` between attempts. The surfaced error is the last
/// underlying one, with `attempts` set to the number of tries made.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, op: F) -> ProviderResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<T>>,
{
    with_retry_when(policy, label, ProviderError::is_retryable, op).await
}

/// Like [`with_retry`], retrying only errors accepted by `retryable`.
pub async fn with_retry_when<T, F, Fut, P>(
    policy: &RetryPolicy,
    label: &str,
    retryable: P,
    mut op: F,
) -> ProviderResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<T>>,
    P: Fn(&ProviderError) -> bool,
{
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let outcome = match tokio::time::timeout(policy.call_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::timeout(format!(
                "{label}: no response within {:?}",
                policy.call_timeout
            ))),
        };

        match outcome {
            Ok(value) => {
                if attempts > 1 {
                    log::debug!("{label}: succeeded after {attempts} attempts");
                }
                return Ok(value);
            }
            Err(err) => {
                let err = err.with_attempts(attempts);
                if !retryable(&err) {
                    return Err(err);
                }
                if attempts >= policy.max_attempts() {
                    log::warn!("{label}: giving up after {attempts} attempts: {err}");
                    return Err(err);
                }
                log::warn!(
                    "{label}: attempt {attempts}/{} failed, retrying in {:?}: {err}",
                    policy.max_attempts(),
                    policy.delay
                );
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}
