//! Bounded retries for whole-transaction operations.

use crate::error::{MetadataError, MetadataResult};
use canon_core::config::ReconcileConfig;
use std::future::Future;
use std::time::Duration;

/// How often and how patiently a transaction is re-run on transient errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ReconcileConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ReconcileConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.retry_base_delay(),
            max_delay: config.retry_max_delay(),
        }
    }

    /// No retries; the first error is returned as is.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Backoff before retry number `retry` (1-based): base * 2^(retry-1),
    /// capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's retries are used up.
///
/// `op` must build a fresh transaction on every call. A dropped attempt's
/// transaction rolls back, so nothing from a failed attempt is visible.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut op: F,
) -> MetadataResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = MetadataResult<T>>,
{
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => {
                if attempt > policy.max_retries {
                    if policy.max_retries == 0 {
                        return Err(e);
                    }
                    tracing::error!(
                        operation,
                        attempts = attempt,
                        error = %e,
                        "giving up on transaction after retryable errors"
                    );
                    return Err(MetadataError::RetriesExhausted {
                        operation,
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retryable database error, re-running transaction"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
