//! Bounded retry with exponential backoff for transient Firestore failures.

use std::time::Duration;

use tracing::{info_span, warn, Instrument};

use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::record_retry;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 100;
const DEFAULT_MAX_DELAY_MS: u64 = 5000;

/// Backoff policy for retryable request failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// First backoff step, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on any single backoff, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl RetryConfig {
    /// Read the backoff knobs from the environment, keeping defaults for
    /// anything unset or unparseable.
    pub fn from_env() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: env_ms("FIRESTORE_RETRY_BASE_MS", DEFAULT_BASE_DELAY_MS),
            max_delay_ms: env_ms("FIRESTORE_RETRY_MAX_MS", DEFAULT_MAX_DELAY_MS),
        }
    }
}

fn env_ms(var: &str, default: u64) -> u64 {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Run `op`, retrying while it fails with a retryable error.
///
/// Network errors, 429s (honoring the server-suggested delay), and 5xx
/// responses are retried up to `config.max_retries` times; everything
/// else is returned to the caller on the first failure.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    operation: &str,
    op: F,
) -> FirestoreResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = FirestoreResult<T>>,
{
    let mut attempt = 0;
    loop {
        let span = info_span!("firestore_retry", operation = %operation, attempt = attempt + 1);

        let err = match op().instrument(span).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if attempt >= config.max_retries || !err.is_retryable() {
            return Err(err);
        }

        let delay = backoff_delay(config, attempt, err.retry_after_ms());
        warn!(
            operation = %operation,
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "retrying Firestore operation after error: {}",
            err
        );
        record_retry(operation);

        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Exponential backoff with full jitter, unless the server named a delay.
fn backoff_delay(config: &RetryConfig, attempt: u32, retry_after_ms: Option<u64>) -> Duration {
    if let Some(after) = retry_after_ms {
        return Duration::from_millis(after);
    }

    let ceiling = config
        .base_delay_ms
        .saturating_mul(1u64 << attempt.min(32))
        .min(config.max_delay_ms);

    // Jitter from clock noise keeps rand out of the dependency tree.
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let jittered = ceiling * u64::from(nanos % 1000) / 1000;

    Duration::from_millis(jittered.max(config.base_delay_ms))
}
