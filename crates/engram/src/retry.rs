//! Bounded retry with exponential backoff and jitter.
//!
//! Used at the façade boundary for storage calls that fail transiently
//! (busy or locked databases). CRDT errors are never retried.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

/// Retry behavior for transient storage failures.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay in milliseconds.
    pub max_delay_ms: u64,
    /// Jitter factor (0.0 = none, 1.0 = up to double the delay).
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 25,
            max_delay_ms: 1_000,
            jitter: 0.2,
        }
    }
}

/// Delay before retry number `attempt` (0-indexed), in milliseconds.
///
/// `min(base * 2^attempt, max) * (1 + random * jitter)`, capped at `max`.
pub fn compute_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config
        .base_delay_ms
        .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX));
    let capped = base.min(config.max_delay_ms);
    if config.jitter <= 0.0 {
        return capped;
    }

    let jittered = capped as f64 * (1.0 + pseudo_random_fraction() * config.jitter);
    (jittered as u64).min(config.max_delay_ms)
}

/// A fraction in `[0, 1)` from the clock's sub-second nanos. Good enough
/// to spread retries apart; not random in any stronger sense.
fn pseudo_random_fraction() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    let mixed = nanos.wrapping_mul(2_654_435_761);
    f64::from(mixed) / (f64::from(u32::MAX) + 1.0)
}

/// Run `operation` until it succeeds, fails with an error `should_retry`
/// rejects, or `config.max_attempts` is used up. Returns the last error.
pub async fn retry_async<F, Fut, T, E, P>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(attempts = attempt + 1, "retry succeeded");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        attempt += 1;
        if !should_retry(&err) {
            return Err(err);
        }
        if attempt >= max {
            warn!(attempts = attempt, error = %err, "retry attempts exhausted");
            return Err(err);
        }

        let delay_ms = compute_backoff(config, attempt - 1);
        debug!(attempt, delay_ms, error = %err, "retrying after transient error");
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
}
