//! Status-code and transport-error classifier plus exponential backoff with
//! jitter. Usable standalone (as here) and embedded in each adapter's HTTP
//! call path.
//!
//! Grounded on the retry loop shape in the teacher's `client.rs::
//! execute_with_enhanced_retry`, but reclassifies by HTTP status code set
//! rather than by `ProviderError` variant, and computes backoff the
//! overflow-safe way (`checked_mul`/`saturating_pow` style) rather than raw
//! `f64` multiplication.

use crate::error::ProviderError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// Status codes retryable per the core's retry policy.
pub fn is_retryable_status(code: u16) -> bool {
    matches!(code, 429 | 500 | 502 | 503 | 504)
}

/// A transport/API error is retryable unless it is cancellation or
/// deadline-exceeded (`ProviderError::is_terminal`), or the status it
/// carries is outside the retryable set (e.g. 401, 404).
pub fn is_retryable_error(err: &ProviderError) -> bool {
    if err.is_terminal() {
        return false;
    }
    match err.status_code() {
        Some(code) => is_retryable_status(code),
        None => matches!(err, ProviderError::Http(_)),
    }
}

fn jittered_delay(delay: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return delay;
    }
    let base = delay.as_secs_f64();
    let jitter = rand::thread_rng().gen_range(-jitter_factor..=jitter_factor) * base;
    Duration::from_secs_f64((base + jitter).max(0.0))
}

fn next_delay(delay: Duration, multiplier: f64, max_delay: Duration) -> Duration {
    let scaled = delay.as_secs_f64() * multiplier;
    Duration::from_secs_f64(scaled).min(max_delay)
}

/// Run `operation` under the retry policy in `config`. `operation` is called
/// at most `config.max_retries + 1` times. A cancelled `cancel` token aborts
/// immediately, during either the call or the backoff sleep, and is never
/// retried.
pub async fn execute<F, Fut, T>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut delay = config.initial_delay;

    for attempt in 0..=config.max_retries {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }

        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt == config.max_retries || !is_retryable_error(&err) {
                    return Err(err);
                }

                let wait = jittered_delay(delay, config.jitter_factor);
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                }
                delay = next_delay(delay, config.multiplier, config.max_delay);
            }
        }
    }

    unreachable!("loop always returns on the final iteration")
}

const ONE_SHOT_AUTH_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Like [`execute`], but gives a single extra attempt on `InvalidApiKey`
/// after a fixed ~500ms+jitter wait. 401s are outside the general retryable
/// status set (a persistently bad key should not be retried `max_retries`
/// times), but some backends issue a spurious 401 on a freshly rotated key
/// propagating through their edge, so exactly one extra attempt is worth it.
pub async fn execute_with_auth_retry<F, Fut, T>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    match execute(config, cancel, &mut operation).await {
        Err(ProviderError::InvalidApiKey) => {
            let wait = jittered_delay(ONE_SHOT_AUTH_RETRY_DELAY, config.jitter_factor);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            }
            operation().await
        }
        other => other,
    }
}
