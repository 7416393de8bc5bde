use std::future::Future;
use std::time::Duration;

use rand::Rng as _;
use serde::Deserialize;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{Result, SwapError};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    #[serde(with = "crate::config::duration_ms")]
    pub timeout: Duration,
    pub max_retries: usize,
    #[serde(with = "crate::config::duration_ms")]
    pub base_delay: Duration,
    #[serde(with = "crate::config::duration_ms")]
    pub max_delay: Duration,
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(10_000),
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            jitter_ms: 250,
        }
    }
}

/// Runs `action` with a per-attempt timeout, retrying while `is_transient`
/// accepts the error. Cancellation stops both the attempt and the backoff.
pub async fn retry_with_timeout<T, F, Fut>(
    label: &'static str,
    config: &RetryConfig,
    cancel: &CancellationToken,
    is_transient: impl Fn(&SwapError) -> bool,
    mut action: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = config.max_retries.saturating_add(1);
    for attempt in 0..attempts {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SwapError::Cancelled),
            r = timeout(config.timeout, action()) => r,
        };
        match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => {
                if attempt + 1 >= attempts || !is_transient(&err) {
                    return Err(err);
                }
                warn!(attempt = attempt + 1, error = %err, "{label} failed; retrying");
            }
            Err(_) => {
                if attempt + 1 >= attempts {
                    return Err(SwapError::Timeout(label.to_string()));
                }
                warn!(attempt = attempt + 1, "{label} timed out; retrying");
            }
        }

        let backoff = config
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt as u32));
        let capped = std::cmp::min(backoff, config.max_delay);
        let jitter = if config.jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=config.jitter_ms))
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SwapError::Cancelled),
            _ = sleep(capped + jitter) => {}
        }
    }

    Err(SwapError::Timeout(format!("{label}: retries exhausted")))
}
