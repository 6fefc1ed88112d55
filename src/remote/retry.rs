//! Bounded retry over unreliable remote calls.
//!
//! Wraps reads, cancels and other confirmed-idempotent calls. Raw order
//! placement is never wrapped here — a placement failure must surface to the
//! caller rather than risk a duplicate fill.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::config::RetryConfig;
use crate::error::{LegworkError, Result};

/// Retry budget and pacing for one wrapped call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_millis(500),
            backoff: false,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            delay: config.delay(),
            backoff: config.backoff,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        if self.backoff {
            // attempt is 1-based; double after each failure
            self.delay * 2u32.saturating_pow(attempt.saturating_sub(1))
        } else {
            self.delay
        }
    }
}

/// Run `op` until it succeeds, it fails non-transiently, or the attempt
/// budget is exhausted. Only errors classified transient by
/// `LegworkError::is_transient` are retried; business rejections surface
/// immediately. Exhaustion fails with `RemoteExhausted` carrying the last
/// error.
pub async fn with_retry<T, F, Fut>(mut op: F, policy: &RetryPolicy) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) if attempts >= policy.max_attempts => {
                return Err(LegworkError::RemoteExhausted {
                    attempts,
                    source: Box::new(e),
                });
            }
            Err(e) => {
                let delay = policy.delay_for(attempts);
                warn!(
                    attempt = attempts,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient remote failure, retrying"
                );
                sleep(delay).await;
            }
        }
    }
}
