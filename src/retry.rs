//! Bounded retry with exponential backoff and a growing per-attempt timeout.

use anyhow::{anyhow, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::telegram::{Channel, ChannelError, MediaRequest};

/// Errors that may succeed on a later attempt.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    /// Timeout of the first attempt; attempt `n` gets `n` times this.
    pub base_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            base_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based): 1x, 2x, 4x, ...
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff * 2u32.saturating_pow(attempt.saturating_sub(1).min(16))
    }

    pub fn timeout(&self, attempt: u32) -> Duration {
        self.base_timeout * attempt.max(1)
    }
}

/// Result of one publish attempt cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Delivered { attempts: u32 },
    /// Gave up for this cycle; the item stays queued.
    Failed { attempts: u32, error: String },
}

/// Send `request` through `channel`, rewinding every file handle before each
/// attempt.
pub async fn deliver(
    policy: &RetryPolicy,
    channel: &dyn Channel,
    request: &mut MediaRequest,
) -> Delivery {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = match request.rewind().await {
            Ok(()) => {
                let limit = policy.timeout(attempt);
                match tokio::time::timeout(limit, channel.send_media(request)).await {
                    Ok(res) => res,
                    Err(_) => Err(ChannelError::Timeout(limit)),
                }
            }
            Err(err) => Err(ChannelError::Io(err)),
        };
        match result {
            Ok(()) => {
                if attempt > 1 {
                    info!(attempts = attempt, "delivery succeeded after retry");
                }
                return Delivery::Delivered { attempts: attempt };
            }
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    error = %err,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "delivery failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                error!(error = %err, attempts = attempt, "delivery failed");
                return Delivery::Failed {
                    attempts: attempt,
                    error: err.to_string(),
                };
            }
        }
    }
}

/// Retry an archive-side operation. Every error counts as transient.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let limit = policy.timeout(attempt);
        let result = match tokio::time::timeout(limit, op()).await {
            Ok(res) => res,
            Err(_) => Err(anyhow!("{what} timed out after {limit:?}")),
        };
        match result {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(?err, attempt, what, "operation failed, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err.context(format!("{what} failed after {attempt} attempts"))),
        }
    }
}
