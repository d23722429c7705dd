use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cancel::CancellationState;
use crate::error::ApiError;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries allowed for timeouts, network and server errors
    pub retry_budget: u32,
    /// Rate-limit pauses tolerated before giving up on a call
    pub max_rate_limit_waits: u32,
    /// Pause used when a rate-limit response carries no delay
    pub rate_limit_backoff: Duration,
    /// Base delay for exponential backoff
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Upper bound for a single attempt
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_budget: 3,
            max_rate_limit_waits: 20,
            rate_limit_backoff: Duration::from_secs(30),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            call_timeout: Duration::from_secs(15),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, retries: u32) -> Duration {
        let factor = 2_u32.saturating_pow(retries);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Shared pause point: once any caller sees a rate limit, every caller
/// waits until the service is ready again.
#[derive(Debug, Default)]
pub struct RateLimitGate {
    resume_at: Mutex<Option<Instant>>,
}

impl RateLimitGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extend the pause to at least `delay` from now.
    pub fn pause(&self, delay: Duration) {
        let until = Instant::now() + delay;
        let mut resume_at = self.resume_at.lock().unwrap_or_else(|e| e.into_inner());
        if resume_at.is_none_or(|current| current < until) {
            *resume_at = Some(until);
        }
    }

    pub async fn wait(&self, cancel: &CancellationState) -> Result<(), ApiError> {
        loop {
            let resume_at = *self.resume_at.lock().unwrap_or_else(|e| e.into_inner());
            match resume_at {
                Some(until) if until > Instant::now() => {
                    cancel.sleep(until - Instant::now()).await?;
                }
                _ => return Ok(()),
            }
        }
    }
}

/// Execute an async call, retrying transient failures.
///
/// Rate limits pause the shared gate and do not consume the retry budget;
/// fatal and permanent errors are returned at once. When a budget runs out
/// the last error is returned.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    gate: &RateLimitGate,
    cancel: &CancellationState,
    operation_name: &str,
    mut operation: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut retries = 0;
    let mut rate_limit_waits = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(cancel.cancelled_error());
        }
        gate.wait(cancel).await?;

        let res = match tokio::time::timeout(policy.call_timeout, operation()).await {
            Ok(res) => res,
            Err(_) => Err(ApiError::Timeout),
        };

        match res {
            Ok(value) => return Ok(value),
            Err(ApiError::RateLimited { retry_after }) => {
                if rate_limit_waits >= policy.max_rate_limit_waits {
                    warn!(
                        "{} still rate limited after {} pauses, giving up",
                        operation_name, rate_limit_waits
                    );
                    return Err(ApiError::RateLimited { retry_after });
                }
                let delay = retry_after.unwrap_or(policy.rate_limit_backoff);
                warn!("{} rate limited, pausing requests for {:?}", operation_name, delay);
                gate.pause(delay);
                rate_limit_waits += 1;
            }
            Err(e) if e.is_retryable() => {
                if retries >= policy.retry_budget {
                    warn!(
                        "{} failed after {} retries: {}",
                        operation_name, retries, e
                    );
                    return Err(e);
                }
                let delay = policy.backoff(retries);
                debug!(
                    "{} failed ({}), retry {} of {} in {:?}",
                    operation_name,
                    e,
                    retries + 1,
                    policy.retry_budget,
                    delay
                );
                cancel.sleep(delay).await?;
                retries += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
