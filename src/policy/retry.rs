// Dial Retry - Decide whether and when to retry a failed connection attempt

use crate::transport::TransportError;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Strategy consulted after each failed connection attempt.
///
/// `attempt` counts from 1 (the attempt that just failed). Returning `None`
/// stops the retry loop and surfaces `error` to the caller.
pub trait DialPolicy: Send + Sync {
    fn next_delay(&self, attempt: u32, elapsed: Duration, error: &TransportError) -> Option<Duration>;
}

// ============================================================================
// CONSTANT BACKOFF
// ============================================================================

/// Fixed delay between attempts, retrying until cancelled
#[derive(Clone, Debug)]
pub struct ConstantBackoff {
    delay: Duration,
}

impl ConstantBackoff {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for ConstantBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl DialPolicy for ConstantBackoff {
    fn next_delay(&self, _attempt: u32, _elapsed: Duration, error: &TransportError) -> Option<Duration> {
        error.is_retryable().then_some(self.delay)
    }
}

// ============================================================================
// EXPONENTIAL BACKOFF
// ============================================================================

/// Delay multiplied by `factor` after each failure, capped at `max`
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    pub initial: Duration,
    pub max: Duration,
    pub factor: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(30),
            factor: 2,
        }
    }
}

impl DialPolicy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32, _elapsed: Duration, error: &TransportError) -> Option<Duration> {
        if !error.is_retryable() {
            return None;
        }
        let exponent = attempt.saturating_sub(1).min(31);
        let multiplier = self.factor.max(1).saturating_pow(exponent);
        Some(self.initial.saturating_mul(multiplier).min(self.max))
    }
}

// ============================================================================
// MAX ATTEMPTS
// ============================================================================

/// Caps another policy at a fixed number of attempts
#[derive(Clone, Debug)]
pub struct MaxAttempts<P> {
    inner: P,
    max_attempts: u32,
}

impl<P: DialPolicy> MaxAttempts<P> {
    pub fn new(inner: P, max_attempts: u32) -> Self {
        Self { inner, max_attempts }
    }
}

impl<P: DialPolicy> DialPolicy for MaxAttempts<P> {
    fn next_delay(&self, attempt: u32, elapsed: Duration, error: &TransportError) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        self.inner.next_delay(attempt, elapsed, error)
    }
}

// ============================================================================
// RETRY LOOP
// ============================================================================

/// Run `attempt_fn` until it succeeds, the policy gives up, or `cancel` fires.
///
/// Cancellation is observed before each attempt and while waiting between
/// attempts; an attempt already in progress runs to completion.
pub async fn retry<T, F, Fut>(
    policy: &dyn DialPolicy,
    cancel: &CancellationToken,
    mut attempt_fn: F,
) -> Result<T, TransportError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let started = Instant::now();
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        attempt = attempt.saturating_add(1);
        let error = match attempt_fn(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        let Some(delay) = policy.next_delay(attempt, started.elapsed(), &error) else {
            return Err(error);
        };
        debug!(attempt, ?delay, %error, "connection attempt failed, retrying");

        tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
