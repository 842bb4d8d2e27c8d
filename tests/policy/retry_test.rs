// Dial Retry Tests
// The retry loop against a scripted connection attempt

use gossipmesh::policy::{retry, ConstantBackoff, DialPolicy, ExponentialBackoff, MaxAttempts};
use gossipmesh::transport::TransportError;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

fn refused() -> TransportError {
    TransportError::ConnectionFailed("connection refused".to_string())
}

// ============================================================================
// POLICIES
// ============================================================================

#[test]
fn test_max_attempts_caps_inner_policy() {
    let policy = MaxAttempts::new(ConstantBackoff::new(Duration::from_millis(5)), 3);

    assert!(policy.next_delay(1, Duration::ZERO, &refused()).is_some());
    assert!(policy.next_delay(2, Duration::ZERO, &refused()).is_some());
    assert!(policy.next_delay(3, Duration::ZERO, &refused()).is_none());
}

#[test]
fn test_lost_arbitration_is_not_retried() {
    let policy = ConstantBackoff::default();
    assert!(policy
        .next_delay(1, Duration::ZERO, &TransportError::ConnectionExists)
        .is_none());
}

#[test]
fn test_exponential_backoff_grows() {
    let policy = ExponentialBackoff::default();
    let first = policy.next_delay(1, Duration::ZERO, &TransportError::Timeout).unwrap();
    let third = policy.next_delay(3, Duration::ZERO, &TransportError::Timeout).unwrap();
    assert_eq!(third, first * 4);
}

// ============================================================================
// RETRY LOOP
// ============================================================================

#[tokio::test]
async fn test_retry_succeeds_after_failures() {
    let policy = ConstantBackoff::new(Duration::from_millis(5));
    let cancel = CancellationToken::new();
    let calls = Arc::new(AtomicU32::new(0));

    let counter = calls.clone();
    let result = retry(&policy, &cancel, move |attempt| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            if attempt < 3 {
                Err(refused())
            } else {
                Ok(attempt)
            }
        }
    })
    .await;

    assert_eq!(result, Ok(3));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retry_surfaces_last_error_when_policy_gives_up() {
    let policy = MaxAttempts::new(ConstantBackoff::new(Duration::from_millis(1)), 2);
    let cancel = CancellationToken::new();

    let result: Result<(), _> = retry(&policy, &cancel, |attempt| async move {
        Err(TransportError::ConnectionFailed(format!("attempt {}", attempt)))
    })
    .await;

    assert_eq!(result, Err(TransportError::ConnectionFailed("attempt 2".to_string())));
}

#[tokio::test]
async fn test_retry_stops_on_non_retryable_error() {
    let policy = ConstantBackoff::new(Duration::from_millis(1));
    let cancel = CancellationToken::new();
    let calls = AtomicU32::new(0);

    let result: Result<(), _> = retry(&policy, &cancel, |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err(TransportError::ConnectionExists) }
    })
    .await;

    assert_eq!(result, Err(TransportError::ConnectionExists));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancellation_interrupts_backoff() {
    let policy = ConstantBackoff::new(Duration::from_secs(60));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result: Result<(), _> = retry(&policy, &cancel, |_| async { Err(refused()) }).await;

    assert_eq!(result, Err(TransportError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_cancelled_token_prevents_any_attempt() {
    let policy = ConstantBackoff::default();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let calls = AtomicU32::new(0);

    let result: Result<(), _> = retry(&policy, &cancel, |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err(refused()) }
    })
    .await;

    assert_eq!(result, Err(TransportError::Cancelled));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
