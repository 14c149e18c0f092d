/*!
 * Tests for the retry policy and cancellation tokens
 */

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use videoscribe::cancel::CancellationToken;
use videoscribe::retry::RetryPolicy;

#[test]
fn test_run_withAlwaysFailing_shouldUseWholeBudget() {
    let calls = Arc::new(AtomicU32::new(0));
    let policy = RetryPolicy::immediate(4);

    let result: Result<(), (String, u32)> = tokio_test::block_on(policy.run(
        "always failing",
        |_| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("connection reset".to_string())
            }
        },
        |_| true,
    ));

    assert_eq!(result, Err(("connection reset".to_string(), 4)));
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[test]
fn test_run_shouldPassAttemptNumbers() {
    let policy = RetryPolicy::immediate(3);
    let result: Result<u32, (String, u32)> = tokio_test::block_on(policy.run(
        "counting",
        |attempt| async move {
            if attempt < 3 {
                Err(format!("attempt {}", attempt))
            } else {
                Ok(attempt)
            }
        },
        |_| true,
    ));
    assert_eq!(result, Ok(3));
}

#[test]
fn test_new_withZeroAttempts_shouldStillTryOnce() {
    let policy = RetryPolicy::new(0, Duration::from_millis(10), Duration::from_millis(10));
    assert_eq!(policy.max_attempts, 1);
    assert!(!policy.has_attempts_left(1));
}

#[test]
fn test_backoffFor_withLargeAttempt_shouldNotOverflow() {
    let policy = RetryPolicy::new(100, Duration::from_secs(2), Duration::from_secs(30));
    assert_eq!(policy.backoff_for(64), Duration::from_secs(30));
}

#[tokio::test]
async fn test_childWithTimeout_shouldKeepEarlierDeadline() {
    let parent = CancellationToken::with_timeout(Duration::from_millis(20));
    let child = parent.child_with_timeout(Duration::from_secs(60));
    assert_eq!(child.deadline(), parent.deadline());

    tokio::time::timeout(Duration::from_secs(2), child.cancelled())
        .await
        .expect("child should expire with its parent");
    assert!(child.is_cancelled());
}

#[tokio::test]
async fn test_cancel_onChild_shouldCancelParent() {
    let parent = CancellationToken::new();
    let child = parent.child_with_timeout(Duration::from_secs(60));
    child.cancel();
    assert!(parent.is_cancelled());
}
