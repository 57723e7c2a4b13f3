//! Bounded polling.
//!
//! External tools give no completion signal beyond "the file is there now" or
//! "the spinner is gone now", so every such wait is a poll loop with a hard
//! deadline. Nothing in this crate waits unboundedly.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Poll `check` until it returns `true` or `timeout` elapses.
///
/// The check is always evaluated at least once, and once more at the
/// deadline, so a zero timeout degenerates to a single check.
/// Returns the last check result.
pub async fn poll_until<F, Fut>(timeout: Duration, interval: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        sleep(interval.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn zero_timeout_checks_once() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let ok = poll_until(Duration::ZERO, Duration::from_millis(5), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            false
        })
        .await;
        assert!(!ok);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn returns_once_check_succeeds() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let ok = poll_until(Duration::from_secs(5), Duration::from_millis(1), move || async move {
            calls.fetch_add(1, Ordering::SeqCst) >= 2
        })
        .await;
        assert!(ok);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
