//! Timeout Wrapper (C5, spec.md §4.4).
//!
//! A wall-clock deadline around an async call. Never swallows the distinction
//! between "timed out" and "succeeded/failed" — the caller (the planner)
//! decides what to do next.

use std::future::Future;
use std::time::Duration;

pub struct Elapsed;

pub async fn with_timeout<F, T>(duration: Duration, fut: F) -> Result<T, Elapsed>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, fut).await.map_err(|_| Elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn returns_ok_when_future_completes_in_time() {
        let result = with_timeout(Duration::from_millis(50), async { 42 }).await;
        assert_eq!(result.ok(), Some(42));
    }

    #[tokio::test]
    async fn returns_err_when_future_is_too_slow() {
        let result = with_timeout(Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            42
        })
        .await;
        assert!(result.is_err());
    }
}
