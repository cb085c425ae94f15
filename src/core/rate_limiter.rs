//! Rate Limiter (C7, spec.md §4.6).
//!
//! Sliding-window admission control keyed by user id (falling back to peer
//! IP). Backed by `DashMap` for lock-free per-key access, the same
//! concurrency pattern this codebase already uses for per-cluster connection
//! pools (`MySQLPoolManager`) — here a key owns a timestamp deque instead of
//! a connection pool.

use crate::config::RateLimitConfig;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config, windows: DashMap::new() }
    }

    /// Drops timestamps older than the window, then admits if the remaining
    /// count is under the limit. On rejection, `retry_after` is the number of
    /// seconds until the oldest timestamp in the window ages out.
    pub fn check(&self, key: &str) -> Result<(), u64> {
        let now = Instant::now();
        let window = Duration::from_secs(self.config.window_seconds);

        let mut entry = self.windows.entry(key.to_string()).or_default();
        while entry.front().map(|t| now.duration_since(*t) >= window).unwrap_or(false) {
            entry.pop_front();
        }

        if entry.len() as u32 >= self.config.max_requests {
            let oldest = *entry.front().expect("non-empty once at limit");
            let retry_after = window.saturating_sub(now.duration_since(oldest));
            return Err(retry_after.as_secs().max(1));
        }

        entry.push_back(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_requests_under_the_limit() {
        let limiter = RateLimiter::new(RateLimitConfig { max_requests: 2, window_seconds: 60 });
        assert!(limiter.check("user-1").is_ok());
        assert!(limiter.check("user-1").is_ok());
    }

    #[test]
    fn rejects_the_101st_request_with_a_positive_retry_after() {
        let limiter = RateLimiter::new(RateLimitConfig { max_requests: 100, window_seconds: 60 });
        for _ in 0..100 {
            limiter.check("user-1").unwrap();
        }
        let result = limiter.check("user-1");
        assert!(result.is_err());
        assert!(result.unwrap_err() > 0);
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new(RateLimitConfig { max_requests: 1, window_seconds: 60 });
        assert!(limiter.check("user-1").is_ok());
        assert!(limiter.check("user-2").is_ok());
        assert!(limiter.check("user-1").is_err());
    }
}
