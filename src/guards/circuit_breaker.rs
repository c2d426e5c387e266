// Circuit breaker (§4.7), one per external collaborator. Grounded on the
// pack's `CircuitBreaker`/`CircuitState` state machine: CLOSED -> OPEN after
// `k` consecutive failures -> HALF_OPEN after a cooldown -> CLOSED on first
// success in HALF_OPEN, back to OPEN on failure.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: Mutex<CircuitState>,
    consecutive_failures: AtomicU32,
    opened_at: Mutex<Option<Instant>>,
    failure_threshold: u32,
    cooldown: Duration,
    total_trips: AtomicU64,
}

/// Cheaply cloneable handle sharing one underlying state machine — clones
/// all refer to the same breaker, the way a `DashMap` entry is looked up
/// fresh on every call but needs to observe the same counters.
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<Inner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown_secs: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(CircuitState::Closed),
                consecutive_failures: AtomicU32::new(0),
                opened_at: Mutex::new(None),
                failure_threshold,
                cooldown: Duration::from_secs(cooldown_secs),
                total_trips: AtomicU64::new(0),
            }),
        }
    }

    /// Call before attempting the guarded operation. Transitions OPEN ->
    /// HALF_OPEN once the cooldown has elapsed.
    pub fn allow(&self) -> bool {
        let mut state = self.inner.state.lock();
        match *state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = self
                    .inner
                    .opened_at
                    .lock()
                    .map(|at| at.elapsed())
                    .unwrap_or_default();
                if elapsed >= self.inner.cooldown {
                    *state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        self.inner.consecutive_failures.store(0, Ordering::Relaxed);
        *self.inner.state.lock() = CircuitState::Closed;
        *self.inner.opened_at.lock() = None;
    }

    pub fn record_failure(&self) {
        let mut state = self.inner.state.lock();
        match *state {
            CircuitState::HalfOpen => {
                *state = CircuitState::Open;
                *self.inner.opened_at.lock() = Some(Instant::now());
                self.inner.total_trips.fetch_add(1, Ordering::Relaxed);
            }
            CircuitState::Closed => {
                let n = self.inner.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if n >= self.inner.failure_threshold {
                    *state = CircuitState::Open;
                    *self.inner.opened_at.lock() = Some(Instant::now());
                    self.inner.total_trips.fetch_add(1, Ordering::Relaxed);
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        *self.inner.state.lock()
    }

    pub fn total_trips(&self) -> u64 {
        self.inner.total_trips.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_k_consecutive_failures() {
        let cb = CircuitBreaker::new(3, 30);
        for _ in 0..2 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn half_open_closes_on_first_success() {
        let cb = CircuitBreaker::new(1, 0);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.allow()); // cooldown is 0s, transitions to half-open
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn open_short_circuits_before_cooldown() {
        let cb = CircuitBreaker::new(1, 30);
        cb.record_failure();
        assert!(!cb.allow());
    }
}
