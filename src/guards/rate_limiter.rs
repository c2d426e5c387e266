// Token-bucket rate limiter (§4.7), one instance per LLM provider.
// Re-derived from the pack's sliding-window middleware limiter into a
// token-bucket shape since that's the contract the spec actually wants:
// a capacity refilled continuously at `max_per_min / 60` tokens/sec, plus
// a hard minimum gap between any two calls. Excess calls cooperatively
// wait (no lock held across the wait) up to `max_wait_secs`; beyond that
// the call fails with `RateLimited`.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::time::sleep;

use crate::errors::FraudError;

struct State {
    tokens: f64,
    last_refill: Instant,
    last_call: Option<Instant>,
}

pub struct TokenBucketLimiter {
    capacity: f64,
    refill_per_sec: f64,
    min_gap: Duration,
    max_wait: Duration,
    state: Mutex<State>,
}

impl TokenBucketLimiter {
    pub fn new(max_per_min: u32, min_gap_secs: f64, max_wait_secs: f64) -> Self {
        let capacity = max_per_min.max(1) as f64;
        Self {
            capacity,
            refill_per_sec: capacity / 60.0,
            min_gap: Duration::from_secs_f64(min_gap_secs.max(0.0)),
            max_wait: Duration::from_secs_f64(max_wait_secs.max(0.0)),
            state: Mutex::new(State { tokens: capacity, last_refill: Instant::now(), last_call: None }),
        }
    }

    fn refill(state: &mut State, capacity: f64, refill_per_sec: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * refill_per_sec).min(capacity);
        state.last_refill = now;
    }

    /// Acquires a slot, cooperatively waiting for both the refill and the
    /// minimum inter-call gap. Returns `RateLimited` if the cumulative wait
    /// would exceed `max_wait_secs`.
    pub async fn acquire(&self) -> Result<(), FraudError> {
        let mut waited = Duration::ZERO;
        loop {
            let wait = {
                let mut state = self.state.lock();
                Self::refill(&mut state, self.capacity, self.refill_per_sec);

                let gap_wait = state
                    .last_call
                    .map(|last| self.min_gap.saturating_sub(last.elapsed()))
                    .unwrap_or(Duration::ZERO);

                let token_wait = if state.tokens >= 1.0 {
                    Duration::ZERO
                } else {
                    Duration::from_secs_f64((1.0 - state.tokens) / self.refill_per_sec.max(1e-9))
                };

                let needed = gap_wait.max(token_wait);
                if needed == Duration::ZERO {
                    state.tokens -= 1.0;
                    state.last_call = Some(Instant::now());
                    return Ok(());
                }
                needed
            };

            if waited + wait > self.max_wait {
                return Err(FraudError::RateLimited);
            }
            sleep(wait).await;
            waited += wait;
        }
    }

    /// Non-blocking check used by the back-pressure path (§5): if the
    /// limiter is currently saturated, agent escalation is skipped rather
    /// than cooperatively waiting.
    pub fn is_saturated(&self) -> bool {
        let mut state = self.state.lock();
        Self::refill(&mut state, self.capacity, self.refill_per_sec);
        state.tokens < 1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquires_immediately_when_tokens_available() {
        let limiter = TokenBucketLimiter::new(20, 0.0, 30.0);
        assert!(limiter.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn enforces_minimum_inter_call_gap() {
        let limiter = TokenBucketLimiter::new(1000, 0.05, 5.0);
        let t0 = Instant::now();
        limiter.acquire().await.unwrap();
        limiter.acquire().await.unwrap();
        assert!(t0.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn fails_fast_when_wait_would_exceed_budget() {
        let limiter = TokenBucketLimiter::new(1, 0.0, 0.01);
        limiter.acquire().await.unwrap();
        // bucket now empty; refilling 1 token takes 60s, far beyond the 10ms budget
        let result = limiter.acquire().await;
        assert!(matches!(result, Err(FraudError::RateLimited)));
    }
}
