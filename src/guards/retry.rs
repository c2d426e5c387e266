// Retry handler (§4.7): exponential backoff with jitter. base 0.5s, factor
// 2, max 5 attempts, cap 10s. Only retries `TransientIo` — every other
// error kind is returned immediately.
//
// Jitter is derived from a cheap local xorshift PRNG seeded off the
// monotonic clock rather than pulling in a `rand` dependency the workspace
// doesn't otherwise need.

use std::future::Future;
use std::time::{Duration, Instant};

use crate::errors::FraudError;

pub struct RetryHandler {
    base_ms: u64,
    factor: u32,
    max_attempts: u32,
    cap_ms: u64,
}

impl RetryHandler {
    pub fn new(base_ms: u64, factor: u32, max_attempts: u32, cap_ms: u64) -> Self {
        Self { base_ms, factor, max_attempts, cap_ms }
    }

    fn jitter_fraction(attempt: u32) -> f64 {
        let seed = Instant::now().elapsed().as_nanos() as u64 ^ (attempt as u64).wrapping_mul(0x9E3779B97F4A7C15);
        let mut x = seed | 1;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        (x % 1000) as f64 / 1000.0
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let raw_ms = (self.base_ms as f64) * (self.factor as f64).powi(attempt as i32);
        let capped = raw_ms.min(self.cap_ms as f64);
        let jittered = capped * (0.5 + 0.5 * Self::jitter_fraction(attempt));
        Duration::from_millis(jittered as u64)
    }

    pub async fn run<F, Fut, T>(&self, mut op: F) -> Result<T, FraudError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FraudError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt + 1 < self.max_attempts => {
                    tokio::time::sleep(self.delay_for(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let handler = RetryHandler::new(1, 2, 5, 10);
        let attempts = AtomicU32::new(0);
        let result = handler
            .run(|| {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(FraudError::TransientIo("timeout".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_non_transient_errors() {
        let handler = RetryHandler::new(1, 2, 5, 10);
        let attempts = AtomicU32::new(0);
        let result: Result<(), FraudError> = handler
            .run(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async move { Err(FraudError::InvalidEvent("bad".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
