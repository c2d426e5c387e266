pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use rate_limiter::TokenBucketLimiter;
pub use retry::RetryHandler;

/// The external collaborators each get their own circuit breaker (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collaborator {
    Memory,
    Kb,
    Ml,
    Bus,
    Db,
    Llm,
}

impl Collaborator {
    pub fn name(self) -> &'static str {
        match self {
            Collaborator::Memory => "memory",
            Collaborator::Kb => "kb",
            Collaborator::Ml => "ml",
            Collaborator::Bus => "bus",
            Collaborator::Db => "db",
            Collaborator::Llm => "llm",
        }
    }
}

/// One circuit breaker per external collaborator, looked up by name.
pub struct ResourceGuards {
    breakers: dashmap::DashMap<&'static str, CircuitBreaker>,
    pub llm_rate_limiter: TokenBucketLimiter,
    pub retry: RetryHandler,
}

impl ResourceGuards {
    pub fn new(cfg: &crate::config::Config) -> Self {
        let breakers = dashmap::DashMap::new();
        for c in [
            Collaborator::Memory,
            Collaborator::Kb,
            Collaborator::Ml,
            Collaborator::Bus,
            Collaborator::Db,
            Collaborator::Llm,
        ] {
            breakers.insert(
                c.name(),
                CircuitBreaker::new(cfg.circuit_failure_threshold, cfg.circuit_cooldown_secs),
            );
        }
        Self {
            breakers,
            llm_rate_limiter: TokenBucketLimiter::new(
                cfg.max_ai_requests_per_min,
                cfg.ai_request_delay_secs,
                cfg.ai_max_wait_secs,
            ),
            retry: RetryHandler::new(cfg.retry_base_ms, cfg.retry_factor, cfg.retry_max_attempts, cfg.retry_cap_ms),
        }
    }

    pub fn breaker(&self, c: Collaborator) -> CircuitBreaker {
        self.breakers.get(c.name()).expect("breaker registered at startup").clone()
    }

    /// Snapshot used by the `/health` and `/metrics` surfaces.
    pub fn all_closed_or_half_open(&self) -> bool {
        self.breakers.iter().all(|entry| !matches!(entry.state(), CircuitState::Open))
    }

    pub fn state_snapshot(&self) -> Vec<(&'static str, CircuitState)> {
        self.breakers.iter().map(|e| (*e.key(), e.state())).collect()
    }
}
