// Prometheus-style metrics (§6 `/metrics`): per-stage latency histograms,
// decision counts by kind, circuit state, rate-limiter saturation. Grounded
// directly on the pack's `otel.rs` — a small `DashMap`-backed accumulator
// and a manual Prometheus text exposition, no metrics crate dependency.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use std::collections::HashMap;

use crate::guards::{CircuitState, ResourceGuards};

pub struct Metrics {
    pub decisions_approve: AtomicU64,
    pub decisions_review: AtomicU64,
    pub decisions_block: AtomicU64,
    pub agents_invoked: AtomicU64,
    pub agents_failed: AtomicU64,
    pub agents_skipped_rate_limit: AtomicU64,
    pub duplicates_collapsed: AtomicU64,
    pub events_processed: AtomicU64,
    stage_latency_ms: Mutex<HashMap<&'static str, (f64, u64)>>, // (sum, count)
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            decisions_approve: AtomicU64::new(0),
            decisions_review: AtomicU64::new(0),
            decisions_block: AtomicU64::new(0),
            agents_invoked: AtomicU64::new(0),
            agents_failed: AtomicU64::new(0),
            agents_skipped_rate_limit: AtomicU64::new(0),
            duplicates_collapsed: AtomicU64::new(0),
            events_processed: AtomicU64::new(0),
            stage_latency_ms: Mutex::new(HashMap::new()),
        }
    }
}

impl Metrics {
    pub fn record_decision(&self, decision: crate::events::Decision) {
        match decision {
            crate::events::Decision::Approve => self.decisions_approve.fetch_add(1, Ordering::Relaxed),
            crate::events::Decision::ManualReview => self.decisions_review.fetch_add(1, Ordering::Relaxed),
            crate::events::Decision::Block => self.decisions_block.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_stage_latency(&self, stage: &'static str, ms: f64) {
        let mut map = self.stage_latency_ms.lock();
        let entry = map.entry(stage).or_insert((0.0, 0));
        entry.0 += ms;
        entry.1 += 1;
    }

    pub fn prometheus_text(&self, guards: &ResourceGuards) -> String {
        let mut out = String::new();
        macro_rules! counter {
            ($name:expr, $help:expr, $val:expr) => {
                out.push_str(&format!("# HELP {} {}\n# TYPE {} counter\n{} {}\n", $name, $help, $name, $name, $val));
            };
        }

        counter!("fraud_decisions_approve_total", "decisions resulting in APPROVE", self.decisions_approve.load(Ordering::Relaxed));
        counter!("fraud_decisions_review_total", "decisions resulting in MANUAL_REVIEW", self.decisions_review.load(Ordering::Relaxed));
        counter!("fraud_decisions_block_total", "decisions resulting in BLOCK", self.decisions_block.load(Ordering::Relaxed));
        counter!("fraud_agents_invoked_total", "events escalated to agent investigation", self.agents_invoked.load(Ordering::Relaxed));
        counter!("fraud_agents_failed_total", "agent runs that transitioned to FAILED", self.agents_failed.load(Ordering::Relaxed));
        counter!("fraud_agents_skipped_rate_limit_total", "agent escalations skipped due to rate-limiter saturation", self.agents_skipped_rate_limit.load(Ordering::Relaxed));
        counter!("fraud_duplicates_collapsed_total", "duplicate order_ids collapsed to the prior decision", self.duplicates_collapsed.load(Ordering::Relaxed));
        counter!("fraud_events_processed_total", "events that entered the pipeline", self.events_processed.load(Ordering::Relaxed));

        out.push_str("# HELP fraud_stage_latency_ms_avg mean latency per pipeline stage\n# TYPE fraud_stage_latency_ms_avg gauge\n");
        for (stage, (sum, count)) in self.stage_latency_ms.lock().iter() {
            let avg = if *count > 0 { sum / *count as f64 } else { 0.0 };
            out.push_str(&format!("fraud_stage_latency_ms_avg{{stage=\"{stage}\"}} {avg:.3}\n"));
        }

        out.push_str("# HELP fraud_circuit_state circuit breaker state (0=closed,1=half_open,2=open)\n# TYPE fraud_circuit_state gauge\n");
        for (name, state) in guards.state_snapshot() {
            let v = match state {
                CircuitState::Closed => 0,
                CircuitState::HalfOpen => 1,
                CircuitState::Open => 2,
            };
            out.push_str(&format!("fraud_circuit_state{{collaborator=\"{name}\"}} {v}\n"));
        }

        out.push_str("# HELP fraud_llm_rate_limiter_saturated 1 if the LLM rate limiter currently has no tokens available\n# TYPE fraud_llm_rate_limiter_saturated gauge\n");
        out.push_str(&format!("fraud_llm_rate_limiter_saturated {}\n", guards.llm_rate_limiter.is_saturated() as u8));

        out
    }
}
