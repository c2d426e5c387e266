// The Fraud Orchestrator (§4.1): drives each event through the fixed
// pipeline order, fuses signals, triages, optionally escalates to agents,
// applies overrides, and persists the result. This is the leaf-most
// consumer of every other component, matching the dependency order in §2.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, warn};

use crate::agents::llm_client::LlmClient;
use crate::agents::runtime::{AgentOutcome, AgentRuntime, AgentState};
use crate::config::Config;
use crate::detectors::ml::MlDetector;
use crate::detectors::velocity;
use crate::engine::fusion::{self, SignalInputs, Triage};
use crate::errors::FraudError;
use crate::events::{
    AgentTrace, AgentTraceStatus, ContributingFactor, Decision, DecisionRecord, FlagReason,
    FraudPatternMeta, PatternSource, Severity, TransactionEvent,
};
use crate::guards::{Collaborator, ResourceGuards};
use crate::state::persistence::{PendingWrite, Persistence};
use crate::state::MemoryStore;
use crate::vector_kb::VectorKb;

pub struct Orchestrator {
    pub config: Arc<Config>,
    pub memory: Arc<MemoryStore>,
    pub kb: Arc<VectorKb>,
    pub ml: Arc<MlDetector>,
    pub guards: Arc<ResourceGuards>,
    pub llm: Arc<LlmClient>,
    pub metrics: Arc<crate::metrics::Metrics>,
    pub persistence: Arc<Persistence>,
}

pub struct ProcessOutcome {
    pub record: DecisionRecord,
    pub is_duplicate: bool,
}

impl Orchestrator {
    pub async fn process(&self, event: TransactionEvent) -> Result<ProcessOutcome, FraudError> {
        let pipeline_deadline = Duration::from_secs(self.config.deadline_pipeline_secs);
        tokio::time::timeout(pipeline_deadline, self.process_inner(event))
            .await
            .unwrap_or_else(|_| {
                Err(FraudError::TransientIo("pipeline deadline exceeded".to_string()))
            })
    }

    async fn process_inner(&self, event: TransactionEvent) -> Result<ProcessOutcome, FraudError> {
        let started = Instant::now();
        self.metrics.events_processed.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        if let Err(reason) = validate(&event) {
            let record = self.invalid_event_record(&event, reason);
            self.memory.record_decision(&event.order_id, record.clone(), event.timestamp);
            return Ok(ProcessOutcome { record, is_duplicate: false });
        }

        // Idempotency (§5): duplicate order_id returns the prior record.
        if let Some(prior) = self.memory.prior_decision(&event.order_id, event.timestamp) {
            self.metrics.duplicates_collapsed.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return Ok(ProcessOutcome { record: prior, is_duplicate: true });
        }

        // Stage 1: reputation lookup.
        let user_rep = self.memory.get_user_reputation(&event.user_id);
        let ip_rep = self.memory.get_ip_reputation(&event.ip_address);
        let now = event.timestamp;
        let hard_flagged = user_rep.as_ref().map(|r| r.is_flag_active(now)).unwrap_or(false)
            || ip_rep.as_ref().map(|r| r.flagged).unwrap_or(false);

        // Stage 2: velocity check.
        let window = self.memory.get_velocity_window(&event.user_id, self.config.velocity_window_secs, now);
        let velocity_findings = velocity::analyze(&event, window);
        let rapid_fire_detected = velocity_findings
            .iter()
            .any(|f| f.pattern == crate::events::VelocityPatternKind::RapidFire);

        // Stage 3: ML score, under a deadline; timeout is a soft failure.
        let ml_breaker = self.guards.breaker(Collaborator::Ml);
        let ml_score = if ml_breaker.allow() {
            let account_age = self.memory.account_age_days(&event.user_id, now);
            let rolling_mean = self.memory.rolling_mean_amount(&event.user_id, now);
            let rolling_count = self.memory.rolling_count(&event.user_id, now);
            let ml = Arc::clone(&self.ml);
            let ev = event.clone();
            let fut = tokio::task::spawn_blocking(move || ml.score(&ev, Some(account_age), rolling_mean, Some(rolling_count)));
            match tokio::time::timeout(Duration::from_millis(self.config.deadline_ml_ms), fut).await {
                Ok(Ok(score)) => {
                    ml_breaker.record_success();
                    Some(score)
                }
                _ => {
                    ml_breaker.record_failure();
                    warn!(order_id = %event.order_id, "ml detector soft-failed (deadline or join error)");
                    None
                }
            }
        } else {
            None
        };

        // Stage 4: vector similarity query.
        let kb_breaker = self.guards.breaker(Collaborator::Kb);
        let similar_cases = if kb_breaker.allow() {
            let hits = self.kb.search(&event.describe(), 5);
            kb_breaker.record_success();
            hits
        } else {
            Vec::new()
        };
        let similar_signal_inputs: Vec<(f32, f32)> =
            similar_cases.iter().map(|(p, sim)| (*sim, p.meta.severity.weight())).collect();

        let amount_over_3sigma = {
            let mean = self.memory.rolling_mean_amount(&event.user_id, now);
            let stddev = self.memory.rolling_stddev_amount(&event.user_id, now);
            match (mean, stddev) {
                (Some(m), Some(sd)) if sd > 0.0 => (event.amount - m).abs() > 3.0 * sd,
                _ => false,
            }
        };
        let account_age_days = self.memory.account_age_days(&event.user_id, now);
        let is_new_account = account_age_days < 1.0;
        let new_account_large_amount = is_new_account && event.amount > 500.0;
        let shipping_billing_mismatch = event.shipping_country != event.billing_country;

        // Stage 5: fusion.
        let inputs = SignalInputs {
            ml: ml_score,
            velocity_findings: velocity_findings.clone(),
            user_flagged: user_rep.as_ref().map(|r| r.is_flag_active(now)).unwrap_or(false),
            user_fraud_count: user_rep.as_ref().map(|r| r.fraud_count).unwrap_or(0),
            ip_flagged: ip_rep.as_ref().map(|r| r.flagged).unwrap_or(false),
            reviewed_recently: user_rep.as_ref().map(|r| r.reviewed_in_last_days(now, 7)).unwrap_or(false),
            similar_cases: similar_signal_inputs,
            shipping_billing_mismatch,
            amount_over_3sigma,
            new_account_large_amount,
        };
        let fusion_outcome = fusion::fuse(&inputs);
        let mut score = fusion_outcome.score;
        let mut factors = fusion_outcome.factors.clone();
        let confidence = fusion_outcome.confidence;

        if hard_flagged {
            factors.push(ContributingFactor {
                factor_name: "hard_flag_override".into(),
                impact: 1.0,
                evidence: "user or IP is currently flagged".into(),
            });
        }

        // Stage 6: triage.
        let triage_result = if hard_flagged {
            Triage::Block
        } else {
            fusion::triage(
                score,
                fusion_outcome.coverage,
                self.config.block_threshold,
                self.config.review_threshold,
                self.config.agent_threshold,
                self.config.agent_min_coverage,
            )
        };

        // Stage 7: optional agent escalation.
        let mut agent_trace = None;
        let mut base_decision = match triage_result {
            Triage::Block => Decision::Block,
            Triage::ManualReview => Decision::ManualReview,
            Triage::Approve => Decision::Approve,
            Triage::RunAgents => Decision::Block, // placeholder, replaced below
        };

        if matches!(triage_result, Triage::RunAgents) && self.config.use_agents {
            if self.guards.llm_rate_limiter.is_saturated() {
                self.metrics.agents_skipped_rate_limit.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                agent_trace = Some(AgentTrace {
                    status: AgentTraceStatus::SkippedRateLimit,
                    investigation: None,
                    risk: None,
                    decision: None,
                    tool_calls: 0,
                    elapsed_ms: 0,
                });
                base_decision = fallback_from_score(score, self.config.block_threshold, self.config.review_threshold);
            } else {
                self.metrics.agents_invoked.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                let runtime = AgentRuntime {
                    llm: &self.llm,
                    rate_limiter: &self.guards.llm_rate_limiter,
                    retry: &self.guards.retry,
                    model: &self.config.llm_model,
                    role_timeout: Duration::from_secs(self.config.deadline_llm_tool_secs),
                };
                let agent_run = tokio::time::timeout(
                    Duration::from_secs(self.config.deadline_agent_run_secs),
                    runtime.run(&event, &self.memory, &self.kb),
                )
                .await;

                match agent_run {
                    Ok(outcome) => {
                        if outcome.state == AgentState::Failed {
                            self.metrics.agents_failed.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        }
                        base_decision = decision_from_agent_outcome(&outcome, score, self.config.block_threshold, self.config.review_threshold);
                        if let Some(p) = outcome.fraud_probability {
                            score = p;
                        }
                        agent_trace = Some(build_agent_trace(&outcome));
                    }
                    Err(_) => {
                        self.metrics.agents_failed.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        base_decision = fallback_from_score(score, self.config.block_threshold, self.config.review_threshold);
                        agent_trace = Some(AgentTrace {
                            status: AgentTraceStatus::Failed,
                            investigation: None,
                            risk: None,
                            decision: None,
                            tool_calls: 0,
                            elapsed_ms: self.config.deadline_agent_run_secs * 1000,
                        });
                    }
                }
            }
        } else if matches!(triage_result, Triage::RunAgents) {
            base_decision = fallback_from_score(score, self.config.block_threshold, self.config.review_threshold);
        }

        // Overrides.
        let prior_confirmed_fraud = user_rep.as_ref().map(|r| r.fraud_count > 0).unwrap_or(false);
        let high_severity_factors = factors.iter().filter(|f| f.impact >= 0.2).count();
        let first_time_user = user_rep.is_none();
        let final_decision = fusion::apply_overrides(
            base_decision,
            prior_confirmed_fraud,
            high_severity_factors,
            rapid_fire_detected,
            confidence,
            first_time_user,
            event.amount,
        );

        // Side effects (§4.1).
        if final_decision == Decision::Block && score >= 0.9 {
            let meta = FraudPatternMeta {
                fraud_type: "learned_from_block".to_string(),
                severity: Severity::High,
                example_amount_range: (event.amount, event.amount),
                created_at: now,
                source: PatternSource::Learned,
            };
            self.kb.insert(&event.describe(), meta, self.config.kb_insert_dedup_secs);
        }
        if matches!(final_decision, Decision::Block | Decision::ManualReview) {
            let reason = if final_decision == Decision::Block { FlagReason::AgentBlock } else { FlagReason::ManualReview };
            self.memory.flag_user(&event.user_id, reason, self.config.user_flag_ttl_secs, now);
            if let Some(rep) = self.memory.get_user_reputation(&event.user_id) {
                if let Ok(payload) = serde_json::to_string(&rep) {
                    self.persistence.buffer.enqueue(PendingWrite::UserFlag { user_id: event.user_id.clone(), payload });
                }
            }
            if final_decision == Decision::ManualReview {
                self.memory.record_manual_review(&event.user_id, now);
            }
            if shipping_billing_mismatch || amount_over_3sigma {
                self.memory.flag_ip(&event.ip_address, now);
                if let Some(rep) = self.memory.get_ip_reputation(&event.ip_address) {
                    if let Ok(payload) = serde_json::to_string(&rep) {
                        self.persistence.buffer.enqueue(PendingWrite::IpFlag { ip: event.ip_address.clone(), payload });
                    }
                }
            } else {
                self.memory.touch_ip(&event.ip_address, now);
            }
        } else {
            self.memory.touch_ip(&event.ip_address, now);
        }
        self.memory.record_transaction(&event.user_id, &event.order_id, event.amount, now);

        self.metrics.record_decision(final_decision);
        self.metrics.record_stage_latency("pipeline", started.elapsed().as_secs_f64() * 1000.0);

        let record = DecisionRecord {
            order_id: event.order_id.clone(),
            user_id: event.user_id.clone(),
            decision: final_decision,
            risk_score: score,
            confidence,
            contributing_factors: factors,
            agent_trace,
            elapsed_ms: started.elapsed().as_millis() as u64,
            decided_at: Utc::now(),
        };

        self.memory.record_decision(&event.order_id, record.clone(), now);
        if let Ok(payload) = serde_json::to_string(&record) {
            self.persistence.buffer.enqueue(PendingWrite::Decision { order_id: record.order_id.clone(), payload });
        }
        info!(order_id = %record.order_id, decision = %record.decision, score = record.risk_score, "decision emitted");

        Ok(ProcessOutcome { record, is_duplicate: false })
    }

    fn invalid_event_record(&self, event: &TransactionEvent, reason: &str) -> DecisionRecord {
        DecisionRecord {
            order_id: event.order_id.clone(),
            user_id: event.user_id.clone(),
            decision: Decision::ManualReview,
            risk_score: 0.0,
            confidence: 0.0,
            contributing_factors: vec![ContributingFactor {
                factor_name: "malformed_event".to_string(),
                impact: 0.0,
                evidence: reason.to_string(),
            }],
            agent_trace: None,
            elapsed_ms: 0,
            decided_at: Utc::now(),
        }
    }

    /// Builds the decision record for an input line whose JSON body never
    /// deserialized into a `TransactionEvent` at all (§7's `InvalidEvent`,
    /// the schema-failure case). There's no order_id/user_id to key a
    /// record on, so this bypasses the seen-set and reputation lookups
    /// entirely rather than reusing `invalid_event_record`, which still
    /// requires a parsed event.
    pub fn malformed_event_record(&self, reason: &str) -> DecisionRecord {
        self.metrics.events_processed.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        DecisionRecord {
            order_id: String::new(),
            user_id: String::new(),
            decision: Decision::ManualReview,
            risk_score: 0.0,
            confidence: 0.0,
            contributing_factors: vec![ContributingFactor {
                factor_name: "malformed_event".to_string(),
                impact: 0.0,
                evidence: reason.to_string(),
            }],
            agent_trace: None,
            elapsed_ms: 0,
            decided_at: Utc::now(),
        }
    }
}

fn validate(event: &TransactionEvent) -> Result<(), &'static str> {
    if event.order_id.is_empty() {
        return Err("missing order_id");
    }
    if event.user_id.is_empty() {
        return Err("missing user_id");
    }
    if event.amount < 0.0 {
        return Err("negative amount");
    }
    Ok(())
}

fn fallback_from_score(score: f32, block_t: f32, review_t: f32) -> Decision {
    if score >= block_t {
        Decision::Block
    } else if score >= review_t {
        Decision::ManualReview
    } else {
        Decision::Approve
    }
}

fn decision_from_agent_outcome(outcome: &AgentOutcome, fallback_score: f32, block_t: f32, review_t: f32) -> Decision {
    match outcome.state {
        AgentState::Done => outcome.decision.unwrap_or_else(|| fallback_from_score(fallback_score, block_t, review_t)),
        _ => fallback_from_score(fallback_score, block_t, review_t),
    }
}

fn build_agent_trace(outcome: &AgentOutcome) -> AgentTrace {
    AgentTrace {
        status: if outcome.state == AgentState::Done { AgentTraceStatus::Completed } else { AgentTraceStatus::Failed },
        investigation: outcome.investigation_json.clone(),
        risk: outcome.risk_json.clone(),
        decision: outcome.decision_json.clone(),
        tool_calls: outcome.tool_calls,
        elapsed_ms: outcome.elapsed_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::ml::StandInIsolationForest;

    fn make_orchestrator() -> Orchestrator {
        let config = Arc::new(Config::default());
        Orchestrator {
            memory: Arc::new(MemoryStore::new(config.velocity_window_secs, config.seen_set_ttl_secs)),
            kb: {
                let kb = VectorKb::new();
                kb.seed();
                Arc::new(kb)
            },
            ml: Arc::new(MlDetector::new(Arc::new(StandInIsolationForest))),
            guards: Arc::new(ResourceGuards::new(&config)),
            llm: Arc::new(LlmClient::new(None)),
            metrics: Arc::new(crate::metrics::Metrics::default()),
            persistence: Arc::new(Persistence::new(crate::state::persistence::PersistenceConfig::default())),
            config,
        }
    }

    fn clean_event(order_id: &str, amount: f64) -> TransactionEvent {
        TransactionEvent {
            order_id: order_id.to_string(),
            user_id: "u-clean".to_string(),
            ip_address: "10.0.0.1".to_string(),
            amount,
            timestamp: Utc::now(),
            payment_method: "card".to_string(),
            currency: "USD".to_string(),
            shipping_country: "US".to_string(),
            billing_country: "US".to_string(),
            device_fingerprint: None,
            account_age_days: Some(730.0),
        }
    }

    #[tokio::test]
    async fn s1_clean_event_approves_with_low_score() {
        let orch = make_orchestrator();
        orch.memory.record_transaction("u-clean", "o0", 45.0, Utc::now() - chrono::Duration::days(700));
        let outcome = orch.process(clean_event("o1", 45.0)).await.unwrap();
        assert_eq!(outcome.record.decision, Decision::Approve);
        assert!(outcome.record.risk_score < 0.30);
        assert!(outcome.record.agent_trace.is_none());
    }

    #[tokio::test]
    async fn s4_duplicate_order_id_returns_prior_decision() {
        let orch = make_orchestrator();
        let event = clean_event("dup-1", 45.0);
        let first = orch.process(event.clone()).await.unwrap();
        let second = orch.process(event).await.unwrap();
        assert!(second.is_duplicate);
        assert_eq!(first.record.risk_score, second.record.risk_score);
        assert_eq!(first.record.decision, second.record.decision);
    }

    #[tokio::test]
    async fn invalid_event_is_manual_review_with_malformed_reason() {
        let orch = make_orchestrator();
        let mut event = clean_event("bad-1", 10.0);
        event.order_id = String::new();
        let outcome = orch.process(event).await.unwrap();
        assert_eq!(outcome.record.decision, Decision::ManualReview);
        assert!(outcome.record.contributing_factors.iter().any(|f| f.factor_name == "malformed_event"));
    }

    #[test]
    fn malformed_event_record_is_manual_review_with_no_order_or_user_id() {
        let orch = make_orchestrator();
        let record = orch.malformed_event_record("expected value at line 1 column 1");
        assert_eq!(record.decision, Decision::ManualReview);
        assert_eq!(record.order_id, "");
        assert_eq!(record.user_id, "");
        let factor = record.contributing_factors.iter().find(|f| f.factor_name == "malformed_event").unwrap();
        assert_eq!(factor.evidence, "expected value at line 1 column 1");
    }

    #[tokio::test]
    async fn s2_card_testing_burst_surfaces_as_a_contributing_factor() {
        let orch = make_orchestrator();
        let t0 = Utc::now();
        orch.memory.record_transaction("u-cardtest", "o0", 2.0, t0);
        orch.memory.record_transaction("u-cardtest", "o1", 3.0, t0 + chrono::Duration::seconds(90));
        let mut event = clean_event("o2", 4.0);
        event.user_id = "u-cardtest".to_string();
        event.timestamp = t0 + chrono::Duration::seconds(200);
        let outcome = orch.process(event).await.unwrap();
        assert!(outcome.record.contributing_factors.iter().any(|f| f.factor_name == "card_testing"));
    }

    #[tokio::test]
    async fn s5_new_account_large_amount_with_geo_mismatch_forces_manual_review() {
        let orch = make_orchestrator();
        let mut event = clean_event("o-new-1", 600.0);
        event.user_id = "u-brand-new".to_string();
        event.shipping_country = "CN".to_string();
        event.billing_country = "US".to_string();
        let outcome = orch.process(event).await.unwrap();
        assert_ne!(outcome.record.decision, Decision::Approve);
        assert!(outcome.record.contributing_factors.iter().any(|f| f.factor_name == "anomaly"));
    }

    #[tokio::test]
    async fn agent_escalation_is_skipped_when_llm_rate_limiter_is_saturated() {
        let mut config = Config::default();
        config.max_ai_requests_per_min = 1;
        config.ai_request_delay_secs = 0.0;
        let config = Arc::new(config);

        let orch = Orchestrator {
            memory: Arc::new(MemoryStore::new(config.velocity_window_secs, config.seen_set_ttl_secs)),
            kb: {
                let kb = VectorKb::new();
                kb.seed();
                Arc::new(kb)
            },
            ml: Arc::new(MlDetector::new(Arc::new(StandInIsolationForest))),
            guards: Arc::new(ResourceGuards::new(&config)),
            llm: Arc::new(LlmClient::new(None)),
            metrics: Arc::new(crate::metrics::Metrics::default()),
            persistence: Arc::new(Persistence::new(crate::state::persistence::PersistenceConfig::default())),
            config,
        };

        // Drain the single token so the limiter reports saturated without
        // any cooperative wait (min gap is zero in this config).
        orch.guards.llm_rate_limiter.acquire().await.unwrap();
        assert!(orch.guards.llm_rate_limiter.is_saturated());

        orch.memory.flag_user("u-repeat-offender", FlagReason::RapidFire, 86400, Utc::now());
        let mut event = clean_event("o-escalate-1", 50.0);
        event.user_id = "u-repeat-offender".to_string();
        let outcome = orch.process(event).await.unwrap();

        if let Some(trace) = &outcome.record.agent_trace {
            assert_eq!(trace.status, AgentTraceStatus::SkippedRateLimit);
            assert_eq!(trace.tool_calls, 0);
        }
    }
}
