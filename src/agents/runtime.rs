// Agent runtime (§4.6): three-role investigation state machine.
// INIT -> INVESTIGATING -> SCORING -> DECIDING -> DONE, transitioning to
// FAILED on malformed output or exhausted budget (default 8 tool calls,
// 60s wall-clock per role). On FAILED the orchestrator falls back to the
// pre-agent triage result.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::agents::{llm_client::LlmClient, prompts, tools};
use crate::errors::FraudError;
use crate::events::{Decision, TransactionEvent};
use crate::guards::rate_limiter::TokenBucketLimiter;
use crate::guards::retry::RetryHandler;
use crate::state::MemoryStore;
use crate::vector_kb::VectorKb;

const TOOL_CALL_BUDGET: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Init,
    Investigating,
    Scoring,
    Deciding,
    Done,
    Failed,
}

fn parse_dsl(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .filter_map(|line| {
            let (k, v) = line.split_once('=')?;
            Some((k.trim().to_ascii_uppercase(), v.trim().to_string()))
        })
        .collect()
}

pub struct AgentOutcome {
    pub state: AgentState,
    pub decision: Option<Decision>,
    pub fraud_probability: Option<f32>,
    pub confidence: Option<f32>,
    pub investigation_json: Option<serde_json::Value>,
    pub risk_json: Option<serde_json::Value>,
    pub decision_json: Option<serde_json::Value>,
    pub tool_calls: u32,
    pub elapsed_ms: u64,
}

pub struct AgentRuntime<'a> {
    pub llm: &'a LlmClient,
    pub rate_limiter: &'a TokenBucketLimiter,
    pub retry: &'a RetryHandler,
    pub model: &'a str,
    pub role_timeout: Duration,
}

impl<'a> AgentRuntime<'a> {
    /// One role's LLM turn, retried with the shared backoff policy (§4.7) —
    /// a role timeout is treated as transient and eligible for retry, same
    /// as the underlying HTTP transport's own transient errors.
    async fn call_role(
        &self,
        system: &'static str,
        user: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<crate::agents::llm_client::LlmCallOutput, FraudError> {
        self.retry
            .run(|| async {
                match tokio::time::timeout(
                    self.role_timeout,
                    self.llm.chat_completion(self.model, system, user, max_tokens, temperature, self.role_timeout),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(FraudError::TransientIo("llm role call timed out".into())),
                }
            })
            .await
    }
    pub async fn run(
        &self,
        event: &TransactionEvent,
        store: &MemoryStore,
        kb: &VectorKb,
    ) -> AgentOutcome {
        let started = Instant::now();
        let mut tool_calls = 0u32;
        let mut state = AgentState::Init;

        // ── Investigation ────────────────────────────────────────────────
        state = AgentState::Investigating;
        let tool_context = {
            let history = tools::fraud_history(store, &event.user_id);
            let reputation = tools::user_reputation(store, &event.user_id);
            let similar = tools::similar_cases(kb, &event.describe());
            let velocity = tools::velocity_check(store, event);
            let analysis = tools::transaction_analysis(store, event);
            tool_calls += 5;
            format!(
                "fraud_history: {history}\nuser_reputation: {reputation}\nsimilar_cases: {similar}\nvelocity_check: {velocity}\ntransaction_analysis: {analysis}"
            )
        };

        if tool_calls > TOOL_CALL_BUDGET {
            return self.failed(started, tool_calls);
        }

        let investigation_result = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|_| FraudError::RateLimited);
        if investigation_result.is_err() {
            return AgentOutcome {
                state: AgentState::Failed,
                decision: None,
                fraud_probability: None,
                confidence: None,
                investigation_json: None,
                risk_json: None,
                decision_json: None,
                tool_calls,
                elapsed_ms: started.elapsed().as_millis() as u64,
            };
        }

        let investigation_call = self
            .call_role(
                prompts::INVESTIGATION_SYSTEM,
                &prompts::investigation_user_prompt(&event.describe(), &tool_context),
                512,
                0.2,
            )
            .await;

        let investigation_dsl = match investigation_call {
            Ok(output) => parse_dsl(&output.content),
            Err(_) => return self.failed(started, tool_calls),
        };
        if !investigation_dsl.contains_key("EVIDENCE_STRENGTH") {
            return self.failed(started, tool_calls);
        }
        let investigation_json = serde_json::to_value(&investigation_dsl).ok();

        // ── Scoring (Risk role) ─────────────────────────────────────────
        state = AgentState::Scoring;
        let report_dsl_text = investigation_dsl
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("\n");

        if self.rate_limiter.acquire().await.is_err() {
            return self.failed(started, tool_calls);
        }

        let risk_call = self.call_role(prompts::RISK_SYSTEM, &prompts::risk_user_prompt(&report_dsl_text), 256, 0.2).await;

        let risk_dsl = match risk_call {
            Ok(output) => parse_dsl(&output.content),
            Err(_) => return self.failed(started, tool_calls),
        };
        let fraud_probability: Option<f32> = risk_dsl.get("FRAUD_PROBABILITY").and_then(|v| v.parse().ok());
        let confidence: Option<f32> = risk_dsl.get("CONFIDENCE").and_then(|v| v.parse().ok());
        if fraud_probability.is_none() || confidence.is_none() {
            return self.failed(started, tool_calls);
        }
        let risk_json = serde_json::to_value(&risk_dsl).ok();

        // ── Deciding ──────────────────────────────────────────────────────
        state = AgentState::Deciding;
        let risk_dsl_text = risk_dsl
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("\n");

        if self.rate_limiter.acquire().await.is_err() {
            return self.failed(started, tool_calls);
        }

        let decision_call = self
            .call_role(prompts::DECISION_SYSTEM, &prompts::decision_user_prompt(&event.describe(), &risk_dsl_text), 256, 0.1)
            .await;
        tool_calls += 1; // fraud_decision tool call

        let decision_dsl = match decision_call {
            Ok(output) => parse_dsl(&output.content),
            Err(_) => return self.failed(started, tool_calls),
        };
        let decision = match decision_dsl.get("DECISION").map(|s| s.as_str()) {
            Some("APPROVE") => Decision::Approve,
            Some("MANUAL_REVIEW") => Decision::ManualReview,
            Some("BLOCK") => Decision::Block,
            _ => return self.failed(started, tool_calls),
        };
        let decision_json = serde_json::to_value(&decision_dsl).ok();

        state = AgentState::Done;
        AgentOutcome {
            state,
            decision: Some(decision),
            fraud_probability,
            confidence,
            investigation_json,
            risk_json,
            decision_json,
            tool_calls,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn failed(&self, started: Instant, tool_calls: u32) -> AgentOutcome {
        AgentOutcome {
            state: AgentState::Failed,
            decision: None,
            fraud_probability: None,
            confidence: None,
            investigation_json: None,
            risk_json: None,
            decision_json: None,
            tool_calls,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dsl_parser_reads_key_value_lines() {
        let parsed = parse_dsl("DECISION=BLOCK\nJUSTIFICATION=high velocity\n");
        assert_eq!(parsed.get("DECISION").map(String::as_str), Some("BLOCK"));
        assert_eq!(parsed.get("JUSTIFICATION").map(String::as_str), Some("high velocity"));
    }

    #[test]
    fn dsl_parser_ignores_malformed_lines() {
        let parsed = parse_dsl("not a kv line\nDECISION=APPROVE");
        assert_eq!(parsed.len(), 1);
    }
}
