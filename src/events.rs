// Core domain types shared across the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A transaction event consumed from the input bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub order_id: String,
    pub user_id: String,
    pub ip_address: String,
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
    pub payment_method: String,
    pub currency: String,
    pub shipping_country: String,
    pub billing_country: String,
    #[serde(default)]
    pub device_fingerprint: Option<String>,
    #[serde(default)]
    pub account_age_days: Option<f64>,
}

/// Shared template behind `TransactionEvent::describe()` and the vector KB's
/// seeded archetypes (§4.5) — both sides of every similarity comparison are
/// built from this same function so they share vocabulary, not just topic.
pub fn describe_transaction(amount: f64, billing_country: &str, payment_method: &str, shipping_country: &str) -> String {
    let mismatch = if shipping_country != billing_country {
        format!(", shipping mismatch {shipping_country}")
    } else {
        String::new()
    };
    format!("${amount:.2} in {billing_country} via {payment_method}{mismatch}")
}

impl TransactionEvent {
    /// Human-readable description used for vector KB queries and learned-pattern text.
    pub fn describe(&self) -> String {
        describe_transaction(self.amount, &self.billing_country, &self.payment_method, &self.shipping_country)
    }
}

/// What the bus consumer hands upstream for one input line: either a
/// transaction that deserialized cleanly, or a line whose JSON body never
/// produced a `TransactionEvent` at all (the `INVALID_EVENT` schema-failure
/// case, §7 of the design doc — distinct from `validate()`'s business-rule
/// failures, which still have a parsed event to key a record on).
#[derive(Debug, Clone)]
pub enum InputItem {
    Event(TransactionEvent),
    Malformed { raw: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagReason {
    RapidFire,
    CardTesting,
    ElevatedFrequency,
    MlAnomaly,
    SimilarCase,
    AnomalyMismatch,
    AgentBlock,
    ManualReview,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserReputation {
    pub user_id: String,
    pub flagged: bool,
    pub flag_reason: Option<FlagReason>,
    pub flagged_at: Option<DateTime<Utc>>,
    pub flag_ttl_secs: i64,
    pub fraud_count: u64,
    pub first_seen: DateTime<Utc>,
    pub review_history: Vec<DateTime<Utc>>, // timestamps of prior MANUAL_REVIEW decisions
}

impl UserReputation {
    pub fn new(user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            flagged: false,
            flag_reason: None,
            flagged_at: None,
            flag_ttl_secs: 0,
            fraud_count: 0,
            first_seen: now,
            review_history: Vec::new(),
        }
    }

    pub fn is_flag_active(&self, now: DateTime<Utc>) -> bool {
        match self.flagged_at {
            Some(at) => self.flagged && (now - at).num_seconds() <= self.flag_ttl_secs,
            None => false,
        }
    }

    pub fn reviewed_in_last_days(&self, now: DateTime<Utc>, days: i64) -> bool {
        self.review_history
            .iter()
            .any(|ts| (now - *ts).num_days() <= days)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpReputation {
    pub ip_address: String,
    pub flagged: bool,
    pub fraud_case_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl IpReputation {
    pub fn new(ip: &str, now: DateTime<Utc>) -> Self {
        Self {
            ip_address: ip.to_string(),
            flagged: false,
            fraud_case_count: 0,
            first_seen: now,
            last_seen: now,
        }
    }
}

/// A single entry in a user's rolling velocity window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VelocityEntry {
    pub order_id: String,
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Med,
    High,
    Critical,
}

impl Severity {
    pub fn weight(self) -> f32 {
        match self {
            Severity::Low => 0.25,
            Severity::Med => 0.5,
            Severity::High => 0.75,
            Severity::Critical => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternSource {
    Seeded,
    Learned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudPatternMeta {
    pub fraud_type: String,
    pub severity: Severity,
    pub example_amount_range: (f64, f64),
    pub created_at: DateTime<Utc>,
    pub source: PatternSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudPattern {
    pub description: String,
    pub vector: Vec<f32>,
    pub meta: FraudPatternMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VelocityPatternKind {
    RapidFire,
    CardTesting,
    ElevatedFrequency,
}

impl VelocityPatternKind {
    /// Snake-case token used as a `ContributingFactor::factor_name` (§3, §8 S3).
    pub fn factor_name(self) -> &'static str {
        match self {
            VelocityPatternKind::RapidFire => "rapid_fire",
            VelocityPatternKind::CardTesting => "card_testing",
            VelocityPatternKind::ElevatedFrequency => "elevated_frequency",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VelocityFinding {
    pub pattern: VelocityPatternKind,
    pub severity: Severity,
    pub evidence: Vec<String>,
}

impl VelocityFinding {
    pub fn weight(&self) -> f32 {
        match self.pattern {
            VelocityPatternKind::RapidFire => 0.9,
            VelocityPatternKind::CardTesting => 0.8,
            VelocityPatternKind::ElevatedFrequency => 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approve,
    ManualReview,
    Block,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Decision::Approve => "APPROVE",
            Decision::ManualReview => "MANUAL_REVIEW",
            Decision::Block => "BLOCK",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContributingFactor {
    pub factor_name: String,
    pub impact: f32,
    pub evidence: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentTraceStatus {
    Completed,
    Failed,
    SkippedRateLimit,
    SkippedNotEscalated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTrace {
    pub status: AgentTraceStatus,
    pub investigation: Option<serde_json::Value>,
    pub risk: Option<serde_json::Value>,
    pub decision: Option<serde_json::Value>,
    pub tool_calls: u32,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub order_id: String,
    pub user_id: String,
    pub decision: Decision,
    pub risk_score: f32,
    pub confidence: f32,
    pub contributing_factors: Vec<ContributingFactor>,
    pub agent_trace: Option<AgentTrace>,
    pub elapsed_ms: u64,
    pub decided_at: DateTime<Utc>,
}

/// Per-signal breakdown produced by the fusion stage, kept around for the
/// agent runtime's Risk role and for confidence computation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalBreakdown {
    pub ml: f32,
    pub velocity: f32,
    pub historical: f32,
    pub similar_case: f32,
    pub anomaly: f32,
    /// number of the five signals above that are non-soft-failed.
    pub coverage_count: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionResult {
    pub score: f32,
    pub confidence: f32,
    pub coverage: f32,
    pub breakdown: SignalBreakdown,
    pub factors: Vec<ContributingFactor>,
}
