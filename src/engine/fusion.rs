// Score fusion and triage (§4.1). Weighted signal fusion in the same shape
// as the pack's `FusionEngine::fuse` (fixed weight table, capped composite
// score, tiered thresholds selecting an action) but wired to the fraud
// signal set and threshold values this spec defines rather than the
// pack's distillation-detection weights.

use crate::events::{ContributingFactor, Decision, SignalBreakdown, VelocityFinding};

pub const WEIGHT_ML: f32 = 0.25;
pub const WEIGHT_VELOCITY: f32 = 0.20;
pub const WEIGHT_HISTORICAL: f32 = 0.30;
pub const WEIGHT_SIMILAR_CASE: f32 = 0.15;
pub const WEIGHT_ANOMALY: f32 = 0.10;

pub struct SignalInputs {
    pub ml: Option<f32>,
    pub velocity_findings: Vec<VelocityFinding>,
    pub user_flagged: bool,
    pub user_fraud_count: u64,
    pub ip_flagged: bool,
    pub reviewed_recently: bool,
    /// (similarity, severity_weight) pairs for hits >= 0.7, already top-k.
    pub similar_cases: Vec<(f32, f32)>,
    pub shipping_billing_mismatch: bool,
    pub amount_over_3sigma: bool,
    pub new_account_large_amount: bool,
}

fn velocity_signal(findings: &[VelocityFinding]) -> f32 {
    findings.iter().map(|f| f.weight()).fold(0.0, f32::max)
}

fn historical_signal(user_flagged: bool, fraud_count: u64, ip_flagged: bool, reviewed_recently: bool) -> f32 {
    if user_flagged || fraud_count >= 3 {
        1.0
    } else if ip_flagged {
        0.7
    } else if reviewed_recently {
        0.4
    } else {
        0.0
    }
}

fn similar_case_signal(hits: &[(f32, f32)]) -> f32 {
    if hits.is_empty() {
        return 0.0;
    }
    let (num, denom) = hits.iter().fold((0.0f32, 0.0f32), |(n, d), (sim, w)| (n + sim * w, d + w));
    if denom > 0.0 {
        num / denom
    } else {
        0.0
    }
}

fn anomaly_signal(mismatch: bool, over_3sigma: bool, new_account_large: bool) -> f32 {
    let mut s = 0.0;
    if mismatch {
        s += 0.3;
    }
    if over_3sigma {
        s += 0.4;
    }
    if new_account_large {
        s += 0.3;
    }
    s.min(1.0)
}

pub struct FusionOutcome {
    pub score: f32,
    pub confidence: f32,
    pub coverage: f32,
    pub breakdown: SignalBreakdown,
    pub factors: Vec<ContributingFactor>,
}

/// Fuses the five signals into a composite score and confidence. `ml` being
/// `None` marks the ML stage as soft-failed for coverage purposes.
pub fn fuse(inputs: &SignalInputs) -> FusionOutcome {
    let ml = inputs.ml.unwrap_or(0.0);
    let velocity = velocity_signal(&inputs.velocity_findings);
    let historical = historical_signal(
        inputs.user_flagged,
        inputs.user_fraud_count,
        inputs.ip_flagged,
        inputs.reviewed_recently,
    );
    let similar_case = similar_case_signal(&inputs.similar_cases);
    let anomaly = anomaly_signal(
        inputs.shipping_billing_mismatch,
        inputs.amount_over_3sigma,
        inputs.new_account_large_amount,
    );

    let score = (WEIGHT_ML * ml
        + WEIGHT_VELOCITY * velocity
        + WEIGHT_HISTORICAL * historical
        + WEIGHT_SIMILAR_CASE * similar_case
        + WEIGHT_ANOMALY * anomaly)
        .min(1.0);

    let signals = [ml, velocity, historical, similar_case, anomaly];
    let coverage_count = if inputs.ml.is_some() { 1 } else { 0 }
        + u8::from(velocity > 0.0)
        + u8::from(historical > 0.0)
        + u8::from(similar_case > 0.0)
        + u8::from(anomaly > 0.0);
    let coverage = coverage_count as f32 / 5.0;

    let mean = signals.iter().sum::<f32>() / 5.0;
    let variance = signals.iter().map(|s| (s - mean).powi(2)).sum::<f32>() / 5.0;
    let agreement = (1.0 - variance.sqrt()).clamp(0.0, 1.0);

    let evidence_strength = if coverage_count == 0 {
        0.0
    } else {
        signals.iter().filter(|&&s| s > 0.0).sum::<f32>() / coverage_count as f32
    };

    let confidence = (0.4 * agreement + 0.3 * coverage + 0.3 * evidence_strength).clamp(0.0, 1.0);

    let mut factors = Vec::new();
    if ml > 0.0 {
        factors.push(ContributingFactor { factor_name: "ml_anomaly".into(), impact: WEIGHT_ML * ml, evidence: format!("ml score {:.2}", ml) });
    }
    for f in &inputs.velocity_findings {
        factors.push(ContributingFactor {
            factor_name: f.pattern.factor_name().to_string(),
            impact: WEIGHT_VELOCITY * f.weight(),
            evidence: f.evidence.join("; "),
        });
    }
    if historical > 0.0 {
        factors.push(ContributingFactor { factor_name: "historical".into(), impact: WEIGHT_HISTORICAL * historical, evidence: "prior flag or review history".into() });
    }
    if similar_case > 0.0 {
        factors.push(ContributingFactor { factor_name: "similar_case".into(), impact: WEIGHT_SIMILAR_CASE * similar_case, evidence: format!("{} similar patterns", inputs.similar_cases.len()) });
    }
    if anomaly > 0.0 {
        factors.push(ContributingFactor { factor_name: "anomaly".into(), impact: WEIGHT_ANOMALY * anomaly, evidence: "transaction anomaly detected".into() });
    }
    factors.sort_by(|a, b| b.impact.partial_cmp(&a.impact).unwrap());

    FusionOutcome {
        score,
        confidence,
        coverage,
        breakdown: SignalBreakdown { ml, velocity, historical, similar_case, anomaly, coverage_count },
        factors,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Triage {
    RunAgents,
    Block,
    ManualReview,
    Approve,
}

pub fn triage(score: f32, coverage: f32, block_t: f32, review_t: f32, agent_t: f32, min_coverage: f32) -> Triage {
    if score >= agent_t && coverage >= min_coverage {
        Triage::RunAgents
    } else if score >= block_t {
        Triage::Block
    } else if score >= review_t {
        Triage::ManualReview
    } else {
        Triage::Approve
    }
}

/// Deterministic overrides applied after triage (and after agents, if they
/// ran). Returns the overridden decision, or `None` if no override fires.
pub fn apply_overrides(
    base: Decision,
    prior_confirmed_fraud: bool,
    high_severity_factor_count: usize,
    rapid_fire_detected: bool,
    confidence: f32,
    first_time_user: bool,
    amount: f64,
) -> Decision {
    if prior_confirmed_fraud || high_severity_factor_count >= 3 || rapid_fire_detected {
        return Decision::Block;
    }
    if confidence < 0.6 || (first_time_user && amount > 500.0) {
        return Decision::ManualReview;
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_sum_to_one() {
        let total = WEIGHT_ML + WEIGHT_VELOCITY + WEIGHT_HISTORICAL + WEIGHT_SIMILAR_CASE + WEIGHT_ANOMALY;
        assert!((total - 1.0).abs() < 1e-6);
    }

    #[test]
    fn rapid_fire_velocity_signal_is_point_nine() {
        let finding = VelocityFinding {
            pattern: crate::events::VelocityPatternKind::RapidFire,
            severity: crate::events::Severity::Critical,
            evidence: vec![],
        };
        assert_eq!(velocity_signal(std::slice::from_ref(&finding)), 0.9);
    }

    #[test]
    fn flagged_user_forces_full_historical_signal() {
        assert_eq!(historical_signal(true, 0, false, false), 1.0);
        assert_eq!(historical_signal(false, 3, false, false), 1.0);
        assert_eq!(historical_signal(false, 0, true, false), 0.7);
        assert_eq!(historical_signal(false, 0, false, true), 0.4);
        assert_eq!(historical_signal(false, 0, false, false), 0.0);
    }

    #[test]
    fn triage_boundaries_match_spec() {
        assert_eq!(triage(0.70, 0.6, 0.70, 0.40, 0.70, 0.6), Triage::RunAgents);
        assert_eq!(triage(0.70, 0.3, 0.70, 0.40, 0.70, 0.6), Triage::Block);
        assert_eq!(triage(0.40, 0.3, 0.70, 0.40, 0.70, 0.6), Triage::ManualReview);
        assert_eq!(triage(0.10, 0.3, 0.70, 0.40, 0.70, 0.6), Triage::Approve);
    }

    #[test]
    fn score_never_exceeds_one() {
        let inputs = SignalInputs {
            ml: Some(1.0),
            velocity_findings: vec![VelocityFinding { pattern: crate::events::VelocityPatternKind::RapidFire, severity: crate::events::Severity::Critical, evidence: vec![] }],
            user_flagged: true,
            user_fraud_count: 10,
            ip_flagged: true,
            reviewed_recently: true,
            similar_cases: vec![(1.0, 1.0); 5],
            shipping_billing_mismatch: true,
            amount_over_3sigma: true,
            new_account_large_amount: true,
        };
        let outcome = fuse(&inputs);
        assert!(outcome.score <= 1.0);
    }
}
