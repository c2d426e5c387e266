// Tool surface (§4.6): thin wrappers over the components the agent roles
// are allowed to read. Each tool renders its result as a short text block
// that gets embedded into the next prompt — there is no live function-call
// loop against the LLM provider here (that belongs to the transport), but
// the read/write boundaries below are exactly the table the spec defines.

use chrono::Utc;

use crate::detectors::velocity;
use crate::events::TransactionEvent;
use crate::state::MemoryStore;
use crate::vector_kb::VectorKb;

/// Reads: memory store.
pub fn fraud_history(store: &MemoryStore, user_id: &str) -> String {
    match store.get_user_reputation(user_id) {
        Some(rep) => format!(
            "fraud_count={} flagged={} reviews_last_7d={}",
            rep.fraud_count,
            rep.flagged,
            rep.reviewed_in_last_days(Utc::now(), 7)
        ),
        None => "no prior history".to_string(),
    }
}

/// Reads: memory store.
pub fn user_reputation(store: &MemoryStore, user_id: &str) -> String {
    match store.get_user_reputation(user_id) {
        Some(rep) => format!("flagged={} reason={:?} fraud_count={}", rep.flagged, rep.flag_reason, rep.fraud_count),
        None => "unknown user, no reputation record".to_string(),
    }
}

/// Reads: vector KB.
pub fn similar_cases(kb: &VectorKb, description: &str) -> String {
    let hits = kb.search(description, 5);
    if hits.is_empty() {
        return "no similar cases above the similarity threshold".to_string();
    }
    hits.iter()
        .map(|(p, sim)| format!("{} (sim={:.2}, severity={:?})", p.meta.fraud_type, sim, p.meta.severity))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Reads: velocity detector + memory.
pub fn velocity_check(store: &MemoryStore, event: &TransactionEvent) -> String {
    let window = store.get_velocity_window(&event.user_id, 3600, event.timestamp);
    let findings = velocity::analyze(event, window);
    if findings.is_empty() {
        "no velocity patterns detected".to_string()
    } else {
        findings
            .iter()
            .map(|f| format!("{:?} ({:?}): {}", f.pattern, f.severity, f.evidence.join(", ")))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Reads: event payload + rolling stats.
pub fn transaction_analysis(store: &MemoryStore, event: &TransactionEvent) -> String {
    let mean = store.rolling_mean_amount(&event.user_id, event.timestamp);
    let age = store.account_age_days(&event.user_id, event.timestamp);
    format!(
        "amount={:.2} currency={} shipping={} billing={} mismatch={} account_age_days={:.1} rolling_mean={}",
        event.amount,
        event.currency,
        event.shipping_country,
        event.billing_country,
        event.shipping_country != event.billing_country,
        age,
        mean.map(|m| format!("{m:.2}")).unwrap_or_else(|| "n/a".to_string())
    )
}
