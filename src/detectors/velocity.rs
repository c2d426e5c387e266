// Velocity Detector (§4.3): a pure function of a velocity window + the
// current event. Deterministic, no I/O — the signature matches the
// teacher's worker shape (`analyze(event, window) -> Option<...>`) but
// returns a `Vec` of findings rather than a single fused signal, since the
// spec wants the fusion stage to see each triggered pattern individually.

use chrono::{DateTime, Utc};

use crate::events::{Severity, TransactionEvent, VelocityEntry, VelocityFinding, VelocityPatternKind};

pub fn analyze(
    event: &TransactionEvent,
    mut window: Vec<VelocityEntry>,
) -> Vec<VelocityFinding> {
    // Include the current event as if already recorded, since the window
    // passed in is read before `record_transaction` runs for this event.
    window.push(VelocityEntry {
        order_id: event.order_id.clone(),
        amount: event.amount,
        timestamp: event.timestamp,
    });
    window.sort_by_key(|v| v.timestamp);

    let mut findings = Vec::new();

    if let Some(f) = rapid_fire(&window, event.timestamp) {
        findings.push(f);
    }
    if let Some(f) = card_testing(&window, event.timestamp) {
        findings.push(f);
    }
    if let Some(f) = elevated_frequency(&window, event.timestamp) {
        findings.push(f);
    }

    findings
}

fn events_in(window: &[VelocityEntry], now: DateTime<Utc>, secs: i64) -> Vec<&VelocityEntry> {
    let cutoff = now - chrono::Duration::seconds(secs);
    window.iter().filter(|v| v.timestamp > cutoff && v.timestamp <= now).collect()
}

fn rapid_fire(window: &[VelocityEntry], now: DateTime<Utc>) -> Option<VelocityFinding> {
    let recent = events_in(window, now, 10);
    if recent.len() >= 3 {
        Some(VelocityFinding {
            pattern: VelocityPatternKind::RapidFire,
            severity: Severity::Critical,
            evidence: vec![format!("{} events within 10s", recent.len())],
        })
    } else {
        None
    }
}

fn card_testing(window: &[VelocityEntry], now: DateTime<Utc>) -> Option<VelocityFinding> {
    let recent: Vec<_> = events_in(window, now, 300)
        .into_iter()
        .filter(|v| v.amount < 5.0)
        .collect();
    if recent.len() >= 3 {
        Some(VelocityFinding {
            pattern: VelocityPatternKind::CardTesting,
            severity: Severity::High,
            evidence: vec![format!("{} sub-$5 events within 5min", recent.len())],
        })
    } else {
        None
    }
}

fn elevated_frequency(window: &[VelocityEntry], now: DateTime<Utc>) -> Option<VelocityFinding> {
    let recent = events_in(window, now, 3600);
    if recent.len() < 10 {
        return None;
    }
    let mut gaps_ms: Vec<f64> = recent
        .windows(2)
        .map(|pair| (pair[1].timestamp - pair[0].timestamp).num_milliseconds() as f64)
        .collect();
    if gaps_ms.is_empty() {
        return None;
    }
    let p95 = percentile(&mut gaps_ms, 0.95);
    if p95 < 30_000.0 {
        Some(VelocityFinding {
            pattern: VelocityPatternKind::ElevatedFrequency,
            severity: Severity::Med,
            evidence: vec![format!(
                "{} events within 1h, p95 gap {:.0}ms",
                recent.len(),
                p95
            )],
        })
    } else {
        None
    }
}

fn percentile(values: &mut [f64], p: f64) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let idx = ((values.len() as f64 - 1.0) * p).round() as usize;
    values[idx.min(values.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ev(order: &str, amount: f64, ts: DateTime<Utc>) -> TransactionEvent {
        TransactionEvent {
            order_id: order.to_string(),
            user_id: "u1".to_string(),
            ip_address: "1.2.3.4".to_string(),
            amount,
            timestamp: ts,
            payment_method: "card".to_string(),
            currency: "USD".to_string(),
            shipping_country: "US".to_string(),
            billing_country: "US".to_string(),
            device_fingerprint: None,
            account_age_days: None,
        }
    }

    #[test]
    fn three_events_in_ten_seconds_trigger_rapid_fire() {
        let t0 = Utc::now();
        let window = vec![
            VelocityEntry { order_id: "o1".into(), amount: 50.0, timestamp: t0 },
            VelocityEntry { order_id: "o2".into(), amount: 50.0, timestamp: t0 + Duration::seconds(3) },
        ];
        let event = ev("o3", 50.0, t0 + Duration::seconds(6));
        let findings = analyze(&event, window);
        assert!(findings.iter().any(|f| f.pattern == VelocityPatternKind::RapidFire));
    }

    #[test]
    fn card_testing_needs_three_sub_five_dollar_events() {
        let t0 = Utc::now();
        let window = vec![
            VelocityEntry { order_id: "o1".into(), amount: 2.0, timestamp: t0 },
            VelocityEntry { order_id: "o2".into(), amount: 3.0, timestamp: t0 + Duration::seconds(90) },
        ];
        let event = ev("o3", 4.0, t0 + Duration::seconds(200));
        let findings = analyze(&event, window);
        assert!(findings.iter().any(|f| f.pattern == VelocityPatternKind::CardTesting));
    }

    #[test]
    fn no_findings_for_a_single_clean_event() {
        let t0 = Utc::now();
        let event = ev("o1", 45.0, t0);
        let findings = analyze(&event, vec![]);
        assert!(findings.is_empty());
    }
}
