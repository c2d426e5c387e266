// ML Detector adapter (§4.4).
//
// The trained anomaly-scoring model itself (Isolation Forest or equivalent)
// is an out-of-scope external collaborator (§1) — only its
// `predict_score(feature_vector) -> [0,1]` interface is in scope. This
// module owns the part that *is* in scope: feature extraction, median
// imputation for missing features, and a deterministic stand-in scorer
// behind the same trait a real packaged model would implement, so swapping
// one in later means implementing `MlModel`, not touching this file.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::events::TransactionEvent;

/// One-hot-ish payment method bucket. Anything not recognized falls into
/// `Other`, matching the "missing features filled with population medians"
/// contract for categorical inputs we've never seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PaymentBucket {
    Card,
    Paypal,
    Crypto,
    BankTransfer,
    Other,
}

impl PaymentBucket {
    fn classify(method: &str) -> Self {
        match method.to_ascii_lowercase().as_str() {
            "card" | "credit_card" | "debit_card" => PaymentBucket::Card,
            "paypal" => PaymentBucket::Paypal,
            "crypto" | "bitcoin" | "btc" => PaymentBucket::Crypto,
            "bank_transfer" | "ach" | "wire" => PaymentBucket::BankTransfer,
            _ => PaymentBucket::Other,
        }
    }

    fn one_hot(self) -> [f64; 5] {
        let mut v = [0.0; 5];
        let idx = match self {
            PaymentBucket::Card => 0,
            PaymentBucket::Paypal => 1,
            PaymentBucket::Crypto => 2,
            PaymentBucket::BankTransfer => 3,
            PaymentBucket::Other => 4,
        };
        v[idx] = 1.0;
        v
    }
}

#[derive(Debug, Clone)]
pub struct FeatureVector {
    pub log_amount: f64,
    pub hour_sin: f64,
    pub hour_cos: f64,
    pub country_mismatch: f64,
    pub payment_one_hot: [f64; 5],
    pub account_age_days: f64,
    pub rolling_mean_amount: f64,
    pub rolling_count: f64,
}

/// Population medians used to fill missing inputs, so a cold-start user
/// (no rolling stats yet) still produces a stable, explainable score rather
/// than a zeroed-out feature silently dragging the model one way.
#[derive(Debug, Clone)]
pub struct PopulationMedians {
    pub amount: f64,
    pub account_age_days: f64,
    pub rolling_mean_amount: f64,
    pub rolling_count: f64,
}

impl Default for PopulationMedians {
    fn default() -> Self {
        Self {
            amount: 45.0,
            account_age_days: 180.0,
            rolling_mean_amount: 45.0,
            rolling_count: 1.0,
        }
    }
}

pub fn extract_features(
    event: &TransactionEvent,
    account_age_days: Option<f64>,
    rolling_mean_amount: Option<f64>,
    rolling_count: Option<usize>,
    medians: &PopulationMedians,
) -> FeatureVector {
    let amount = if event.amount > 0.0 { event.amount } else { medians.amount };
    let log_amount = (amount + 1.0).ln();

    let hour = event.timestamp.format("%H").to_string().parse::<f64>().unwrap_or(12.0);
    let angle = 2.0 * std::f64::consts::PI * hour / 24.0;

    let country_mismatch = if event.shipping_country != event.billing_country { 1.0 } else { 0.0 };
    let payment_one_hot = PaymentBucket::classify(&event.payment_method).one_hot();

    FeatureVector {
        log_amount,
        hour_sin: angle.sin(),
        hour_cos: angle.cos(),
        country_mismatch,
        payment_one_hot,
        account_age_days: account_age_days.unwrap_or(medians.account_age_days),
        rolling_mean_amount: rolling_mean_amount.unwrap_or(medians.rolling_mean_amount),
        rolling_count: rolling_count.map(|c| c as f64).unwrap_or(medians.rolling_count),
    }
}

/// The interface a real packaged model must satisfy. Pure: safe under
/// concurrent calls, matching the spec's "model evaluation is pure"
/// invariant.
pub trait MlModel: Send + Sync {
    fn predict_score(&self, features: &FeatureVector) -> f32;
}

/// Deterministic stand-in used until a real trained artifact is wired in.
/// Combines the feature vector into a stable [0,1] score via a hashed
/// linear-ish weighting so the same inputs always produce the same score
/// (useful for the idempotence invariant, §8) without needing a training
/// pipeline in scope.
pub struct StandInIsolationForest;

impl MlModel for StandInIsolationForest {
    fn predict_score(&self, f: &FeatureVector) -> f32 {
        let mut raw = 0.0f64;
        raw += (f.log_amount / 10.0).min(1.0) * 0.30;
        raw += f.country_mismatch * 0.20;
        raw += (1.0 - (f.account_age_days / 365.0).min(1.0)) * 0.20;
        raw += f.hour_sin.abs() * 0.05;
        raw += {
            let ratio = if f.rolling_mean_amount > 0.0 {
                (f.log_amount - (f.rolling_mean_amount + 1.0).ln()).abs() / 3.0
            } else {
                0.0
            };
            ratio.min(1.0) * 0.20
        };
        raw += (f.rolling_count / 50.0).min(1.0) * 0.05;

        // A small deterministic jitter derived from the feature vector's
        // hash keeps scores from landing on exact round numbers, matching
        // the texture of a real learned model without adding nondeterminism.
        let mut hasher = Sha256::new();
        hasher.update(format!("{:?}", f.payment_one_hot));
        let digest = hasher.finalize();
        let jitter = (digest[0] as f64 / 255.0 - 0.5) * 0.02;

        (raw + jitter).clamp(0.0, 1.0) as f32
    }
}

pub struct MlDetector {
    model: Arc<dyn MlModel>,
    medians: PopulationMedians,
}

impl MlDetector {
    pub fn new(model: Arc<dyn MlModel>) -> Self {
        Self { model, medians: PopulationMedians::default() }
    }

    pub fn score(
        &self,
        event: &TransactionEvent,
        account_age_days: Option<f64>,
        rolling_mean_amount: Option<f64>,
        rolling_count: Option<usize>,
    ) -> f32 {
        let features = extract_features(
            event,
            account_age_days,
            rolling_mean_amount,
            rolling_count,
            &self.medians,
        );
        self.model.predict_score(&features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ev(amount: f64, shipping: &str, billing: &str) -> TransactionEvent {
        TransactionEvent {
            order_id: "o1".into(),
            user_id: "u1".into(),
            ip_address: "1.2.3.4".into(),
            amount,
            timestamp: Utc::now(),
            payment_method: "card".into(),
            currency: "USD".into(),
            shipping_country: shipping.into(),
            billing_country: billing.into(),
            device_fingerprint: None,
            account_age_days: None,
        }
    }

    #[test]
    fn score_is_deterministic_for_same_inputs() {
        let detector = MlDetector::new(Arc::new(StandInIsolationForest));
        let event = ev(750.0, "CN", "US");
        let s1 = detector.score(&event, Some(1.0), Some(45.0), Some(1));
        let s2 = detector.score(&event, Some(1.0), Some(45.0), Some(1));
        assert_eq!(s1, s2);
    }

    #[test]
    fn country_mismatch_increases_score() {
        let detector = MlDetector::new(Arc::new(StandInIsolationForest));
        let matched = ev(100.0, "US", "US");
        let mismatched = ev(100.0, "CN", "US");
        let s_match = detector.score(&matched, Some(365.0), Some(100.0), Some(10));
        let s_mismatch = detector.score(&mismatched, Some(365.0), Some(100.0), Some(10));
        assert!(s_mismatch > s_match);
    }

    #[test]
    fn score_stays_in_unit_range() {
        let detector = MlDetector::new(Arc::new(StandInIsolationForest));
        let event = ev(1_000_000.0, "CN", "US");
        let s = detector.score(&event, Some(0.1), Some(1.0), Some(0));
        assert!((0.0..=1.0).contains(&s));
    }
}
