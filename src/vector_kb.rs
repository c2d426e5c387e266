// Vector Knowledge Base (§4.5): fraud-pattern embeddings, top-k
// cosine-similarity search, idempotent inserts.
//
// Embeddings use deterministic hashed n-gram feature vectors — the same
// Random Feature Hashing scheme the pack uses for its own semantic
// similarity worker — rather than a call out to a network embedding
// provider, since no concrete provider is named in scope and a local
// deterministic scheme keeps search/insert testable without network access.
//
// The seeded archetypes below are built from `describe_transaction`, the
// same template `TransactionEvent::describe()` uses for every query — the
// teacher's own `embed.rs` archetypes are written in the same register as
// the prompts they're matched against (extraction-request phrasing on both
// sides), so a seeded pattern here is a representative transaction profile
// in the exact phrasing a real transaction's query will come in as, not a
// prose paragraph describing the fraud type in the abstract.

use chrono::Utc;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::events::{describe_transaction, FraudPattern, FraudPatternMeta, PatternSource, Severity};

const DIM: usize = 256;

/// (fraud_type, representative amount, billing country, payment method,
/// shipping country, severity, example_amount_range). The description text
/// is rendered from these via `describe_transaction`, matching the template
/// `TransactionEvent::describe()` renders for every incoming event.
const SEED_PATTERNS: &[(&str, f64, &str, &str, &str, Severity, (f64, f64))] = &[
    ("card_testing", 2.00, "US", "card", "US", Severity::High, (0.5, 5.0)),
    ("rapid_fire", 50.00, "US", "card", "US", Severity::Critical, (10.0, 500.0)),
    ("bin_probing", 1.00, "US", "card", "US", Severity::High, (1.0, 50.0)),
    ("geo_mismatch", 120.00, "US", "card", "CN", Severity::Med, (50.0, 2000.0)),
    ("new_account_large_amount", 750.00, "US", "card", "US", Severity::High, (500.0, 5000.0)),
    ("digital_goods_burst", 75.00, "US", "gift_card", "US", Severity::High, (20.0, 300.0)),
    ("triangulation", 200.00, "US", "card", "NG", Severity::Critical, (50.0, 1000.0)),
    ("address_shuffle", 300.00, "US", "card", "MX", Severity::Med, (30.0, 800.0)),
    ("fee_skimming", 8.00, "US", "card", "US", Severity::Med, (1.0, 20.0)),
    ("takeover_drift", 900.00, "US", "crypto", "RU", Severity::Critical, (100.0, 3000.0)),
];

fn token_feature(token: &str) -> [f32; DIM] {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let digest = hasher.finalize();
    let mut v = [0.0f32; DIM];
    for i in 0..DIM {
        let byte = digest[i % digest.len()];
        let bit = (byte >> (i % 8)) & 1;
        v[i] = if bit == 1 { 1.0 } else { -1.0 };
    }
    v
}

fn normalize_text(text: &str) -> Vec<String> {
    text.to_ascii_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

pub fn embed_text(text: &str) -> [f32; DIM] {
    let tokens = normalize_text(text);
    let mut acc = [0.0f32; DIM];
    for n in 1..=3 {
        for window in tokens.windows(n) {
            let gram = window.join("_");
            let f = token_feature(&gram);
            for i in 0..DIM {
                acc[i] += f[i];
            }
        }
    }
    let norm: f32 = acc.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in acc.iter_mut() {
            *x /= norm;
        }
    }
    acc
}

pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    dot.clamp(-1.0, 1.0)
}

pub struct VectorKb {
    patterns: Mutex<Vec<FraudPattern>>,
}

impl VectorKb {
    pub fn new() -> Self {
        Self { patterns: Mutex::new(Vec::new()) }
    }

    /// Seeds the 10 canonical patterns if the collection is empty.
    /// Re-seeding is a no-op.
    pub fn seed(&self) {
        let mut patterns = self.patterns.lock();
        if !patterns.is_empty() {
            return;
        }
        for (fraud_type, amount, billing, payment, shipping, severity, range) in SEED_PATTERNS {
            let desc = describe_transaction(*amount, billing, payment, shipping);
            patterns.push(FraudPattern {
                vector: embed_text(&desc).to_vec(),
                description: desc,
                meta: FraudPatternMeta {
                    fraud_type: fraud_type.to_string(),
                    severity: *severity,
                    example_amount_range: *range,
                    created_at: Utc::now(),
                    source: PatternSource::Seeded,
                },
            });
        }
    }

    /// Top-k nearest neighbours by cosine similarity, filtered to hits
    /// >= 0.7. Returns fewer than k if there aren't enough candidates.
    pub fn search(&self, query_text: &str, k: usize) -> Vec<(FraudPattern, f32)> {
        let query_vec = embed_text(query_text);
        let patterns = self.patterns.lock();
        let mut scored: Vec<(FraudPattern, f32)> = patterns
            .iter()
            .map(|p| (p.clone(), cosine(&query_vec, &p.vector)))
            .filter(|(_, sim)| *sim >= 0.7)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        scored.truncate(k);
        scored
    }

    /// Idempotent on (description, fraud_type) within 1 minute.
    pub fn insert(&self, description: &str, meta: FraudPatternMeta, dedup_secs: i64) {
        let mut patterns = self.patterns.lock();
        let now = Utc::now();
        let is_dup = patterns.iter().any(|p| {
            p.description == description
                && p.meta.fraud_type == meta.fraud_type
                && (now - p.meta.created_at).num_seconds() <= dedup_secs
        });
        if is_dup {
            return;
        }
        patterns.push(FraudPattern {
            description: description.to_string(),
            vector: embed_text(description).to_vec(),
            meta,
        });
    }

    pub fn len(&self) -> usize {
        self.patterns.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for VectorKb {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeding_inserts_ten_patterns_and_is_idempotent() {
        let kb = VectorKb::new();
        kb.seed();
        assert_eq!(kb.len(), 10);
        kb.seed();
        assert_eq!(kb.len(), 10);
    }

    #[test]
    fn searching_with_a_seeded_patterns_own_description_surfaces_it() {
        let kb = VectorKb::new();
        kb.seed();
        let (_, amount, billing, payment, shipping, ..) = SEED_PATTERNS[0];
        let desc = describe_transaction(amount, billing, payment, shipping);
        let hits = kb.search(&desc, 5);
        assert!(hits.iter().any(|(p, sim)| p.description == desc && *sim >= 0.95));
    }

    /// Proves seed and query share vocabulary: a `describe()`-shaped query
    /// for a transaction that merely resembles an archetype's profile (same
    /// country pair, payment method, mismatch — different amount) must
    /// still clear the 0.7 similarity floor, not just the archetype's own
    /// verbatim text.
    #[test]
    fn a_transaction_matching_a_seeded_archetypes_profile_surfaces_it() {
        let kb = VectorKb::new();
        kb.seed();
        let query = describe_transaction(135.50, "US", "card", "CN");
        let hits = kb.search(&query, 5);
        assert!(hits.iter().any(|(p, sim)| p.meta.fraud_type == "geo_mismatch" && *sim >= 0.7));
    }

    #[test]
    fn insert_is_deduplicated_within_the_window() {
        let kb = VectorKb::new();
        let meta = FraudPatternMeta {
            fraud_type: "card_testing".to_string(),
            severity: Severity::High,
            example_amount_range: (1.0, 5.0),
            created_at: Utc::now(),
            source: PatternSource::Learned,
        };
        kb.insert("a new learned pattern", meta.clone(), 60);
        kb.insert("a new learned pattern", meta, 60);
        assert_eq!(kb.len(), 1);
    }
}
