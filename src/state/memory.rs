// In-process Memory Store (§4.2): key-value reputation records plus a
// per-user velocity window, backed by sharded concurrent maps the way the
// teacher's `StateStore` backs its account windows with `DashMap`.
//
// This struct is the system of record while the process is up — it never
// itself goes "unreachable". The fail-soft/bounded-buffer behavior the spec
// describes for an unreachable backing store is implemented one layer down,
// in `persistence`, which periodically checkpoints this store to (and
// restores it from) a durable backend.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::events::{DecisionRecord, IpReputation, UserReputation, VelocityEntry};

struct UserEntry {
    reputation: UserReputation,
    window: VecDeque<VelocityEntry>,
}

pub struct MemoryStore {
    users: DashMap<String, RwLock<UserEntry>>,
    ips: DashMap<String, RwLock<IpReputation>>,
    /// order_id -> prior decision, for idempotency (§5). Entries expire after
    /// `seen_ttl_secs`.
    seen: DashMap<String, (DecisionRecord, DateTime<Utc>)>,
    seen_ttl_secs: i64,
    velocity_window_secs: i64,

    pub total_events: AtomicU64,
    pub total_users: AtomicU64,
}

impl MemoryStore {
    pub fn new(velocity_window_secs: i64, seen_ttl_secs: i64) -> Self {
        Self {
            users: DashMap::new(),
            ips: DashMap::new(),
            seen: DashMap::new(),
            seen_ttl_secs,
            velocity_window_secs,
            total_events: AtomicU64::new(0),
            total_users: AtomicU64::new(0),
        }
    }

    fn touch_user(&self, user_id: &str, now: DateTime<Utc>) {
        if !self.users.contains_key(user_id) {
            self.users.insert(
                user_id.to_string(),
                RwLock::new(UserEntry {
                    reputation: UserReputation::new(user_id, now),
                    window: VecDeque::new(),
                }),
            );
            self.total_users.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get_user_reputation(&self, user_id: &str) -> Option<UserReputation> {
        self.users.get(user_id).map(|e| e.read().reputation.clone())
    }

    pub fn get_ip_reputation(&self, ip: &str) -> Option<IpReputation> {
        self.ips.get(ip).map(|e| e.read().clone())
    }

    /// Idempotent: refreshes TTL and increments `fraud_count` each call,
    /// matching the spec's "idempotent; increments fraud_count; refreshes
    /// TTL" contract (repeated flags for the same confirmed case are
    /// expected to keep extending the window, not no-op entirely).
    pub fn flag_user(
        &self,
        user_id: &str,
        reason: crate::events::FlagReason,
        ttl_secs: i64,
        now: DateTime<Utc>,
    ) {
        self.touch_user(user_id, now);
        if let Some(entry) = self.users.get(user_id) {
            let mut e = entry.write();
            e.reputation.flagged = true;
            e.reputation.flag_reason = Some(reason);
            e.reputation.flagged_at = Some(now);
            e.reputation.flag_ttl_secs = ttl_secs;
            e.reputation.fraud_count += 1;
        }
    }

    pub fn record_manual_review(&self, user_id: &str, now: DateTime<Utc>) {
        self.touch_user(user_id, now);
        if let Some(entry) = self.users.get(user_id) {
            entry.write().reputation.review_history.push(now);
        }
    }

    pub fn flag_ip(&self, ip: &str, now: DateTime<Utc>) {
        let entry = self
            .ips
            .entry(ip.to_string())
            .or_insert_with(|| RwLock::new(IpReputation::new(ip, now)));
        let mut e = entry.write();
        e.flagged = true;
        e.fraud_case_count += 1;
        e.last_seen = now;
    }

    pub fn touch_ip(&self, ip: &str, now: DateTime<Utc>) {
        let entry = self
            .ips
            .entry(ip.to_string())
            .or_insert_with(|| RwLock::new(IpReputation::new(ip, now)));
        entry.write().last_seen = now;
    }

    /// Append to the window; trims entries older than the rolling window.
    /// Duplicate `order_id` already present is a no-op (first-write wins).
    pub fn record_transaction(
        &self,
        user_id: &str,
        order_id: &str,
        amount: f64,
        ts: DateTime<Utc>,
    ) {
        self.touch_user(user_id, ts);
        self.total_events.fetch_add(1, Ordering::Relaxed);
        if let Some(entry) = self.users.get(user_id) {
            let mut e = entry.write();
            if e.window.iter().any(|v| v.order_id == order_id) {
                return;
            }
            e.window.push_back(VelocityEntry {
                order_id: order_id.to_string(),
                amount,
                timestamp: ts,
            });
            let cutoff = ts - chrono::Duration::seconds(self.velocity_window_secs);
            while e.window.front().map(|v| v.timestamp < cutoff).unwrap_or(false) {
                e.window.pop_front();
            }
        }
    }

    /// Ordered oldest -> newest, entries within `window_sec` of `now`.
    pub fn get_velocity_window(
        &self,
        user_id: &str,
        window_sec: i64,
        now: DateTime<Utc>,
    ) -> Vec<VelocityEntry> {
        let cutoff = now - chrono::Duration::seconds(window_sec);
        self.users
            .get(user_id)
            .map(|e| {
                e.read()
                    .window
                    .iter()
                    .filter(|v| v.timestamp > cutoff && v.timestamp <= now)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn rolling_mean_amount(&self, user_id: &str, now: DateTime<Utc>) -> Option<f64> {
        let window = self.get_velocity_window(user_id, self.velocity_window_secs, now);
        if window.is_empty() {
            return None;
        }
        Some(window.iter().map(|v| v.amount).sum::<f64>() / window.len() as f64)
    }

    pub fn rolling_stddev_amount(&self, user_id: &str, now: DateTime<Utc>) -> Option<f64> {
        let window = self.get_velocity_window(user_id, self.velocity_window_secs, now);
        if window.len() < 2 {
            return None;
        }
        let mean = window.iter().map(|v| v.amount).sum::<f64>() / window.len() as f64;
        let var = window.iter().map(|v| (v.amount - mean).powi(2)).sum::<f64>() / window.len() as f64;
        Some(var.sqrt())
    }

    pub fn rolling_count(&self, user_id: &str, now: DateTime<Utc>) -> usize {
        self.get_velocity_window(user_id, self.velocity_window_secs, now).len()
    }

    pub fn account_age_days(&self, user_id: &str, now: DateTime<Utc>) -> f64 {
        self.users
            .get(user_id)
            .map(|e| (now - e.read().reputation.first_seen).num_seconds() as f64 / 86400.0)
            .unwrap_or(0.0)
    }

    // ── Idempotency (seen-set, §5) ────────────────────────────────────────

    pub fn prior_decision(&self, order_id: &str, now: DateTime<Utc>) -> Option<DecisionRecord> {
        self.seen.get(order_id).and_then(|entry| {
            let (decision, seen_at) = entry.value();
            if (now - *seen_at).num_seconds() <= self.seen_ttl_secs {
                Some(decision.clone())
            } else {
                None
            }
        })
    }

    pub fn record_decision(&self, order_id: &str, decision: DecisionRecord, now: DateTime<Utc>) {
        self.seen.insert(order_id.to_string(), (decision, now));
    }

    /// Periodic sweep dropping expired seen-set entries and velocity window
    /// entries past the window. Mirrors the teacher's `housekeeping_loop`.
    pub fn housekeeping(&self, now: DateTime<Utc>) {
        self.seen
            .retain(|_, (_, seen_at)| (now - *seen_at).num_seconds() <= self.seen_ttl_secs);

        let cutoff = now - chrono::Duration::seconds(self.velocity_window_secs);
        for entry in self.users.iter() {
            let mut e = entry.write();
            while e.window.front().map(|v| v.timestamp < cutoff).unwrap_or(false) {
                e.window.pop_front();
            }
        }
    }

    pub fn n_users(&self) -> usize {
        self.users.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn velocity_window_trims_old_entries() {
        let store = MemoryStore::new(3600, 600);
        let t0 = now();
        store.record_transaction("u1", "o1", 10.0, t0 - chrono::Duration::hours(2));
        store.record_transaction("u1", "o2", 20.0, t0);
        let window = store.get_velocity_window("u1", 3600, t0);
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].order_id, "o2");
    }

    #[test]
    fn duplicate_order_id_is_noop() {
        let store = MemoryStore::new(3600, 600);
        let t0 = now();
        store.record_transaction("u1", "o1", 10.0, t0);
        store.record_transaction("u1", "o1", 999.0, t0);
        let window = store.get_velocity_window("u1", 3600, t0);
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].amount, 10.0);
    }

    #[test]
    fn flag_user_is_idempotent_and_refreshes_ttl() {
        let store = MemoryStore::new(3600, 600);
        let t0 = now();
        store.flag_user("u1", crate::events::FlagReason::RapidFire, 86400, t0);
        store.flag_user("u1", crate::events::FlagReason::RapidFire, 86400, t0);
        let rep = store.get_user_reputation("u1").unwrap();
        assert_eq!(rep.fraud_count, 2);
        assert!(rep.is_flag_active(t0));
    }
}
