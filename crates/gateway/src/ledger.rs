//! Per-credential cumulative token and cost ledger with limit enforcement.
//!
//! [`UsageLedger`] is an in-memory, lock-protected store keyed by ephemeral
//! credential. Estimated usage accumulates between upstream reports; actual
//! usage arrives as cumulative session totals and replaces the counters
//! wholesale, discarding the estimate. Entries idle for an hour with no
//! active conversation are removed by the periodic sweep.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use tinge_domain::usage::{
    RequestDecision, UsageBreakdown, UsageReport, UsageSnapshot, REASON_TOKEN_LIMIT,
};

/// Entries idle longer than this (without an active conversation) expire.
const EXPIRY_IDLE_SECS: i64 = 3_600;

/// Fraction of the limit at which an entry counts as "near limit".
const NEAR_LIMIT_PERCENT: f64 = 80.0;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Running counters for a single credential.
#[derive(Debug, Clone)]
struct LedgerEntry {
    limit: u64,
    estimated_tokens: u64,
    input_tokens: u64,
    output_tokens: u64,
    actual_tokens: u64,
    breakdown: UsageBreakdown,
    estimated_cost: f64,
    actual_cost: f64,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    request_count: u64,
    conversation_active: bool,
}

impl LedgerEntry {
    fn new(limit: u64, now: DateTime<Utc>) -> Self {
        Self {
            limit,
            estimated_tokens: 0,
            input_tokens: 0,
            output_tokens: 0,
            actual_tokens: 0,
            breakdown: UsageBreakdown::default(),
            estimated_cost: 0.0,
            actual_cost: 0.0,
            created_at: now,
            last_activity: now,
            request_count: 0,
            conversation_active: false,
        }
    }

    fn current_tokens(&self) -> u64 {
        self.actual_tokens.max(self.estimated_tokens)
    }

    fn snapshot(&self) -> UsageSnapshot {
        let current = self.current_tokens();
        let usage_percent = if self.limit == 0 {
            0.0
        } else {
            current as f64 / self.limit as f64 * 100.0
        };
        UsageSnapshot {
            limit: self.limit,
            estimated_tokens: self.estimated_tokens,
            actual_tokens: self.actual_tokens,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            breakdown: self.breakdown,
            estimated_cost: self.estimated_cost,
            actual_cost: self.actual_cost,
            created_at: self.created_at,
            last_activity: self.last_activity,
            request_count: self.request_count,
            conversation_active: self.conversation_active,
            current_tokens: current,
            remaining_tokens: self.limit.saturating_sub(current),
            usage_percent,
            is_near_limit: usage_percent >= NEAR_LIMIT_PERCENT,
            is_at_limit: current >= self.limit,
        }
    }
}

/// Aggregate view over the whole ledger.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerStats {
    pub total_keys: usize,
    pub active_conversations: usize,
    pub total_estimated_tokens: u64,
    pub total_actual_tokens: u64,
    pub total_cost: f64,
    pub keys_near_limit: usize,
    pub keys_at_limit: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// UsageLedger
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// In-memory per-credential usage ledger.
///
/// Thread-safe (uses `parking_lot::RwLock`); every read-modify-write takes
/// the write lock so concurrent handlers see atomic updates.
pub struct UsageLedger {
    default_limit: u64,
    enabled: bool,
    entries: RwLock<HashMap<String, LedgerEntry>>,
}

impl UsageLedger {
    pub fn new(default_limit: u64, enabled: bool) -> Self {
        Self {
            default_limit,
            enabled,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Create the entry for `key`, or return the existing one untouched.
    pub fn initialize(&self, key: &str, limit: Option<u64>) -> UsageSnapshot {
        let mut entries = self.entries.write();
        entries
            .entry(key.to_string())
            .or_insert_with(|| LedgerEntry::new(limit.unwrap_or(self.default_limit), Utc::now()))
            .snapshot()
    }

    pub fn get(&self, key: &str) -> Option<UsageSnapshot> {
        self.entries.read().get(key).map(LedgerEntry::snapshot)
    }

    /// Add estimated tokens (and their cost) to the entry.
    ///
    /// Returns `None` when tracking is disabled or the key is unknown.
    pub fn apply_estimate(
        &self,
        key: &str,
        delta_tokens: u64,
        delta_cost: f64,
    ) -> Option<UsageSnapshot> {
        if !self.enabled {
            return None;
        }
        let mut entries = self.entries.write();
        let entry = entries.get_mut(key)?;
        entry.estimated_tokens += delta_tokens;
        entry.estimated_cost += delta_cost;
        entry.request_count += 1;
        entry.last_activity = Utc::now();
        Some(entry.snapshot())
    }

    /// Apply an upstream usage report.
    ///
    /// The report carries cumulative session totals, so every counter is
    /// replaced rather than summed, and the running estimate is discarded.
    pub fn apply_actual(&self, key: &str, report: &UsageReport) -> Option<UsageSnapshot> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(key)?;
        entry.input_tokens = report.input_tokens;
        entry.output_tokens = report.output_tokens;
        entry.actual_tokens = report.session_total();
        entry.breakdown = UsageBreakdown::from_report(report);
        entry.actual_cost = entry.breakdown.cost();
        entry.estimated_tokens = 0;
        entry.estimated_cost = 0.0;
        entry.request_count += 1;
        entry.last_activity = Utc::now();
        Some(entry.snapshot())
    }

    /// Whether a new request may be made against this credential.
    pub fn can_make_request(&self, key: &str) -> RequestDecision {
        if !self.enabled {
            return RequestDecision::allowed();
        }
        match self.entries.read().get(key) {
            Some(entry) if entry.snapshot().is_at_limit => {
                RequestDecision::denied(REASON_TOKEN_LIMIT)
            }
            _ => RequestDecision::allowed(),
        }
    }

    /// Mark whether a conversation is currently running on this credential.
    /// Active conversations are exempt from the expiry sweep.
    pub fn set_conversation_active(&self, key: &str, active: bool) -> bool {
        let mut entries = self.entries.write();
        match entries.get_mut(key) {
            Some(entry) => {
                entry.conversation_active = active;
                entry.last_activity = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Zero every counter for `key`, keeping its limit.
    pub fn reset(&self, key: &str) -> Option<UsageSnapshot> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(key)?;
        let limit = entry.limit;
        let created_at = entry.created_at;
        *entry = LedgerEntry::new(limit, Utc::now());
        entry.created_at = created_at;
        Some(entry.snapshot())
    }

    /// Aggregate statistics over all live entries.
    pub fn stats(&self) -> LedgerStats {
        let entries = self.entries.read();
        let mut stats = LedgerStats {
            total_keys: entries.len(),
            active_conversations: 0,
            total_estimated_tokens: 0,
            total_actual_tokens: 0,
            total_cost: 0.0,
            keys_near_limit: 0,
            keys_at_limit: 0,
        };
        for entry in entries.values() {
            let snapshot = entry.snapshot();
            if snapshot.conversation_active {
                stats.active_conversations += 1;
            }
            stats.total_estimated_tokens += snapshot.estimated_tokens;
            stats.total_actual_tokens += snapshot.actual_tokens;
            stats.total_cost += snapshot.actual_cost + snapshot.estimated_cost;
            if snapshot.is_at_limit {
                stats.keys_at_limit += 1;
            } else if snapshot.is_near_limit {
                stats.keys_near_limit += 1;
            }
        }
        stats
    }

    /// Remove entries idle for over an hour with no active conversation.
    /// Returns how many were removed.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::seconds(EXPIRY_IDLE_SECS);
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.conversation_active || entry.last_activity >= cutoff);
        before - entries.len()
    }

    #[cfg(test)]
    fn backdate(&self, key: &str, last_activity: DateTime<Utc>) {
        if let Some(entry) = self.entries.write().get_mut(key) {
            entry.last_activity = last_activity;
        }
    }
}
