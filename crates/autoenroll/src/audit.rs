//! Append-only audit log of rule evaluations, capacity-bounded in memory.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::{AutoEnrollmentLog, RuleOutcome};

/// In-memory audit store. Rows are never mutated; the oldest rows are
/// evicted once capacity is reached.
pub struct AuditLog {
    rows: Mutex<VecDeque<AutoEnrollmentLog>>,
    capacity: usize,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            rows: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn append(&self, row: AutoEnrollmentLog) {
        let mut rows = self.rows.lock().expect("audit log mutex poisoned");
        if rows.len() == self.capacity {
            rows.pop_front();
        }
        rows.push_back(row);
    }

    pub fn for_rule(&self, rule_id: Uuid) -> Vec<AutoEnrollmentLog> {
        self.rows
            .lock()
            .expect("audit log mutex poisoned")
            .iter()
            .filter(|r| r.rule_id == rule_id)
            .cloned()
            .collect()
    }

    pub fn for_organization(&self, organization_id: Uuid) -> Vec<AutoEnrollmentLog> {
        self.rows
            .lock()
            .expect("audit log mutex poisoned")
            .iter()
            .filter(|r| r.organization_id == organization_id)
            .cloned()
            .collect()
    }

    /// Rows for a rule with the given outcome at or after `since`. Backs
    /// the per-day quota check.
    pub fn count_since(&self, rule_id: Uuid, outcome: RuleOutcome, since: DateTime<Utc>) -> u64 {
        self.rows
            .lock()
            .expect("audit log mutex poisoned")
            .iter()
            .filter(|r| r.rule_id == rule_id && r.outcome == outcome && r.timestamp >= since)
            .count() as u64
    }

    pub fn len(&self) -> usize {
        self.rows.lock().expect("audit log mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
