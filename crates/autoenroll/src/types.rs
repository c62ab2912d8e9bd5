//! Rule, trigger, and filter types for auto-enrollment.
//!
//! Each trigger kind carries only its own fields; the rule's condition and
//! the incoming event are matched variant-by-variant.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cadence_core::types::{Lead, SendWindow};

/// The business event families that can drive enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    LeadStatusChange,
    ScoreThreshold,
    TagAdded,
    FieldUpdated,
    LeadCreated,
    Scheduled,
    Webhook,
}

/// What a rule requires of an incoming event before it fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum TriggerCondition {
    /// Fires on a status change; `None` on either side means "any".
    LeadStatusChange {
        from: Option<String>,
        to: Option<String>,
    },
    /// Fires when the new score lands inside [min, max].
    ScoreThreshold {
        min: Option<i32>,
        max: Option<i32>,
    },
    TagAdded {
        tag: String,
    },
    /// Fires when the named field is updated, optionally to a specific
    /// value.
    FieldUpdated {
        field: String,
        equals: Option<serde_json::Value>,
    },
    LeadCreated,
    /// Batch trigger: pull leads by status, up to `limit` per run.
    Scheduled {
        statuses: Vec<String>,
        limit: usize,
    },
    /// Batch trigger driven by an inbound webhook.
    Webhook {
        source: Option<String>,
        statuses: Vec<String>,
        limit: usize,
    },
}

impl TriggerCondition {
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            TriggerCondition::LeadStatusChange { .. } => TriggerType::LeadStatusChange,
            TriggerCondition::ScoreThreshold { .. } => TriggerType::ScoreThreshold,
            TriggerCondition::TagAdded { .. } => TriggerType::TagAdded,
            TriggerCondition::FieldUpdated { .. } => TriggerType::FieldUpdated,
            TriggerCondition::LeadCreated => TriggerType::LeadCreated,
            TriggerCondition::Scheduled { .. } => TriggerType::Scheduled,
            TriggerCondition::Webhook { .. } => TriggerType::Webhook,
        }
    }
}

/// An incoming business event presented to `process_trigger`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum TriggerEvent {
    LeadStatusChange {
        lead_id: Uuid,
        old: String,
        new: String,
    },
    ScoreChanged {
        lead_id: Uuid,
        score: i32,
    },
    TagAdded {
        lead_id: Uuid,
        tag: String,
    },
    FieldUpdated {
        lead_id: Uuid,
        field: String,
        value: serde_json::Value,
    },
    LeadCreated {
        lead_id: Uuid,
    },
    Scheduled,
    Webhook {
        source: String,
        payload: serde_json::Value,
    },
}

impl TriggerEvent {
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            TriggerEvent::LeadStatusChange { .. } => TriggerType::LeadStatusChange,
            TriggerEvent::ScoreChanged { .. } => TriggerType::ScoreThreshold,
            TriggerEvent::TagAdded { .. } => TriggerType::TagAdded,
            TriggerEvent::FieldUpdated { .. } => TriggerType::FieldUpdated,
            TriggerEvent::LeadCreated { .. } => TriggerType::LeadCreated,
            TriggerEvent::Scheduled => TriggerType::Scheduled,
            TriggerEvent::Webhook { .. } => TriggerType::Webhook,
        }
    }

    /// The single lead this event concerns, if it is not a batch trigger.
    pub fn lead_id(&self) -> Option<Uuid> {
        match self {
            TriggerEvent::LeadStatusChange { lead_id, .. }
            | TriggerEvent::ScoreChanged { lead_id, .. }
            | TriggerEvent::TagAdded { lead_id, .. }
            | TriggerEvent::FieldUpdated { lead_id, .. }
            | TriggerEvent::LeadCreated { lead_id } => Some(*lead_id),
            TriggerEvent::Scheduled | TriggerEvent::Webhook { .. } => None,
        }
    }
}

/// Contact-level filters applied per lead after a rule matches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeadFilters {
    /// Allowed statuses; empty allows any.
    pub statuses: Vec<String>,
    pub include_tags: Vec<String>,
    pub exclude_tags: Vec<String>,
    pub min_score: Option<i32>,
    pub max_score: Option<i32>,
    /// Exact-match requirements on custom fields.
    pub custom_fields: HashMap<String, serde_json::Value>,
}

impl LeadFilters {
    /// `None` when the lead passes; otherwise the first mismatch reason.
    pub fn mismatch(&self, lead: &Lead) -> Option<String> {
        if !self.statuses.is_empty() && !self.statuses.contains(&lead.status) {
            return Some(format!("status '{}' not in allow-list", lead.status));
        }
        for tag in &self.include_tags {
            if !lead.tags.contains(tag) {
                return Some(format!("missing tag '{tag}'"));
            }
        }
        for tag in &self.exclude_tags {
            if lead.tags.contains(tag) {
                return Some(format!("excluded tag '{tag}' present"));
            }
        }
        if let Some(min) = self.min_score {
            if lead.score < min {
                return Some(format!("score {} below minimum {min}", lead.score));
            }
        }
        if let Some(max) = self.max_score {
            if lead.score > max {
                return Some(format!("score {} above maximum {max}", lead.score));
            }
        }
        for (field, expected) in &self.custom_fields {
            match lead.custom_fields.get(field) {
                Some(actual) if actual == expected => {}
                _ => return Some(format!("custom field '{field}' mismatch")),
            }
        }
        None
    }
}

/// Day-of-week and time-of-day constraints on when a rule may run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionWindow {
    /// Allowed weekdays; empty allows every day.
    pub days: Vec<Weekday>,
    /// Allowed local time range, half-open.
    pub window: Option<SendWindow>,
    /// IANA zone the window is evaluated in; falls back to the engine
    /// default when absent or unparseable.
    pub timezone: Option<String>,
}

impl ExecutionWindow {
    pub fn allows(&self, now: DateTime<Utc>, fallback: chrono_tz::Tz) -> bool {
        let tz = self
            .timezone
            .as_deref()
            .and_then(|s| s.parse::<chrono_tz::Tz>().ok())
            .unwrap_or(fallback);
        let local = now.with_timezone(&tz);

        if !self.days.is_empty() && !self.days.contains(&local.weekday()) {
            return false;
        }
        if let Some(window) = self.window {
            if !window.contains(local.time()) {
                return false;
            }
        }
        true
    }
}

/// A standing condition that enrolls leads when matching events occur.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoEnrollmentRule {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub template_id: Uuid,
    pub name: String,
    /// Lower runs first.
    pub priority: u32,
    pub enabled: bool,
    pub condition: TriggerCondition,
    pub filters: Option<LeadFilters>,
    /// Positive values defer enrollment to an external scheduler.
    pub delay_minutes: u32,
    pub max_per_day: Option<u32>,
    pub max_total: Option<u64>,
    pub execution_window: Option<ExecutionWindow>,
    /// Best-effort lifetime counter; see the soft-cap note on quotas.
    pub enrolled_total: u64,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of one rule/lead evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOutcome {
    Enrolled,
    Skipped,
    Failed,
}

/// Append-only audit row per rule evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoEnrollmentLog {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub organization_id: Uuid,
    pub lead_id: Option<Uuid>,
    pub outcome: RuleOutcome,
    pub reason: String,
    /// The original trigger payload, kept for replay and debugging.
    pub trigger_payload: serde_json::Value,
    /// Snapshot of the filters the lead was evaluated against.
    pub evaluated_filters: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}
