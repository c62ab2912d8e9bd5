//! Rule evaluation pipeline: condition match, execution window, quotas,
//! target resolution, per-lead filters, and enrollment.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use dashmap::DashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use cadence_core::config::AutoEnrollConfig;
use cadence_core::error::{CadenceError, CadenceResult};
use cadence_core::event_bus::{make_event, noop_sink, EventSink, EventType};
use cadence_core::types::Lead;
use cadence_enrollment::{EnrollOrigin, EnrollmentEngine};

use crate::audit::AuditLog;
use crate::types::{
    AutoEnrollmentLog, AutoEnrollmentRule, ExecutionWindow, LeadFilters, RuleOutcome,
    TriggerCondition, TriggerEvent,
};

/// Evaluates incoming business events against standing rules and enrolls
/// matching leads through the enrollment engine.
pub struct RuleEngine {
    rules: DashMap<Uuid, AutoEnrollmentRule>,
    audit: Arc<AuditLog>,
    enrollment: Arc<EnrollmentEngine>,
    fallback_tz: Tz,
    max_batch_leads: usize,
    event_sink: Arc<dyn EventSink>,
}

impl RuleEngine {
    pub fn new(config: &AutoEnrollConfig, enrollment: Arc<EnrollmentEngine>) -> Self {
        let fallback_tz = enrollment.resolver().fallback();
        Self {
            rules: DashMap::new(),
            audit: Arc::new(AuditLog::new(config.audit_log_capacity)),
            enrollment,
            fallback_tz,
            max_batch_leads: config.max_batch_leads.max(1),
            event_sink: noop_sink(),
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    // ── Rule management ───────────────────────────────────────────────

    /// Validate and store a new rule.
    #[allow(clippy::too_many_arguments)]
    pub fn create_rule(
        &self,
        organization_id: Uuid,
        template_id: Uuid,
        name: &str,
        priority: u32,
        condition: TriggerCondition,
        filters: Option<LeadFilters>,
        delay_minutes: u32,
        max_per_day: Option<u32>,
        max_total: Option<u64>,
        execution_window: Option<ExecutionWindow>,
    ) -> CadenceResult<AutoEnrollmentRule> {
        let mut errors = Vec::new();
        if name.trim().is_empty() {
            errors.push("rule name must not be empty".to_string());
        }
        if max_per_day == Some(0) {
            errors.push("max_per_day of zero would never enroll".to_string());
        }
        if max_total == Some(0) {
            errors.push("max_total of zero would never enroll".to_string());
        }
        if let Some(window) = &execution_window {
            if let Some(tz) = window.timezone.as_deref() {
                if tz.parse::<Tz>().is_err() {
                    errors.push(format!("unknown timezone '{tz}' in execution window"));
                }
            }
        }
        if !errors.is_empty() {
            return Err(CadenceError::SchemaValidation(errors));
        }

        // The template must exist and belong to the same organization.
        self.enrollment
            .get_template(template_id)
            .filter(|t| t.organization_id == organization_id)
            .ok_or_else(|| CadenceError::not_found("Template"))?;

        let now = Utc::now();
        let rule = AutoEnrollmentRule {
            id: Uuid::new_v4(),
            organization_id,
            template_id,
            name: name.to_string(),
            priority,
            enabled: true,
            condition,
            filters,
            delay_minutes,
            max_per_day,
            max_total,
            execution_window,
            enrolled_total: 0,
            last_triggered_at: None,
            created_at: now,
            updated_at: now,
        };
        info!(rule_id = %rule.id, name, "auto-enrollment rule created");
        self.rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    /// Apply a mutation to an existing rule. The counter and timestamps
    /// are engine-owned and restored if the closure touches them.
    pub fn update_rule(
        &self,
        rule_id: Uuid,
        apply: impl FnOnce(&mut AutoEnrollmentRule),
    ) -> CadenceResult<AutoEnrollmentRule> {
        let mut entry = self
            .rules
            .get_mut(&rule_id)
            .ok_or_else(|| CadenceError::not_found("Rule"))?;

        let mut updated = entry.clone();
        apply(&mut updated);

        // Identity and counters stay engine-owned.
        updated.id = entry.id;
        updated.organization_id = entry.organization_id;
        updated.enrolled_total = entry.enrolled_total;
        updated.last_triggered_at = entry.last_triggered_at;
        updated.updated_at = Utc::now();

        if updated.name.trim().is_empty() {
            return Err(CadenceError::SchemaValidation(vec![
                "rule name must not be empty".to_string(),
            ]));
        }

        *entry = updated.clone();
        Ok(updated)
    }

    pub fn get_rule(&self, rule_id: Uuid) -> Option<AutoEnrollmentRule> {
        self.rules.get(&rule_id).map(|r| r.clone())
    }

    /// Rules of an organization, ordered by ascending priority.
    pub fn list_rules(&self, organization_id: Uuid) -> Vec<AutoEnrollmentRule> {
        let mut rules: Vec<AutoEnrollmentRule> = self
            .rules
            .iter()
            .filter(|r| r.organization_id == organization_id)
            .map(|r| r.clone())
            .collect();
        rules.sort_by_key(|r| r.priority);
        rules
    }

    // ── Trigger processing ────────────────────────────────────────────

    /// Evaluate `event` against every enabled rule of its trigger type,
    /// in priority order. Returns the audit rows written by this run.
    pub fn process_trigger(
        &self,
        organization_id: Uuid,
        event: &TriggerEvent,
        now: DateTime<Utc>,
    ) -> Vec<AutoEnrollmentLog> {
        let payload = serde_json::to_value(event).unwrap_or_default();
        let mut results = Vec::new();

        let mut rules: Vec<AutoEnrollmentRule> = self
            .rules
            .iter()
            .filter(|r| {
                r.organization_id == organization_id
                    && r.enabled
                    && r.condition.trigger_type() == event.trigger_type()
            })
            .map(|r| r.clone())
            .collect();
        rules.sort_by_key(|r| r.priority);

        debug!(
            organization_id = %organization_id,
            trigger = ?event.trigger_type(),
            candidates = rules.len(),
            "processing trigger"
        );

        for rule in rules {
            if !condition_matches(&rule.condition, event) {
                results.push(self.log(&rule, None, RuleOutcome::Skipped, "condition_not_matched", &payload));
                continue;
            }

            if let Some(window) = &rule.execution_window {
                if !window.allows(now, self.fallback_tz) {
                    results.push(self.log(
                        &rule,
                        None,
                        RuleOutcome::Skipped,
                        "outside_execution_window",
                        &payload,
                    ));
                    continue;
                }
            }

            if let Some(reason) = self.quota_block(&rule, now) {
                results.push(self.log(&rule, None, RuleOutcome::Skipped, &reason, &payload));
                continue;
            }

            let leads = self.resolve_targets(&rule, event);
            if leads.is_empty() {
                results.push(self.log(&rule, None, RuleOutcome::Skipped, "no_target_leads", &payload));
                continue;
            }

            for lead in leads {
                results.push(self.evaluate_lead(&rule, &lead, now, &payload));
            }
        }

        results
    }

    fn evaluate_lead(
        &self,
        rule: &AutoEnrollmentRule,
        lead: &Lead,
        now: DateTime<Utc>,
        payload: &serde_json::Value,
    ) -> AutoEnrollmentLog {
        if let Some(filters) = &rule.filters {
            if let Some(mismatch) = filters.mismatch(lead) {
                return self.log(
                    rule,
                    Some(lead.id),
                    RuleOutcome::Skipped,
                    &format!("filters_not_matched: {mismatch}"),
                    payload,
                );
            }
        }

        if rule.delay_minutes > 0 {
            // True delayed execution belongs to the external scheduler;
            // the evaluation is recorded as deferred.
            return self.log(
                rule,
                Some(lead.id),
                RuleOutcome::Skipped,
                &format!("scheduled_for_later: {} minutes", rule.delay_minutes),
                payload,
            );
        }

        match self
            .enrollment
            .enroll(lead.id, rule.template_id, EnrollOrigin::System)
        {
            Ok(enrollment) => {
                if let Some(mut stored) = self.rules.get_mut(&rule.id) {
                    stored.enrolled_total += 1;
                    stored.last_triggered_at = Some(now);
                }
                self.event_sink.emit(make_event(
                    EventType::RuleTriggered,
                    rule.organization_id,
                    Some(lead.id),
                    Some(enrollment.id),
                    Some(rule.name.clone()),
                ));
                self.log(rule, Some(lead.id), RuleOutcome::Enrolled, "enrolled", payload)
            }
            // Gating denials are informational here, never errors.
            Err(
                err @ (CadenceError::Suppressed(_)
                | CadenceError::InvalidAddress(_)
                | CadenceError::AlreadyActive),
            ) => self.log(
                rule,
                Some(lead.id),
                RuleOutcome::Skipped,
                &err.to_string(),
                payload,
            ),
            Err(err) => {
                warn!(rule_id = %rule.id, lead_id = %lead.id, error = %err, "enrollment failed");
                self.log(rule, Some(lead.id), RuleOutcome::Failed, &err.to_string(), payload)
            }
        }
    }

    /// Daily and lifetime caps, both best-effort read-then-write soft
    /// caps.
    fn quota_block(&self, rule: &AutoEnrollmentRule, now: DateTime<Utc>) -> Option<String> {
        if let Some(max_total) = rule.max_total {
            if rule.enrolled_total >= max_total {
                return Some("lifetime_quota_reached".to_string());
            }
        }
        if let Some(max_per_day) = rule.max_per_day {
            let midnight = self.local_midnight(rule, now);
            let today = self
                .audit
                .count_since(rule.id, RuleOutcome::Enrolled, midnight);
            if today >= u64::from(max_per_day) {
                return Some("daily_quota_reached".to_string());
            }
        }
        None
    }

    /// Start of the current day in the rule's execution timezone.
    fn local_midnight(&self, rule: &AutoEnrollmentRule, now: DateTime<Utc>) -> DateTime<Utc> {
        let tz = rule
            .execution_window
            .as_ref()
            .and_then(|w| w.timezone.as_deref())
            .and_then(|s| s.parse::<Tz>().ok())
            .unwrap_or(self.fallback_tz);
        let local_date = now.with_timezone(&tz).date_naive();
        local_midnight_utc(local_date, tz)
    }

    fn resolve_targets(&self, rule: &AutoEnrollmentRule, event: &TriggerEvent) -> Vec<Lead> {
        if let Some(lead_id) = event.lead_id() {
            return self.enrollment.get_lead(lead_id).into_iter().collect();
        }
        // Batch triggers query leads by the rule's own trigger config.
        let (statuses, limit) = match &rule.condition {
            TriggerCondition::Scheduled { statuses, limit } => (statuses.clone(), *limit),
            TriggerCondition::Webhook {
                statuses, limit, ..
            } => (statuses.clone(), *limit),
            _ => return Vec::new(),
        };
        let limit = limit.clamp(1, self.max_batch_leads);
        self.enrollment
            .leads_by_status(rule.organization_id, &statuses, limit)
    }

    fn log(
        &self,
        rule: &AutoEnrollmentRule,
        lead_id: Option<Uuid>,
        outcome: RuleOutcome,
        reason: &str,
        payload: &serde_json::Value,
    ) -> AutoEnrollmentLog {
        let row = AutoEnrollmentLog {
            id: Uuid::new_v4(),
            rule_id: rule.id,
            organization_id: rule.organization_id,
            lead_id,
            outcome,
            reason: reason.to_string(),
            trigger_payload: payload.clone(),
            evaluated_filters: rule
                .filters
                .as_ref()
                .and_then(|f| serde_json::to_value(f).ok()),
            timestamp: Utc::now(),
        };
        if outcome == RuleOutcome::Skipped {
            self.event_sink.emit(make_event(
                EventType::RuleSkipped,
                rule.organization_id,
                lead_id,
                None,
                Some(reason.to_string()),
            ));
        }
        self.audit.append(row.clone());
        row
    }
}

/// Condition/event matching, variant by variant. Mismatched variants never
/// match.
fn condition_matches(condition: &TriggerCondition, event: &TriggerEvent) -> bool {
    match (condition, event) {
        (
            TriggerCondition::LeadStatusChange { from, to },
            TriggerEvent::LeadStatusChange { old, new, .. },
        ) => {
            from.as_ref().map_or(true, |f| f == old) && to.as_ref().map_or(true, |t| t == new)
        }
        (
            TriggerCondition::ScoreThreshold { min, max },
            TriggerEvent::ScoreChanged { score, .. },
        ) => {
            min.map_or(true, |m| *score >= m) && max.map_or(true, |m| *score <= m)
        }
        (TriggerCondition::TagAdded { tag }, TriggerEvent::TagAdded { tag: added, .. }) => {
            tag == added
        }
        (
            TriggerCondition::FieldUpdated { field, equals },
            TriggerEvent::FieldUpdated {
                field: updated,
                value,
                ..
            },
        ) => field == updated && equals.as_ref().map_or(true, |e| e == value),
        (TriggerCondition::LeadCreated, TriggerEvent::LeadCreated { .. }) => true,
        (TriggerCondition::Scheduled { .. }, TriggerEvent::Scheduled) => true,
        (
            TriggerCondition::Webhook { source, .. },
            TriggerEvent::Webhook { source: incoming, .. },
        ) => source.as_ref().map_or(true, |s| s == incoming),
        _ => false,
    }
}

/// UTC instant of local midnight on `date` in `tz`.
fn local_midnight_utc(date: chrono::NaiveDate, tz: Tz) -> DateTime<Utc> {
    use chrono::NaiveTime;
    cadence_timezone::detect::local_to_utc(date.and_time(NaiveTime::MIN), tz)
}
