//! Core enrollment engine — owns leads, templates, and enrollments, and
//! drives the enrollment lifecycle against the gating and scheduling
//! subsystems.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use cadence_core::config::EngineConfig;
use cadence_core::error::{CadenceError, CadenceResult, QuotaKind};
use cadence_core::event_bus::{make_event, noop_sink, EventSink, EventType};
use cadence_core::types::{
    Enrollment, EnrollmentStatus, Lead, OutcomeCounters, SequenceTemplate, StepKind, StepOutcome,
    TemplateStatus,
};
use cadence_deliverability::validate::validate_syntax;
use cadence_experiments::ExperimentEngine;
use cadence_suppression::SuppressionGate;
use cadence_timezone::detect::DetectionSource;
use cadence_timezone::TimezoneResolver;

use crate::scheduler::next_execution_time;
use crate::state_machine::EnrollmentStateMachine;

/// Who is asking for the enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollOrigin {
    /// A user acting within an organization.
    Principal(Uuid),
    /// The trigger/auto-enrollment path; the organization comes from the
    /// lead itself.
    System,
}

/// Expanded view returned by `get_details`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentDetails {
    pub enrollment: Enrollment,
    pub lead_email: String,
    pub template_name: String,
    pub total_steps: u32,
}

/// Result of a bulk enrollment run. Failures never abort the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkEnrollReport {
    pub enrolled: Vec<Uuid>,
    pub failed: Vec<(Uuid, String)>,
}

/// Orchestrates enrollments for all organizations.
pub struct EnrollmentEngine {
    leads: DashMap<Uuid, Lead>,
    templates: DashMap<Uuid, SequenceTemplate>,
    enrollments: DashMap<Uuid, Enrollment>,
    /// Sends per (template, UTC date), backing the daily send limit.
    send_counts: DashMap<(Uuid, chrono::NaiveDate), u32>,
    state_machine: EnrollmentStateMachine,
    suppression: Arc<SuppressionGate>,
    resolver: Arc<TimezoneResolver>,
    experiments: Arc<ExperimentEngine>,
    event_sink: Arc<dyn EventSink>,
    bulk_chunk_size: usize,
}

impl EnrollmentEngine {
    pub fn new(
        config: &EngineConfig,
        suppression: Arc<SuppressionGate>,
        resolver: Arc<TimezoneResolver>,
        experiments: Arc<ExperimentEngine>,
    ) -> Self {
        Self {
            leads: DashMap::new(),
            templates: DashMap::new(),
            enrollments: DashMap::new(),
            send_counts: DashMap::new(),
            state_machine: EnrollmentStateMachine::new(),
            suppression,
            resolver,
            experiments,
            event_sink: noop_sink(),
            bulk_chunk_size: config.bulk_chunk_size.max(1),
        }
    }

    /// Attach an event sink for emitting lifecycle events.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    pub fn suppression(&self) -> &Arc<SuppressionGate> {
        &self.suppression
    }

    pub fn resolver(&self) -> &Arc<TimezoneResolver> {
        &self.resolver
    }

    pub fn experiments(&self) -> &Arc<ExperimentEngine> {
        &self.experiments
    }

    // ── Lead / template storage ───────────────────────────────────────

    pub fn upsert_lead(&self, lead: Lead) -> Uuid {
        let id = lead.id;
        self.leads.insert(id, lead);
        id
    }

    pub fn get_lead(&self, id: Uuid) -> Option<Lead> {
        self.leads.get(&id).map(|l| l.clone())
    }

    /// Leads of an organization whose status is in `statuses` (all when
    /// empty), capped at `limit`.
    pub fn leads_by_status(
        &self,
        organization_id: Uuid,
        statuses: &[String],
        limit: usize,
    ) -> Vec<Lead> {
        self.leads
            .iter()
            .filter(|l| {
                l.organization_id == organization_id
                    && (statuses.is_empty() || statuses.contains(&l.status))
            })
            .take(limit)
            .map(|l| l.clone())
            .collect()
    }

    pub fn upsert_template(&self, template: SequenceTemplate) -> Uuid {
        let id = template.id;
        self.templates.insert(id, template);
        id
    }

    pub fn get_template(&self, id: Uuid) -> Option<SequenceTemplate> {
        self.templates.get(&id).map(|t| t.clone())
    }

    /// Apply a mutation to a stored template (used when a concluded test
    /// writes its winning content back).
    pub fn update_template(
        &self,
        id: Uuid,
        apply: impl FnOnce(&mut SequenceTemplate),
    ) -> CadenceResult<()> {
        let mut template = self
            .templates
            .get_mut(&id)
            .ok_or_else(|| CadenceError::not_found("Template"))?;
        apply(&mut template);
        template.updated_at = Utc::now();
        Ok(())
    }

    // ── Enrollment ────────────────────────────────────────────────────

    /// Enroll a lead into a template.
    ///
    /// Runs the suppression gate, then syntax/domain validation (persisting
    /// any validation failure onto the lead). An existing active
    /// enrollment fails with `AlreadyActive`; a finished one is
    /// reactivated at step 0. New enrollments get a variant assignment
    /// when the template has a running test, a durable unsubscribe token,
    /// and a scheduled first step.
    pub fn enroll(
        &self,
        lead_id: Uuid,
        template_id: Uuid,
        origin: EnrollOrigin,
    ) -> CadenceResult<Enrollment> {
        let lead = self
            .get_lead(lead_id)
            .ok_or_else(|| CadenceError::not_found("Lead"))?;
        let organization_id = match origin {
            EnrollOrigin::Principal(org) => org,
            EnrollOrigin::System => lead.organization_id,
        };

        let template = self
            .get_template(template_id)
            .filter(|t| t.organization_id == organization_id)
            .ok_or_else(|| CadenceError::not_found("Template"))?;
        if template.status != TemplateStatus::Active {
            return Err(CadenceError::SchemaValidation(vec![
                "template is not active".to_string(),
            ]));
        }

        let decision = self.suppression.can_enroll_lead(&lead);
        if !decision.allowed {
            let reason = decision.reason.unwrap_or_else(|| "suppressed".to_string());
            debug!(lead_id = %lead_id, reason, "enrollment blocked by suppression gate");
            return Err(CadenceError::Suppressed(reason));
        }

        // Syntax and domain only; suppression was already answered above.
        let errors = validate_syntax(&lead.email);
        if !errors.is_empty() {
            if let Some(mut stored) = self.leads.get_mut(&lead_id) {
                stored.email_validation_error = Some(errors.join("; "));
                stored.updated_at = Utc::now();
            }
            return Err(CadenceError::InvalidAddress(errors));
        }

        let now = Utc::now();

        // One enrollment row per (lead, template); reactivate if finished.
        let existing_id = self
            .enrollments
            .iter()
            .find(|e| e.lead_id == lead_id && e.template_id == template_id)
            .map(|e| e.id);
        if let Some(id) = existing_id {
            return self.reactivate(id, &template, &lead, now);
        }

        let assignment = self
            .experiments
            .running_test_for_template(template_id)
            .and_then(|test| self.experiments.assign(test.id).ok().flatten());

        // Durable token backing the unsubscribe link in every message.
        let _token = self
            .suppression
            .preferences()
            .token_for(organization_id, lead_id);

        let mut enrollment = Enrollment {
            id: Uuid::new_v4(),
            lead_id,
            template_id,
            organization_id,
            status: EnrollmentStatus::Active,
            current_step: 0,
            next_step_scheduled_at: None,
            paused_at: None,
            pause_reason: None,
            stopped_at: None,
            stop_reason: None,
            stopped_by: None,
            counters: OutcomeCounters::default(),
            test_id: assignment.map(|(t, _)| t),
            variant_id: assignment.map(|(_, v)| v),
            created_at: now,
            updated_at: now,
        };

        self.schedule_next_step_inner(&mut enrollment, &template, &lead, now);

        info!(
            enrollment_id = %enrollment.id,
            lead_id = %lead_id,
            template_id = %template_id,
            status = %enrollment.status,
            "lead enrolled"
        );
        self.event_sink.emit(make_event(
            EventType::EnrollmentCreated,
            organization_id,
            Some(lead_id),
            Some(enrollment.id),
            None,
        ));
        if let Some((_, variant_id)) = assignment {
            self.event_sink.emit(make_event(
                EventType::VariantAssigned,
                organization_id,
                Some(lead_id),
                Some(enrollment.id),
                Some(variant_id.to_string()),
            ));
        }

        self.enrollments.insert(enrollment.id, enrollment.clone());
        Ok(enrollment)
    }

    fn reactivate(
        &self,
        enrollment_id: Uuid,
        template: &SequenceTemplate,
        lead: &Lead,
        now: DateTime<Utc>,
    ) -> CadenceResult<Enrollment> {
        let mut enrollment = self
            .enrollments
            .get_mut(&enrollment_id)
            .ok_or_else(|| CadenceError::not_found("Enrollment"))?;

        if enrollment.status == EnrollmentStatus::Active {
            return Err(CadenceError::AlreadyActive);
        }

        enrollment.status = EnrollmentStatus::Active;
        enrollment.current_step = 0;
        enrollment.paused_at = None;
        enrollment.pause_reason = None;
        enrollment.stopped_at = None;
        enrollment.stop_reason = None;
        enrollment.stopped_by = None;
        enrollment.updated_at = now;

        self.schedule_next_step_inner(&mut enrollment, template, lead, now);

        info!(enrollment_id = %enrollment.id, "enrollment reactivated");
        self.event_sink.emit(make_event(
            EventType::EnrollmentReactivated,
            enrollment.organization_id,
            Some(enrollment.lead_id),
            Some(enrollment.id),
            None,
        ));
        Ok(enrollment.clone())
    }

    /// Enroll a batch in fixed-size chunks. Per-lead failures are
    /// collected; the batch continues.
    pub fn bulk_enroll(
        &self,
        lead_ids: &[Uuid],
        template_id: Uuid,
        origin: EnrollOrigin,
    ) -> BulkEnrollReport {
        let mut report = BulkEnrollReport {
            enrolled: Vec::new(),
            failed: Vec::new(),
        };

        for chunk in lead_ids.chunks(self.bulk_chunk_size) {
            for &lead_id in chunk {
                match self.enroll(lead_id, template_id, origin) {
                    Ok(enrollment) => report.enrolled.push(enrollment.id),
                    Err(err) => report.failed.push((lead_id, err.to_string())),
                }
            }
            debug!(
                done = report.enrolled.len() + report.failed.len(),
                total = lead_ids.len(),
                "bulk enroll chunk committed"
            );
        }

        info!(
            enrolled = report.enrolled.len(),
            failed = report.failed.len(),
            "bulk enroll finished"
        );
        report
    }

    /// Manual status change: pause, resume, or stop.
    pub fn update_status(
        &self,
        enrollment_id: Uuid,
        new_status: EnrollmentStatus,
        reason: Option<String>,
        actor: Option<String>,
    ) -> CadenceResult<Enrollment> {
        let (template, lead) = {
            let enrollment = self
                .enrollments
                .get(&enrollment_id)
                .ok_or_else(|| CadenceError::not_found("Enrollment"))?;
            self.state_machine.ensure(enrollment.status, new_status)?;
            // Resume needs the template and lead for re-scheduling.
            (
                self.get_template(enrollment.template_id),
                self.get_lead(enrollment.lead_id),
            )
        };

        let mut enrollment = self
            .enrollments
            .get_mut(&enrollment_id)
            .ok_or_else(|| CadenceError::not_found("Enrollment"))?;
        let now = Utc::now();

        let event_type = match new_status {
            EnrollmentStatus::Paused => {
                enrollment.paused_at = Some(now);
                enrollment.pause_reason = reason.clone();
                enrollment.next_step_scheduled_at = None;
                EventType::EnrollmentPaused
            }
            EnrollmentStatus::Active => {
                enrollment.paused_at = None;
                enrollment.pause_reason = None;
                enrollment.status = EnrollmentStatus::Active;
                match (template, lead) {
                    (Some(template), Some(lead)) => {
                        self.schedule_next_step_inner(&mut enrollment, &template, &lead, now);
                    }
                    _ => {
                        warn!(enrollment_id = %enrollment_id, "resume without template or lead");
                        enrollment.status = EnrollmentStatus::Failed;
                        enrollment.next_step_scheduled_at = None;
                    }
                }
                EventType::EnrollmentResumed
            }
            EnrollmentStatus::Stopped => {
                enrollment.stopped_at = Some(now);
                enrollment.stop_reason = reason.clone();
                enrollment.stopped_by = actor;
                enrollment.next_step_scheduled_at = None;
                EventType::EnrollmentStopped
            }
            // Completed and Failed are internal outcomes, not requestable.
            other => {
                return Err(CadenceError::InvalidTransition {
                    from: enrollment.status.to_string(),
                    to: other.to_string(),
                });
            }
        };

        // Pause/stop set status here; resume already did (or failed).
        if matches!(
            new_status,
            EnrollmentStatus::Paused | EnrollmentStatus::Stopped
        ) {
            enrollment.status = new_status;
        }
        enrollment.updated_at = now;

        info!(
            enrollment_id = %enrollment_id,
            status = %enrollment.status,
            reason = reason.as_deref().unwrap_or(""),
            "enrollment status updated"
        );
        self.event_sink.emit(make_event(
            event_type,
            enrollment.organization_id,
            Some(enrollment.lead_id),
            Some(enrollment_id),
            reason,
        ));
        Ok(enrollment.clone())
    }

    /// Compute and persist the next execution instant for the step after
    /// `current_step`, or complete the enrollment when steps are
    /// exhausted.
    pub fn schedule_next_step(&self, enrollment_id: Uuid) -> CadenceResult<Enrollment> {
        let (template, lead) = {
            let enrollment = self
                .enrollments
                .get(&enrollment_id)
                .ok_or_else(|| CadenceError::not_found("Enrollment"))?;
            (
                self.get_template(enrollment.template_id),
                self.get_lead(enrollment.lead_id),
            )
        };
        let mut enrollment = self
            .enrollments
            .get_mut(&enrollment_id)
            .ok_or_else(|| CadenceError::not_found("Enrollment"))?;

        match (template, lead) {
            (Some(template), Some(lead)) => {
                let now = Utc::now();
                self.schedule_next_step_inner(&mut enrollment, &template, &lead, now);
                Ok(enrollment.clone())
            }
            _ => {
                enrollment.status = EnrollmentStatus::Failed;
                enrollment.next_step_scheduled_at = None;
                enrollment.updated_at = Utc::now();
                self.event_sink.emit(make_event(
                    EventType::EnrollmentFailed,
                    enrollment.organization_id,
                    Some(enrollment.lead_id),
                    Some(enrollment_id),
                    Some("template or lead missing".to_string()),
                ));
                Err(CadenceError::not_found("Template"))
            }
        }
    }

    fn schedule_next_step_inner(
        &self,
        enrollment: &mut Enrollment,
        template: &SequenceTemplate,
        lead: &Lead,
        now: DateTime<Utc>,
    ) {
        let next_number = enrollment.current_step + 1;
        let Some(step) = template.step(next_number) else {
            enrollment.status = EnrollmentStatus::Completed;
            enrollment.next_step_scheduled_at = None;
            enrollment.updated_at = now;
            self.event_sink.emit(make_event(
                EventType::EnrollmentCompleted,
                enrollment.organization_id,
                Some(enrollment.lead_id),
                Some(enrollment.id),
                None,
            ));
            return;
        };

        let tz = self.timezone_for(lead, template);
        let when = next_execution_time(now, step, &template.settings, tz);
        enrollment.next_step_scheduled_at = Some(when);
        enrollment.updated_at = now;

        debug!(
            enrollment_id = %enrollment.id,
            step = next_number,
            scheduled_at = %when,
            tz = %tz,
            "step scheduled"
        );
        self.event_sink.emit(make_event(
            EventType::StepScheduled,
            enrollment.organization_id,
            Some(enrollment.lead_id),
            Some(enrollment.id),
            Some(format!("step {next_number} at {when}")),
        ));
    }

    /// Detected lead timezone, with the template's default taking over
    /// when detection bottomed out at the engine fallback.
    fn timezone_for(&self, lead: &Lead, template: &SequenceTemplate) -> Tz {
        let detection = self.resolver.detect_timezone(lead);
        if detection.source == DetectionSource::Fallback {
            if let Some(tz) = template
                .settings
                .default_timezone
                .as_deref()
                .and_then(|s| s.parse::<Tz>().ok())
            {
                return tz;
            }
        }
        detection.timezone
    }

    // ── Driver-facing queries ─────────────────────────────────────────

    /// Active enrollments whose next step is due at or before `now`.
    /// Templates that already hit their daily send limit are withheld.
    pub fn due_enrollments(&self, now: DateTime<Utc>) -> Vec<Enrollment> {
        let today = now.date_naive();
        self.enrollments
            .iter()
            .filter(|e| {
                e.status == EnrollmentStatus::Active
                    && e.next_step_scheduled_at.map(|t| t <= now).unwrap_or(false)
            })
            .filter(|e| !self.daily_limit_reached(e.template_id, today))
            .map(|e| e.clone())
            .collect()
    }

    fn daily_limit_reached(&self, template_id: Uuid, date: chrono::NaiveDate) -> bool {
        let Some(limit) = self
            .templates
            .get(&template_id)
            .and_then(|t| t.settings.daily_send_limit)
        else {
            return false;
        };
        let sent = self
            .send_counts
            .get(&(template_id, date))
            .map(|c| *c)
            .unwrap_or(0);
        sent >= limit
    }

    /// Advance a due enrollment past its current step: bump the step
    /// pointer and schedule the following one. The transport reports the
    /// actual send through `record_outcome`.
    pub fn advance_step(&self, enrollment_id: Uuid, now: DateTime<Utc>) -> CadenceResult<Enrollment> {
        let (template, lead) = {
            let enrollment = self
                .enrollments
                .get(&enrollment_id)
                .ok_or_else(|| CadenceError::not_found("Enrollment"))?;
            if enrollment.status != EnrollmentStatus::Active {
                return Err(CadenceError::InvalidTransition {
                    from: enrollment.status.to_string(),
                    to: EnrollmentStatus::Active.to_string(),
                });
            }
            if self.daily_limit_reached(enrollment.template_id, now.date_naive()) {
                return Err(CadenceError::QuotaExceeded(QuotaKind::DailySends));
            }
            (
                self.get_template(enrollment.template_id)
                    .ok_or_else(|| CadenceError::not_found("Template"))?,
                self.get_lead(enrollment.lead_id)
                    .ok_or_else(|| CadenceError::not_found("Lead"))?,
            )
        };

        let mut enrollment = self
            .enrollments
            .get_mut(&enrollment_id)
            .ok_or_else(|| CadenceError::not_found("Enrollment"))?;
        enrollment.current_step += 1;

        // Message-bearing steps count against the template's daily limit.
        if let Some(step) = template.step(enrollment.current_step) {
            if matches!(step.kind, StepKind::Message { .. }) {
                *self
                    .send_counts
                    .entry((template.id, now.date_naive()))
                    .or_insert(0) += 1;
            }
        }

        self.schedule_next_step_inner(&mut enrollment, &template, &lead, now);
        Ok(enrollment.clone())
    }

    /// Record a message-level outcome against the enrollment's counters
    /// and apply its side effects (reply-pause, bounce suppression,
    /// unsubscribe stop).
    pub fn record_outcome(
        &self,
        enrollment_id: Uuid,
        outcome: StepOutcome,
    ) -> CadenceResult<Enrollment> {
        let (organization_id, lead_email, pause_on_reply) = {
            let enrollment = self
                .enrollments
                .get(&enrollment_id)
                .ok_or_else(|| CadenceError::not_found("Enrollment"))?;
            let email = self
                .get_lead(enrollment.lead_id)
                .map(|l| l.email)
                .unwrap_or_default();
            let pause_on_reply = self
                .get_template(enrollment.template_id)
                .map(|t| t.settings.pause_on_reply)
                .unwrap_or(false);
            (enrollment.organization_id, email, pause_on_reply)
        };

        let mut enrollment = self
            .enrollments
            .get_mut(&enrollment_id)
            .ok_or_else(|| CadenceError::not_found("Enrollment"))?;
        let now = Utc::now();

        match outcome {
            StepOutcome::Sent => enrollment.counters.sent += 1,
            StepOutcome::Opened => enrollment.counters.opened += 1,
            StepOutcome::Clicked => enrollment.counters.clicked += 1,
            StepOutcome::Booked => enrollment.counters.booked += 1,
            StepOutcome::Replied => {
                enrollment.counters.replied += 1;
                if pause_on_reply && enrollment.status == EnrollmentStatus::Active {
                    enrollment.status = EnrollmentStatus::Paused;
                    enrollment.paused_at = Some(now);
                    enrollment.pause_reason = Some("replied".to_string());
                    enrollment.next_step_scheduled_at = None;
                    info!(enrollment_id = %enrollment_id, "paused on reply");
                }
            }
            StepOutcome::Bounced => {
                enrollment.counters.bounced += 1;
                self.suppression.handle_bounce(
                    organization_id,
                    &lead_email,
                    cadence_suppression::BounceType::Hard,
                );
                if enrollment.status == EnrollmentStatus::Active {
                    enrollment.status = EnrollmentStatus::Failed;
                    enrollment.stop_reason = Some("hard bounce".to_string());
                    enrollment.next_step_scheduled_at = None;
                    self.event_sink.emit(make_event(
                        EventType::EnrollmentFailed,
                        organization_id,
                        Some(enrollment.lead_id),
                        Some(enrollment_id),
                        Some("hard bounce".to_string()),
                    ));
                }
            }
            StepOutcome::Unsubscribed => {
                enrollment.counters.unsubscribed += 1;
                self.suppression
                    .preferences()
                    .opt_out_all(organization_id, enrollment.lead_id);
                if matches!(
                    enrollment.status,
                    EnrollmentStatus::Active | EnrollmentStatus::Paused
                ) {
                    enrollment.status = EnrollmentStatus::Stopped;
                    enrollment.stopped_at = Some(now);
                    enrollment.stop_reason = Some("unsubscribed".to_string());
                    enrollment.stopped_by = Some("lead".to_string());
                    enrollment.next_step_scheduled_at = None;
                    self.event_sink.emit(make_event(
                        EventType::EnrollmentStopped,
                        organization_id,
                        Some(enrollment.lead_id),
                        Some(enrollment_id),
                        Some("unsubscribed".to_string()),
                    ));
                }
            }
        }

        enrollment.updated_at = now;
        self.event_sink.emit(make_event(
            EventType::OutcomeRecorded,
            organization_id,
            Some(enrollment.lead_id),
            Some(enrollment_id),
            Some(format!("{outcome:?}").to_lowercase()),
        ));
        Ok(enrollment.clone())
    }

    // ── Queries ───────────────────────────────────────────────────────

    pub fn get_by_contact(&self, lead_id: Uuid) -> Vec<Enrollment> {
        self.enrollments
            .iter()
            .filter(|e| e.lead_id == lead_id)
            .map(|e| e.clone())
            .collect()
    }

    pub fn get_details(&self, enrollment_id: Uuid) -> CadenceResult<EnrollmentDetails> {
        let enrollment = self
            .enrollments
            .get(&enrollment_id)
            .map(|e| e.clone())
            .ok_or_else(|| CadenceError::not_found("Enrollment"))?;
        let lead = self
            .get_lead(enrollment.lead_id)
            .ok_or_else(|| CadenceError::not_found("Lead"))?;
        let template = self
            .get_template(enrollment.template_id)
            .ok_or_else(|| CadenceError::not_found("Template"))?;

        Ok(EnrollmentDetails {
            lead_email: lead.email,
            template_name: template.name.clone(),
            total_steps: template.steps.len() as u32,
            enrollment,
        })
    }

    /// All enrollments for a template; input to experiment aggregation.
    pub fn enrollments_for_template(&self, template_id: Uuid) -> Vec<Enrollment> {
        self.enrollments
            .iter()
            .filter(|e| e.template_id == template_id)
            .map(|e| e.clone())
            .collect()
    }

    /// Count of enrollments logged today is tracked by the rule engine;
    /// this counts all live rows for an organization.
    pub fn active_count(&self, organization_id: Uuid) -> usize {
        self.enrollments
            .iter()
            .filter(|e| {
                e.organization_id == organization_id && e.status == EnrollmentStatus::Active
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::config::ExperimentsConfig;
    use cadence_core::event_bus::capture_sink;
    use cadence_core::types::{SendWindow, SequenceStep, TemplateSettings};
    use cadence_suppression::{
        PreferenceStore, SuppressionList, SuppressionReason, SuppressionTarget,
    };
    use chrono::NaiveTime;
    use chrono_tz::Tz;

    fn engine() -> EnrollmentEngine {
        let list = Arc::new(SuppressionList::new());
        let prefs = Arc::new(PreferenceStore::new());
        let gate = Arc::new(SuppressionGate::new(list, prefs, 3));
        let resolver = Arc::new(TimezoneResolver::new(Tz::America__New_York));
        let experiments = Arc::new(ExperimentEngine::new(ExperimentsConfig::default()));
        EnrollmentEngine::new(&EngineConfig::default(), gate, resolver, experiments)
    }

    fn message_step(template_id: Uuid, number: u32, wait_days: u32) -> SequenceStep {
        SequenceStep {
            id: Uuid::new_v4(),
            template_id,
            step_number: number,
            kind: StepKind::Message {
                subject: format!("step {number}"),
                body: "hello".into(),
            },
            wait_days,
            wait_hours: 0,
            send_window: Some(SendWindow::new(
                NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            )),
        }
    }

    fn template_with_steps(org: Uuid, steps: u32) -> SequenceTemplate {
        let id = Uuid::new_v4();
        let now = Utc::now();
        SequenceTemplate {
            id,
            organization_id: org,
            name: "Outbound".into(),
            status: TemplateStatus::Active,
            steps: (1..=steps)
                .map(|n| message_step(id, n, if n == 1 { 0 } else { 2 }))
                .collect(),
            settings: TemplateSettings {
                pause_on_reply: true,
                skip_weekends: false,
                timezone_aware: false,
                daily_send_limit: None,
                default_timezone: None,
            },
            created_at: now,
            updated_at: now,
        }
    }

    fn seeded(steps: u32) -> (EnrollmentEngine, Uuid, Uuid, Uuid) {
        let e = engine();
        let org = Uuid::new_v4();
        let lead = Lead::new(org, "jane@techstartup.io");
        let lead_id = e.upsert_lead(lead);
        let template = template_with_steps(org, steps);
        let template_id = e.upsert_template(template);
        (e, org, lead_id, template_id)
    }

    #[test]
    fn test_enroll_creates_active_enrollment_with_schedule() {
        let (e, _org, lead_id, template_id) = seeded(2);

        let enrollment = e.enroll(lead_id, template_id, EnrollOrigin::System).unwrap();
        assert_eq!(enrollment.status, EnrollmentStatus::Active);
        assert_eq!(enrollment.current_step, 0);
        assert!(enrollment.next_step_scheduled_at.is_some());

        // Exactly one enrollment for the pair.
        assert_eq!(e.get_by_contact(lead_id).len(), 1);
    }

    #[test]
    fn test_zero_step_template_completes_immediately() {
        let (e, _org, lead_id, template_id) = seeded(0);

        let enrollment = e.enroll(lead_id, template_id, EnrollOrigin::System).unwrap();
        assert_eq!(enrollment.status, EnrollmentStatus::Completed);
        assert!(enrollment.next_step_scheduled_at.is_none());
    }

    #[test]
    fn test_missing_lead_or_template() {
        let (e, org, lead_id, _template_id) = seeded(1);
        assert!(matches!(
            e.enroll(Uuid::new_v4(), Uuid::new_v4(), EnrollOrigin::System),
            Err(CadenceError::NotFound(_))
        ));
        // Template from another organization is invisible to a principal.
        let foreign_template = template_with_steps(Uuid::new_v4(), 1);
        let foreign_id = e.upsert_template(foreign_template);
        assert!(matches!(
            e.enroll(lead_id, foreign_id, EnrollOrigin::Principal(org)),
            Err(CadenceError::NotFound(_))
        ));
    }

    #[test]
    fn test_suppressed_lead_fails_regardless_of_deliverability() {
        let (e, org, lead_id, template_id) = seeded(1);
        e.suppression().list().add(
            org,
            SuppressionTarget::Address("jane@techstartup.io".into()),
            SuppressionReason::Unsubscribe,
            "test",
            None,
        );

        let err = e.enroll(lead_id, template_id, EnrollOrigin::System).unwrap_err();
        assert!(matches!(err, CadenceError::Suppressed(_)));
    }

    #[test]
    fn test_invalid_address_persisted_on_lead() {
        let (e, org, _lead, template_id) = seeded(1);
        let bad = Lead::new(org, "not-an-email");
        let bad_id = e.upsert_lead(bad);

        let err = e.enroll(bad_id, template_id, EnrollOrigin::System).unwrap_err();
        assert!(matches!(err, CadenceError::InvalidAddress(_)));
        assert!(e.get_lead(bad_id).unwrap().email_validation_error.is_some());
    }

    #[test]
    fn test_duplicate_active_enrollment_rejected() {
        let (e, _org, lead_id, template_id) = seeded(2);
        e.enroll(lead_id, template_id, EnrollOrigin::System).unwrap();

        let err = e.enroll(lead_id, template_id, EnrollOrigin::System).unwrap_err();
        assert!(matches!(err, CadenceError::AlreadyActive));
    }

    #[test]
    fn test_reenrollment_after_stop_resets_step_pointer() {
        let (e, _org, lead_id, template_id) = seeded(2);
        let enrollment = e.enroll(lead_id, template_id, EnrollOrigin::System).unwrap();
        e.advance_step(enrollment.id, Utc::now()).unwrap();
        e.update_status(
            enrollment.id,
            EnrollmentStatus::Stopped,
            Some("manual".into()),
            Some("rep@org".into()),
        )
        .unwrap();

        let again = e.enroll(lead_id, template_id, EnrollOrigin::System).unwrap();
        assert_eq!(again.id, enrollment.id);
        assert_eq!(again.status, EnrollmentStatus::Active);
        assert_eq!(again.current_step, 0);
        assert!(again.stopped_at.is_none());
        assert!(again.next_step_scheduled_at.is_some());
    }

    #[test]
    fn test_pause_clears_schedule_resume_restores_it() {
        let (e, _org, lead_id, template_id) = seeded(2);
        let enrollment = e.enroll(lead_id, template_id, EnrollOrigin::System).unwrap();

        let paused = e
            .update_status(
                enrollment.id,
                EnrollmentStatus::Paused,
                Some("vacation".into()),
                None,
            )
            .unwrap();
        assert_eq!(paused.status, EnrollmentStatus::Paused);
        assert!(paused.paused_at.is_some());
        assert!(paused.next_step_scheduled_at.is_none());

        let resumed = e
            .update_status(enrollment.id, EnrollmentStatus::Active, None, None)
            .unwrap();
        assert_eq!(resumed.status, EnrollmentStatus::Active);
        assert!(resumed.paused_at.is_none());
        assert!(resumed.next_step_scheduled_at.is_some());
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let (e, _org, lead_id, template_id) = seeded(1);
        let enrollment = e.enroll(lead_id, template_id, EnrollOrigin::System).unwrap();

        // Active -> Active is not in the table.
        assert!(matches!(
            e.update_status(enrollment.id, EnrollmentStatus::Active, None, None),
            Err(CadenceError::InvalidTransition { .. })
        ));
        // Completed is never requestable.
        assert!(matches!(
            e.update_status(enrollment.id, EnrollmentStatus::Completed, None, None),
            Err(CadenceError::InvalidTransition { .. })
        ));

        e.update_status(enrollment.id, EnrollmentStatus::Stopped, None, None)
            .unwrap();
        assert!(matches!(
            e.update_status(enrollment.id, EnrollmentStatus::Active, None, None),
            Err(CadenceError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_advance_through_all_steps_completes() {
        let (e, _org, lead_id, template_id) = seeded(2);
        let enrollment = e.enroll(lead_id, template_id, EnrollOrigin::System).unwrap();

        let after_first = e.advance_step(enrollment.id, Utc::now()).unwrap();
        assert_eq!(after_first.current_step, 1);
        assert_eq!(after_first.status, EnrollmentStatus::Active);
        assert!(after_first.next_step_scheduled_at.is_some());

        let after_second = e.advance_step(enrollment.id, Utc::now()).unwrap();
        assert_eq!(after_second.current_step, 2);
        assert_eq!(after_second.status, EnrollmentStatus::Completed);
        assert!(after_second.next_step_scheduled_at.is_none());
    }

    #[test]
    fn test_due_enrollments_and_daily_limit() {
        let (e, org, lead_id, _) = seeded(1);
        let mut template = template_with_steps(org, 2);
        template.settings.daily_send_limit = Some(1);
        // Make steps immediate so everything is due.
        for step in &mut template.steps {
            step.send_window = None;
            step.wait_days = 0;
        }
        let template_id = e.upsert_template(template);

        let second_lead = e.upsert_lead(Lead::new(org, "sam@othercorp.com"));
        let e1 = e.enroll(lead_id, template_id, EnrollOrigin::System).unwrap();
        e.enroll(second_lead, template_id, EnrollOrigin::System).unwrap();

        let now = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(e.due_enrollments(now).len(), 2);

        // First send exhausts the daily limit of 1.
        e.advance_step(e1.id, now).unwrap();
        assert!(e.due_enrollments(now).is_empty());

        let second = e.get_by_contact(second_lead).pop().unwrap();
        assert!(matches!(
            e.advance_step(second.id, now),
            Err(CadenceError::QuotaExceeded(QuotaKind::DailySends))
        ));
    }

    #[test]
    fn test_reply_pauses_when_template_says_so() {
        let (e, _org, lead_id, template_id) = seeded(2);
        let enrollment = e.enroll(lead_id, template_id, EnrollOrigin::System).unwrap();

        let updated = e.record_outcome(enrollment.id, StepOutcome::Replied).unwrap();
        assert_eq!(updated.status, EnrollmentStatus::Paused);
        assert_eq!(updated.pause_reason.as_deref(), Some("replied"));
        assert_eq!(updated.counters.replied, 1);
    }

    #[test]
    fn test_bounce_fails_enrollment_and_suppresses() {
        let (e, org, lead_id, template_id) = seeded(2);
        let enrollment = e.enroll(lead_id, template_id, EnrollOrigin::System).unwrap();

        let updated = e.record_outcome(enrollment.id, StepOutcome::Bounced).unwrap();
        assert_eq!(updated.status, EnrollmentStatus::Failed);
        assert!(e
            .suppression()
            .list()
            .is_suppressed(org, "jane@techstartup.io", None));
    }

    #[test]
    fn test_unsubscribe_stops_and_opts_out() {
        let (e, org, lead_id, template_id) = seeded(2);
        let enrollment = e.enroll(lead_id, template_id, EnrollOrigin::System).unwrap();

        let updated = e
            .record_outcome(enrollment.id, StepOutcome::Unsubscribed)
            .unwrap();
        assert_eq!(updated.status, EnrollmentStatus::Stopped);
        assert!(e
            .suppression()
            .preferences()
            .get(org, lead_id)
            .unwrap()
            .all_sequences);
    }

    #[test]
    fn test_bulk_enroll_collects_failures() {
        let (e, org, lead_id, template_id) = seeded(2);
        let bad = e.upsert_lead(Lead::new(org, "broken@@example.com"));
        let missing = Uuid::new_v4();

        let report = e.bulk_enroll(&[lead_id, bad, missing], template_id, EnrollOrigin::System);
        assert_eq!(report.enrolled.len(), 1);
        assert_eq!(report.failed.len(), 2);
        assert!(report.failed.iter().any(|(id, _)| *id == bad));
        assert!(report.failed.iter().any(|(id, _)| *id == missing));
    }

    #[test]
    fn test_events_emitted_on_enroll() {
        let list = Arc::new(SuppressionList::new());
        let prefs = Arc::new(PreferenceStore::new());
        let gate = Arc::new(SuppressionGate::new(list, prefs, 3));
        let resolver = Arc::new(TimezoneResolver::new(Tz::America__New_York));
        let experiments = Arc::new(ExperimentEngine::new(ExperimentsConfig::default()));
        let sink = capture_sink();
        let e = EnrollmentEngine::new(&EngineConfig::default(), gate, resolver, experiments)
            .with_event_sink(sink.clone());

        let org = Uuid::new_v4();
        let lead_id = e.upsert_lead(Lead::new(org, "jane@techstartup.io"));
        let template_id = e.upsert_template(template_with_steps(org, 1));

        e.enroll(lead_id, template_id, EnrollOrigin::System).unwrap();
        assert_eq!(sink.count_type(EventType::EnrollmentCreated), 1);
        assert_eq!(sink.count_type(EventType::StepScheduled), 1);
    }

    #[test]
    fn test_unsubscribe_token_minted_at_enroll() {
        let (e, org, lead_id, template_id) = seeded(1);
        e.enroll(lead_id, template_id, EnrollOrigin::System).unwrap();
        let pref = e.suppression().preferences().get(org, lead_id).unwrap();
        assert!(!pref.token.is_empty());
    }
}
