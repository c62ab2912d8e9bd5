//! Experiment lifecycle engine — test/variant management, assignment at
//! enrollment time, results, and conclusion.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use cadence_core::config::ExperimentsConfig;
use cadence_core::error::{CadenceError, CadenceResult};
use cadence_core::event_bus::{make_event, noop_sink, EventSink, EventType};
use cadence_core::types::{
    Enrollment, ExperimentTest, ExperimentVariant, SequenceTemplate, StepKind, StepOverride,
    TestSettings, TestStatus, VariantKind,
};

use crate::assignment::pick_variant;
use crate::stats::{aggregate_variant, pick_winner, VariantMetrics};

/// Per-variant metrics plus the significance verdict for one test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResults {
    pub test_id: Uuid,
    pub status: TestStatus,
    pub metrics: Vec<VariantMetrics>,
    /// (variant id, relative improvement over control), when significant.
    pub winner: Option<(Uuid, f64)>,
    /// Advisory strings; never blocking.
    pub recommendations: Vec<String>,
}

/// What `conclude_test` decided and applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConclusionReport {
    pub test_id: Uuid,
    pub winner_variant_id: Option<Uuid>,
    pub confidence: Option<f64>,
    /// Number of step overrides copied onto the live template.
    pub applied_overrides: usize,
    pub results: TestResults,
}

fn status_name(status: TestStatus) -> String {
    format!("{status:?}").to_lowercase()
}

/// Engine owning experiment tests for all organizations.
pub struct ExperimentEngine {
    tests: DashMap<Uuid, ExperimentTest>,
    config: ExperimentsConfig,
    rng: Mutex<StdRng>,
    event_sink: Arc<dyn EventSink>,
}

impl ExperimentEngine {
    pub fn new(config: ExperimentsConfig) -> Self {
        Self {
            tests: DashMap::new(),
            config,
            rng: Mutex::new(StdRng::from_entropy()),
            event_sink: noop_sink(),
        }
    }

    /// Replace the random source, for deterministic tests.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    // ── Test lifecycle ────────────────────────────────────────────────

    pub fn create_test(
        &self,
        organization_id: Uuid,
        template_id: Uuid,
        name: &str,
        settings: Option<TestSettings>,
        traffic_percentage: Option<u32>,
    ) -> CadenceResult<ExperimentTest> {
        let mut errors = Vec::new();
        if name.trim().is_empty() {
            errors.push("test name must not be empty".to_string());
        }
        let traffic = traffic_percentage.unwrap_or(self.config.default_traffic_percentage);
        if traffic > 100 {
            errors.push("traffic percentage must be at most 100".to_string());
        }
        if !errors.is_empty() {
            return Err(CadenceError::SchemaValidation(errors));
        }

        let mut settings = settings.unwrap_or_default();
        if settings.min_sample_size == 0 {
            settings.min_sample_size = self.config.default_min_sample_size;
        }

        let now = Utc::now();
        let test = ExperimentTest {
            id: Uuid::new_v4(),
            organization_id,
            template_id,
            name: name.to_string(),
            status: TestStatus::Draft,
            traffic_percentage: traffic,
            settings,
            variants: Vec::new(),
            winner_variant_id: None,
            winner_confidence: None,
            started_at: None,
            concluded_at: None,
            created_at: now,
            updated_at: now,
        };
        info!(test_id = %test.id, name, "experiment test created");
        self.tests.insert(test.id, test.clone());
        Ok(test)
    }

    /// Add a variant. Weights across the test must stay within 100 and a
    /// test carries exactly one control variant.
    pub fn create_variant(
        &self,
        test_id: Uuid,
        kind: VariantKind,
        name: &str,
        weight: u32,
        overrides: Vec<StepOverride>,
    ) -> CadenceResult<ExperimentVariant> {
        let mut test = self
            .tests
            .get_mut(&test_id)
            .ok_or_else(|| CadenceError::not_found("Test"))?;

        if matches!(test.status, TestStatus::Completed | TestStatus::Archived) {
            return Err(CadenceError::SchemaValidation(vec![
                "cannot add variants to a concluded test".to_string(),
            ]));
        }

        let is_control = kind == VariantKind::Control;
        if is_control && test.variants.iter().any(|v| v.is_control) {
            return Err(CadenceError::SchemaValidation(vec![
                "test already has a control variant".to_string(),
            ]));
        }

        let current: u32 = test.variants.iter().map(|v| v.weight).sum();
        if current + weight > 100 {
            return Err(CadenceError::WeightOverflow);
        }

        let variant = ExperimentVariant {
            id: Uuid::new_v4(),
            test_id,
            kind,
            name: name.to_string(),
            weight,
            is_control,
            overrides,
        };
        test.variants.push(variant.clone());
        test.updated_at = Utc::now();
        Ok(variant)
    }

    pub fn start_test(&self, test_id: Uuid) -> CadenceResult<()> {
        let mut test = self
            .tests
            .get_mut(&test_id)
            .ok_or_else(|| CadenceError::not_found("Test"))?;

        if !matches!(test.status, TestStatus::Draft | TestStatus::Paused) {
            return Err(CadenceError::InvalidTransition {
                from: status_name(test.status),
                to: status_name(TestStatus::Running),
            });
        }
        if test.variants.len() < 2 {
            return Err(CadenceError::InsufficientVariants);
        }
        if !test.variants.iter().any(|v| v.is_control) {
            return Err(CadenceError::SchemaValidation(vec![
                "test has no control variant".to_string(),
            ]));
        }

        test.status = TestStatus::Running;
        if test.started_at.is_none() {
            test.started_at = Some(Utc::now());
        }
        test.updated_at = Utc::now();
        info!(test_id = %test_id, "experiment test started");
        self.event_sink.emit(make_event(
            EventType::TestStarted,
            test.organization_id,
            None,
            None,
            Some(test.name.clone()),
        ));
        Ok(())
    }

    pub fn pause_test(&self, test_id: Uuid) -> CadenceResult<()> {
        let mut test = self
            .tests
            .get_mut(&test_id)
            .ok_or_else(|| CadenceError::not_found("Test"))?;
        if test.status != TestStatus::Running {
            return Err(CadenceError::InvalidTransition {
                from: status_name(test.status),
                to: status_name(TestStatus::Paused),
            });
        }
        test.status = TestStatus::Paused;
        test.updated_at = Utc::now();
        Ok(())
    }

    pub fn archive_test(&self, test_id: Uuid) -> CadenceResult<()> {
        let mut test = self
            .tests
            .get_mut(&test_id)
            .ok_or_else(|| CadenceError::not_found("Test"))?;
        if test.status != TestStatus::Completed {
            return Err(CadenceError::InvalidTransition {
                from: status_name(test.status),
                to: status_name(TestStatus::Archived),
            });
        }
        test.status = TestStatus::Archived;
        test.updated_at = Utc::now();
        Ok(())
    }

    // ── Queries ───────────────────────────────────────────────────────

    pub fn get_test(&self, test_id: Uuid) -> Option<ExperimentTest> {
        self.tests.get(&test_id).map(|t| t.clone())
    }

    pub fn list_tests(&self, organization_id: Uuid) -> Vec<ExperimentTest> {
        self.tests
            .iter()
            .filter(|t| t.organization_id == organization_id)
            .map(|t| t.clone())
            .collect()
    }

    /// The running test for a template, if any.
    pub fn running_test_for_template(&self, template_id: Uuid) -> Option<ExperimentTest> {
        self.tests
            .iter()
            .find(|t| t.template_id == template_id && t.status == TestStatus::Running)
            .map(|t| t.clone())
    }

    // ── Assignment ────────────────────────────────────────────────────

    /// Assign a variant for a new enrollment, honoring the test's traffic
    /// percentage. `None` means the enrollment does not participate.
    pub fn assign(&self, test_id: Uuid) -> CadenceResult<Option<(Uuid, Uuid)>> {
        let test = self
            .tests
            .get(&test_id)
            .ok_or_else(|| CadenceError::not_found("Test"))?;
        if test.status != TestStatus::Running {
            return Ok(None);
        }

        let mut rng = self.rng.lock().expect("experiment rng mutex poisoned");
        if test.traffic_percentage < 100 {
            let roll: u32 = rng.gen_range(0..100);
            if roll >= test.traffic_percentage {
                return Ok(None);
            }
        }

        let draw: f64 = rng.gen_range(0.0..100.0);
        Ok(pick_variant(&test.variants, draw).map(|v| (test.id, v.id)))
    }

    // ── Results and conclusion ────────────────────────────────────────

    /// Aggregate stored counters into per-variant metrics and a
    /// significance verdict.
    pub fn get_test_results(
        &self,
        test_id: Uuid,
        enrollments: &[Enrollment],
    ) -> CadenceResult<TestResults> {
        let test = self
            .tests
            .get(&test_id)
            .ok_or_else(|| CadenceError::not_found("Test"))?;
        Ok(self.compute_results(&test, enrollments))
    }

    fn compute_results(&self, test: &ExperimentTest, enrollments: &[Enrollment]) -> TestResults {
        let metrics: Vec<VariantMetrics> = test
            .variants
            .iter()
            .map(|v| aggregate_variant(v, &test.settings, enrollments))
            .collect();

        let winner = metrics
            .iter()
            .find(|m| m.is_control)
            .and_then(|control| pick_winner(control, metrics.iter()));

        let mut recommendations = Vec::new();
        let total_samples: u64 = metrics.iter().map(|m| m.sample_size).sum();
        if total_samples < test.settings.min_sample_size {
            recommendations.push(format!(
                "sample size not reached: {total_samples} of {} required",
                test.settings.min_sample_size
            ));
        }
        if let Some(started) = test.started_at {
            let target = started
                + chrono::Duration::days(i64::from(test.settings.target_duration_days));
            if Utc::now() < target {
                recommendations.push(format!(
                    "target duration of {} days not reached",
                    test.settings.target_duration_days
                ));
            }
        }
        for m in &metrics {
            if m.enrollments > 0 && m.unsubscribe_rate > self.config.unsubscribe_warn_rate {
                recommendations.push(format!(
                    "high unsubscribe rate on variant {:?}: {:.1}%",
                    m.kind,
                    m.unsubscribe_rate * 100.0
                ));
            }
        }

        TestResults {
            test_id: test.id,
            status: test.status,
            metrics,
            winner,
            recommendations,
        }
    }

    /// Conclude the test: record the winner (if any) and copy the winning
    /// variant's content overrides onto the live template's steps.
    pub fn conclude_test(
        &self,
        test_id: Uuid,
        enrollments: &[Enrollment],
        template: &mut SequenceTemplate,
    ) -> CadenceResult<ConclusionReport> {
        let mut test = self
            .tests
            .get_mut(&test_id)
            .ok_or_else(|| CadenceError::not_found("Test"))?;

        if !matches!(test.status, TestStatus::Running | TestStatus::Paused) {
            return Err(CadenceError::InvalidTransition {
                from: status_name(test.status),
                to: status_name(TestStatus::Completed),
            });
        }
        if template.id != test.template_id {
            return Err(CadenceError::SchemaValidation(vec![
                "template does not belong to this test".to_string(),
            ]));
        }

        let results = self.compute_results(&test, enrollments);

        test.status = TestStatus::Completed;
        test.concluded_at = Some(Utc::now());
        test.updated_at = Utc::now();

        let mut applied = 0usize;
        let confidence = results
            .winner
            .map(|_| test.settings.confidence_level.as_fraction());

        if let Some((winner_id, improvement)) = results.winner {
            test.winner_variant_id = Some(winner_id);
            test.winner_confidence = confidence;

            if let Some(variant) = test.variants.iter().find(|v| v.id == winner_id) {
                if !variant.is_control {
                    applied = apply_overrides(template, &variant.overrides);
                    info!(
                        test_id = %test_id,
                        winner = %winner_id,
                        improvement = improvement,
                        applied,
                        "winning variant applied to template"
                    );
                }
            }
        } else {
            warn!(test_id = %test_id, "test concluded without a significant winner");
        }

        self.event_sink.emit(make_event(
            EventType::TestConcluded,
            test.organization_id,
            None,
            None,
            Some(test.name.clone()),
        ));

        Ok(ConclusionReport {
            test_id,
            winner_variant_id: test.winner_variant_id,
            confidence,
            applied_overrides: applied,
            results,
        })
    }
}

/// Copy subject/body overrides onto matching message steps, keyed by step
/// number. Returns how many overrides landed.
pub fn apply_overrides(template: &mut SequenceTemplate, overrides: &[StepOverride]) -> usize {
    let mut applied = 0usize;
    for ov in overrides {
        let Some(step) = template.step_mut(ov.step_number) else {
            continue;
        };
        if let StepKind::Message { subject, body } = &mut step.kind {
            if let Some(new_subject) = &ov.subject {
                *subject = new_subject.clone();
            }
            if let Some(new_body) = &ov.body {
                *body = new_body.clone();
            }
            applied += 1;
        }
    }
    if applied > 0 {
        template.updated_at = Utc::now();
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::types::{
        ConfidenceLevel, EnrollmentStatus, OutcomeCounters, PrimaryMetric, SequenceStep,
        TemplateSettings, TemplateStatus,
    };

    fn engine() -> ExperimentEngine {
        ExperimentEngine::new(ExperimentsConfig::default()).with_rng(StdRng::seed_from_u64(11))
    }

    fn template(org: Uuid) -> SequenceTemplate {
        let id = Uuid::new_v4();
        let now = Utc::now();
        SequenceTemplate {
            id,
            organization_id: org,
            name: "Outbound".into(),
            status: TemplateStatus::Active,
            steps: vec![SequenceStep {
                id: Uuid::new_v4(),
                template_id: id,
                step_number: 1,
                kind: StepKind::Message {
                    subject: "Quick question".into(),
                    body: "Hi there".into(),
                },
                wait_days: 0,
                wait_hours: 0,
                send_window: None,
            }],
            settings: TemplateSettings::default(),
            created_at: now,
            updated_at: now,
        }
    }

    fn running_test(
        engine: &ExperimentEngine,
        template: &SequenceTemplate,
    ) -> (ExperimentTest, Uuid, Uuid) {
        let test = engine
            .create_test(
                template.organization_id,
                template.id,
                "Subject line test",
                Some(TestSettings {
                    confidence_level: ConfidenceLevel::NinetyFive,
                    primary_metric: PrimaryMetric::ReplyRate,
                    min_sample_size: 10,
                    target_duration_days: 0,
                    auto_conclude: false,
                }),
                Some(100),
            )
            .unwrap();
        let control = engine
            .create_variant(test.id, VariantKind::Control, "control", 50, Vec::new())
            .unwrap();
        let challenger = engine
            .create_variant(
                test.id,
                VariantKind::VariantA,
                "shorter subject",
                50,
                vec![StepOverride {
                    step_number: 1,
                    subject: Some("Question".into()),
                    body: None,
                }],
            )
            .unwrap();
        engine.start_test(test.id).unwrap();
        (engine.get_test(test.id).unwrap(), control.id, challenger.id)
    }

    fn enrollment_with(variant: Uuid, test: Uuid, sent: u64, replied: u64) -> Enrollment {
        let now = Utc::now();
        Enrollment {
            id: Uuid::new_v4(),
            lead_id: Uuid::new_v4(),
            template_id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            status: EnrollmentStatus::Active,
            current_step: 1,
            next_step_scheduled_at: None,
            paused_at: None,
            pause_reason: None,
            stopped_at: None,
            stop_reason: None,
            stopped_by: None,
            counters: OutcomeCounters {
                sent,
                replied,
                ..Default::default()
            },
            test_id: Some(test),
            variant_id: Some(variant),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_weight_overflow_rejected() {
        let e = engine();
        let org = Uuid::new_v4();
        let test = e
            .create_test(org, Uuid::new_v4(), "t", None, None)
            .unwrap();
        e.create_variant(test.id, VariantKind::Control, "c", 60, Vec::new())
            .unwrap();

        let err = e
            .create_variant(test.id, VariantKind::VariantA, "a", 50, Vec::new())
            .unwrap_err();
        assert!(matches!(err, CadenceError::WeightOverflow));

        // 60 + 40 is exactly 100 and fine.
        e.create_variant(test.id, VariantKind::VariantA, "a", 40, Vec::new())
            .unwrap();
    }

    #[test]
    fn test_single_control_enforced() {
        let e = engine();
        let test = e
            .create_test(Uuid::new_v4(), Uuid::new_v4(), "t", None, None)
            .unwrap();
        e.create_variant(test.id, VariantKind::Control, "c", 40, Vec::new())
            .unwrap();

        let err = e
            .create_variant(test.id, VariantKind::Control, "c2", 40, Vec::new())
            .unwrap_err();
        assert!(matches!(err, CadenceError::SchemaValidation(_)));
    }

    #[test]
    fn test_start_requires_two_variants() {
        let e = engine();
        let test = e
            .create_test(Uuid::new_v4(), Uuid::new_v4(), "t", None, None)
            .unwrap();
        e.create_variant(test.id, VariantKind::Control, "c", 50, Vec::new())
            .unwrap();

        let err = e.start_test(test.id).unwrap_err();
        assert!(matches!(err, CadenceError::InsufficientVariants));
    }

    #[test]
    fn test_assignment_only_while_running() {
        let e = engine();
        let org = Uuid::new_v4();
        let tpl = template(org);
        let test = e.create_test(org, tpl.id, "t", None, None).unwrap();
        e.create_variant(test.id, VariantKind::Control, "c", 50, Vec::new())
            .unwrap();
        e.create_variant(test.id, VariantKind::VariantA, "a", 50, Vec::new())
            .unwrap();

        // Draft test never assigns.
        assert!(e.assign(test.id).unwrap().is_none());

        e.start_test(test.id).unwrap();
        let assigned = e.assign(test.id).unwrap();
        assert!(assigned.is_some());
        assert!(e.running_test_for_template(tpl.id).is_some());
    }

    #[test]
    fn test_conclude_applies_winner_overrides() {
        let e = engine();
        let org = Uuid::new_v4();
        let mut tpl = template(org);
        let (test, control_id, challenger_id) = running_test(&e, &tpl);

        let mut enrollments = Vec::new();
        // Control: 5% reply rate over 400 sends; challenger: 20% over 400.
        for _ in 0..4 {
            enrollments.push(enrollment_with(control_id, test.id, 100, 5));
            enrollments.push(enrollment_with(challenger_id, test.id, 100, 20));
        }

        let report = e.conclude_test(test.id, &enrollments, &mut tpl).unwrap();
        assert_eq!(report.winner_variant_id, Some(challenger_id));
        assert_eq!(report.confidence, Some(0.95));
        assert_eq!(report.applied_overrides, 1);

        match &tpl.steps[0].kind {
            StepKind::Message { subject, .. } => assert_eq!(subject, "Question"),
            other => panic!("unexpected step kind {other:?}"),
        }

        let concluded = e.get_test(test.id).unwrap();
        assert_eq!(concluded.status, TestStatus::Completed);
        assert!(concluded.concluded_at.is_some());

        // A concluded test cannot be concluded again.
        let err = e.conclude_test(test.id, &enrollments, &mut tpl).unwrap_err();
        assert!(matches!(err, CadenceError::InvalidTransition { .. }));
    }

    #[test]
    fn test_overlapping_intervals_yield_no_winner() {
        let e = engine();
        let org = Uuid::new_v4();
        let mut tpl = template(org);
        let (test, control_id, challenger_id) = running_test(&e, &tpl);

        // 10% vs 11% on small samples: intervals overlap, no winner.
        let enrollments = vec![
            enrollment_with(control_id, test.id, 100, 10),
            enrollment_with(challenger_id, test.id, 100, 11),
        ];

        let report = e.conclude_test(test.id, &enrollments, &mut tpl).unwrap();
        assert!(report.winner_variant_id.is_none());
        assert_eq!(report.applied_overrides, 0);
        match &tpl.steps[0].kind {
            StepKind::Message { subject, .. } => assert_eq!(subject, "Quick question"),
            other => panic!("unexpected step kind {other:?}"),
        }
    }

    #[test]
    fn test_recommendations_are_advisory() {
        let e = engine();
        let org = Uuid::new_v4();
        let tpl = template(org);
        let (test, control_id, _) = running_test(&e, &tpl);

        // Tiny sample: expect a sample-size recommendation but no failure.
        let enrollments = vec![enrollment_with(control_id, test.id, 2, 1)];
        let results = e.get_test_results(test.id, &enrollments).unwrap();
        assert!(results
            .recommendations
            .iter()
            .any(|r| r.contains("sample size not reached")));
        assert!(results.winner.is_none());
    }

    #[test]
    fn test_archive_lifecycle() {
        let e = engine();
        let test = e
            .create_test(Uuid::new_v4(), Uuid::new_v4(), "t", None, None)
            .unwrap();
        // Draft cannot be archived.
        assert!(matches!(
            e.archive_test(test.id).unwrap_err(),
            CadenceError::InvalidTransition { .. }
        ));
    }
}
