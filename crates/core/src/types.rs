//! Shared domain types used across the cadence engine crates.

use std::collections::HashMap;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Leads ──────────────────────────────────────────────────────────────

/// A prospect that can be enrolled into sequences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub email: String,
    pub phone: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company: Option<String>,
    pub country: Option<String>,
    pub state: Option<String>,
    /// Explicitly recorded IANA timezone, if known.
    pub timezone: Option<String>,
    pub status: String,
    pub score: i32,
    pub tags: Vec<String>,
    pub custom_fields: HashMap<String, serde_json::Value>,
    /// Last address-validation failure, persisted when an enroll attempt
    /// rejects the address.
    pub email_validation_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    /// Minimal lead with sensible defaults for the optional fields.
    pub fn new(organization_id: Uuid, email: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            email: email.into(),
            phone: None,
            first_name: None,
            last_name: None,
            company: None,
            country: None,
            state: None,
            timezone: None,
            status: "new".to_string(),
            score: 0,
            tags: Vec::new(),
            custom_fields: HashMap::new(),
            email_validation_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Domain part of the email address, lowercased.
    pub fn email_domain(&self) -> Option<String> {
        self.email.rsplit_once('@').map(|(_, d)| d.to_lowercase())
    }
}

// ─── Sequence templates ─────────────────────────────────────────────────

/// A reusable multi-step cadence definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceTemplate {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub status: TemplateStatus,
    /// Steps ordered by `step_number`, contiguous and 1-based.
    pub steps: Vec<SequenceStep>,
    pub settings: TemplateSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SequenceTemplate {
    pub fn step(&self, step_number: u32) -> Option<&SequenceStep> {
        self.steps.iter().find(|s| s.step_number == step_number)
    }

    pub fn step_mut(&mut self, step_number: u32) -> Option<&mut SequenceStep> {
        self.steps.iter_mut().find(|s| s.step_number == step_number)
    }

    /// Re-assigns contiguous 1-based step numbers after an insert or delete.
    pub fn renumber_steps(&mut self) {
        self.steps.sort_by_key(|s| s.step_number);
        for (i, step) in self.steps.iter_mut().enumerate() {
            step.step_number = i as u32 + 1;
        }
    }
}

/// Lifecycle status of a template. Templates are never deleted, only
/// deactivated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateStatus {
    Draft,
    Active,
    Deactivated,
}

/// Per-template behavior switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSettings {
    pub pause_on_reply: bool,
    pub skip_weekends: bool,
    /// Schedule steps in the lead's local timezone rather than raw UTC.
    pub timezone_aware: bool,
    pub daily_send_limit: Option<u32>,
    /// IANA zone used when a lead's timezone cannot be detected.
    pub default_timezone: Option<String>,
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self {
            pause_on_reply: true,
            skip_weekends: true,
            timezone_aware: true,
            daily_send_limit: None,
            default_timezone: None,
        }
    }
}

/// One unit of action within a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceStep {
    pub id: Uuid,
    pub template_id: Uuid,
    /// 1-based, unique per template, contiguous after any deletion.
    pub step_number: u32,
    pub kind: StepKind,
    /// Wait relative to the previous step.
    pub wait_days: u32,
    pub wait_hours: u32,
    /// Explicit local-time send window; overrides the optimal-window table.
    pub send_window: Option<SendWindow>,
}

/// Type-specific payload for a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum StepKind {
    Message { subject: String, body: String },
    Task { title: String, note: Option<String> },
    Call { script: Option<String> },
    Wait,
    Conditional { field: String, equals: serde_json::Value },
    Webhook { url: String },
    SocialAction { network: String, action: String },
}

/// A local time-of-day range considered acceptable for firing a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl SendWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Whether `t` falls inside the half-open window `[start, end)`.
    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start <= self.end {
            t >= self.start && t < self.end
        } else {
            // Window wraps midnight.
            t >= self.start || t < self.end
        }
    }
}

// ─── Enrollments ────────────────────────────────────────────────────────

/// The live instance of a lead progressing through a sequence template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub template_id: Uuid,
    pub organization_id: Uuid,
    pub status: EnrollmentStatus,
    /// 0 = not yet started; otherwise the last executed step number.
    pub current_step: u32,
    pub next_step_scheduled_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub pause_reason: Option<String>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub stop_reason: Option<String>,
    pub stopped_by: Option<String>,
    pub counters: OutcomeCounters,
    /// Experiment assignment made at enrollment time, if any.
    pub test_id: Option<Uuid>,
    pub variant_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Runtime status of an enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Paused,
    Completed,
    Stopped,
    Failed,
}

impl std::fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EnrollmentStatus::Active => "active",
            EnrollmentStatus::Paused => "paused",
            EnrollmentStatus::Completed => "completed",
            EnrollmentStatus::Stopped => "stopped",
            EnrollmentStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Per-enrollment outcome counters, aggregated by the experiment engine.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OutcomeCounters {
    pub sent: u64,
    pub opened: u64,
    pub clicked: u64,
    pub bounced: u64,
    pub replied: u64,
    pub booked: u64,
    pub unsubscribed: u64,
}

/// A message-level outcome reported back into the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Sent,
    Opened,
    Clicked,
    Bounced,
    Replied,
    Booked,
    Unsubscribed,
}

// ─── Experimentation ────────────────────────────────────────────────────

/// An A/B/n test comparing content variants of one template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentTest {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub template_id: Uuid,
    pub name: String,
    pub status: TestStatus,
    /// Share of new enrollments that participate, 0..=100.
    pub traffic_percentage: u32,
    pub settings: TestSettings,
    pub variants: Vec<ExperimentVariant>,
    pub winner_variant_id: Option<Uuid>,
    pub winner_confidence: Option<f64>,
    pub started_at: Option<DateTime<Utc>>,
    pub concluded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Draft,
    Running,
    Paused,
    Completed,
    Archived,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSettings {
    pub confidence_level: ConfidenceLevel,
    pub primary_metric: PrimaryMetric,
    pub min_sample_size: u64,
    pub target_duration_days: u32,
    pub auto_conclude: bool,
}

impl Default for TestSettings {
    fn default() -> Self {
        Self {
            confidence_level: ConfidenceLevel::NinetyFive,
            primary_metric: PrimaryMetric::ReplyRate,
            min_sample_size: 100,
            target_duration_days: 14,
            auto_conclude: false,
        }
    }
}

/// Supported confidence levels for the Wilson interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    Ninety,
    NinetyFive,
    NinetyNine,
}

impl ConfidenceLevel {
    /// Two-sided z critical value.
    pub fn z_score(&self) -> f64 {
        match self {
            ConfidenceLevel::Ninety => 1.645,
            ConfidenceLevel::NinetyFive => 1.96,
            ConfidenceLevel::NinetyNine => 2.576,
        }
    }

    pub fn as_fraction(&self) -> f64 {
        match self {
            ConfidenceLevel::Ninety => 0.90,
            ConfidenceLevel::NinetyFive => 0.95,
            ConfidenceLevel::NinetyNine => 0.99,
        }
    }
}

/// Which aggregated rate decides the test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryMetric {
    OpenRate,
    ClickRate,
    ReplyRate,
    BookingRate,
}

/// One content configuration being compared within a test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentVariant {
    pub id: Uuid,
    pub test_id: Uuid,
    pub kind: VariantKind,
    pub name: String,
    /// Distribution weight; weights across a test's variants sum to <= 100.
    pub weight: u32,
    pub is_control: bool,
    /// Content overrides keyed by step number.
    pub overrides: Vec<StepOverride>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantKind {
    Control,
    VariantA,
    VariantB,
    VariantC,
}

/// Subject/body replacement applied to one step of the template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOverride {
    pub step_number: u32,
    pub subject: Option<String>,
    pub body: Option<String>,
}
