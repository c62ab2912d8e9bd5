//! Trigger-driven auto-enrollment: standing rules that enroll leads into
//! sequences when matching business events occur.

pub mod audit;
pub mod engine;
pub mod types;

pub use audit::AuditLog;
pub use engine::RuleEngine;
pub use types::{
    AutoEnrollmentLog, AutoEnrollmentRule, ExecutionWindow, LeadFilters, RuleOutcome,
    TriggerCondition, TriggerEvent, TriggerType,
};
