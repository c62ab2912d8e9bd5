use serde::{Deserialize, Serialize};

use cadence_core::error::{CadenceError, CadenceResult};
use cadence_core::types::EnrollmentStatus;

/// Describes a single valid state transition for an enrollment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: EnrollmentStatus,
    pub to: EnrollmentStatus,
    pub trigger: String,
}

/// Guards enrollment lifecycle by enforcing a finite set of valid state
/// transitions. Completed, Stopped, and Failed are terminal.
#[derive(Debug, Clone)]
pub struct EnrollmentStateMachine {
    pub transitions: Vec<StateTransition>,
}

impl EnrollmentStateMachine {
    /// Creates a state machine with all valid transitions pre-configured.
    pub fn new() -> Self {
        let transitions = vec![
            // Active ->
            StateTransition {
                from: EnrollmentStatus::Active,
                to: EnrollmentStatus::Paused,
                trigger: "pause".to_string(),
            },
            StateTransition {
                from: EnrollmentStatus::Active,
                to: EnrollmentStatus::Stopped,
                trigger: "stop".to_string(),
            },
            StateTransition {
                from: EnrollmentStatus::Active,
                to: EnrollmentStatus::Completed,
                trigger: "steps_exhausted".to_string(),
            },
            StateTransition {
                from: EnrollmentStatus::Active,
                to: EnrollmentStatus::Failed,
                trigger: "processing_error".to_string(),
            },
            // Paused ->
            StateTransition {
                from: EnrollmentStatus::Paused,
                to: EnrollmentStatus::Active,
                trigger: "resume".to_string(),
            },
            StateTransition {
                from: EnrollmentStatus::Paused,
                to: EnrollmentStatus::Stopped,
                trigger: "stop".to_string(),
            },
        ];

        Self { transitions }
    }

    /// Returns `true` if the given transition is allowed.
    pub fn can_transition(&self, from: EnrollmentStatus, to: EnrollmentStatus) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == from && t.to == to)
    }

    /// Errors with `InvalidTransition` when the transition is not
    /// permitted.
    pub fn ensure(&self, from: EnrollmentStatus, to: EnrollmentStatus) -> CadenceResult<()> {
        if self.can_transition(from, to) {
            Ok(())
        } else {
            Err(CadenceError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            })
        }
    }
}

impl Default for EnrollmentStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
