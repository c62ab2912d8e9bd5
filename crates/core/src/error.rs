use thiserror::Error;

pub type CadenceResult<T> = Result<T, CadenceError>;

/// What kind of enrollment quota was exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaKind {
    DailyEnrollments,
    LifetimeEnrollments,
    DailySends,
}

impl std::fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaKind::DailyEnrollments => write!(f, "daily enrollments"),
            QuotaKind::LifetimeEnrollments => write!(f, "lifetime enrollments"),
            QuotaKind::DailySends => write!(f, "daily sends"),
        }
    }
}

#[derive(Error, Debug)]
pub enum CadenceError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Enrollment already active for this lead and template")]
    AlreadyActive,

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Lead is suppressed: {0}")]
    Suppressed(String),

    #[error("Invalid email address: {}", .0.join("; "))]
    InvalidAddress(Vec<String>),

    #[error("Validation failed: {}", .0.join("; "))]
    SchemaValidation(Vec<String>),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(QuotaKind),

    #[error("A test needs at least two variants to start")]
    InsufficientVariants,

    #[error("Variant weights for this test would exceed 100")]
    WeightOverflow,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CadenceError {
    pub fn not_found(what: impl Into<String>) -> Self {
        CadenceError::NotFound(what.into())
    }
}
