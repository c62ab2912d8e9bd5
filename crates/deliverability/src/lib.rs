//! Address validation and deliverability checks for outbound email.

pub mod gate;
pub mod validate;

pub use gate::{DeliverabilityGate, DeliverabilityVerdict};
pub use validate::{
    is_disposable_domain, is_role_account, validate_address, validate_domain, validate_syntax,
    ValidationReport,
};
