//! Suppression and unsubscribe management — standing blocks that prevent
//! enrollment or sends to an address, domain, or lead.

pub mod gate;
pub mod list;
pub mod preferences;

pub use gate::{BounceType, GateDecision, SuppressionGate};
pub use list::{EntryState, SuppressionEntry, SuppressionList, SuppressionReason, SuppressionTarget};
pub use preferences::{PreferenceStore, UnsubscribePreference};
