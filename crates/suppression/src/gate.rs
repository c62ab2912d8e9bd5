//! The enrollment-facing gate: combines suppression entries, unsubscribe
//! preferences, and bounce/complaint intake.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use cadence_core::types::Lead;

use crate::list::{SuppressionList, SuppressionReason, SuppressionTarget};
use crate::preferences::PreferenceStore;

/// Allow/deny answer with a human-readable reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl GateDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Kind of bounce reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BounceType {
    Hard,
    Soft,
}

/// Gate checked before every enrollment.
pub struct SuppressionGate {
    list: Arc<SuppressionList>,
    preferences: Arc<PreferenceStore>,
    /// Soft bounces tolerated per address before suppression kicks in.
    soft_bounce_threshold: u32,
    soft_bounce_counts: DashMap<(Uuid, String), u32>,
}

impl SuppressionGate {
    pub fn new(
        list: Arc<SuppressionList>,
        preferences: Arc<PreferenceStore>,
        soft_bounce_threshold: u32,
    ) -> Self {
        Self {
            list,
            preferences,
            soft_bounce_threshold,
            soft_bounce_counts: DashMap::new(),
        }
    }

    pub fn list(&self) -> &Arc<SuppressionList> {
        &self.list
    }

    pub fn preferences(&self) -> &Arc<PreferenceStore> {
        &self.preferences
    }

    /// Deny if an active suppression entry matches the lead's address, its
    /// domain, or the lead itself, or if the lead opted out of all
    /// sequences.
    pub fn can_enroll_lead(&self, lead: &Lead) -> GateDecision {
        if let Some(entry) = self
            .list
            .find_match(lead.organization_id, &lead.email, Some(lead.id))
        {
            return GateDecision::deny(format!("suppressed ({})", entry.reason));
        }

        if let Some(pref) = self.preferences.get(lead.organization_id, lead.id) {
            if pref.all_sequences {
                return GateDecision::deny("unsubscribed from all sequences");
            }
        }

        GateDecision::allow()
    }

    /// Record a bounce from the transport. Hard bounces suppress
    /// immediately; soft bounces suppress once the threshold is crossed.
    pub fn handle_bounce(
        &self,
        organization_id: Uuid,
        email: &str,
        bounce_type: BounceType,
    ) -> Option<crate::list::SuppressionEntry> {
        match bounce_type {
            BounceType::Hard => {
                warn!(organization_id = %organization_id, email, "hard bounce, suppressing");
                Some(self.list.add(
                    organization_id,
                    SuppressionTarget::Address(email.to_lowercase()),
                    SuppressionReason::Bounce,
                    "bounce_handler",
                    None,
                ))
            }
            BounceType::Soft => {
                let key = (organization_id, email.to_lowercase());
                let mut count = self.soft_bounce_counts.entry(key).or_insert(0);
                *count += 1;
                if *count >= self.soft_bounce_threshold {
                    warn!(
                        organization_id = %organization_id,
                        email,
                        bounces = *count,
                        "soft bounce threshold crossed, suppressing"
                    );
                    Some(self.list.add(
                        organization_id,
                        SuppressionTarget::Address(email.to_lowercase()),
                        SuppressionReason::Bounce,
                        "bounce_handler",
                        None,
                    ))
                } else {
                    None
                }
            }
        }
    }

    /// A spam complaint always suppresses the address and marks the lead's
    /// preference as fully opted out.
    pub fn handle_complaint(
        &self,
        organization_id: Uuid,
        lead_id: Uuid,
        email: &str,
    ) -> crate::list::SuppressionEntry {
        info!(organization_id = %organization_id, email, "complaint received, suppressing");
        self.preferences.opt_out_all(organization_id, lead_id);
        self.list.add(
            organization_id,
            SuppressionTarget::Address(email.to_lowercase()),
            SuppressionReason::Complaint,
            "complaint_handler",
            None,
        )
    }
}
