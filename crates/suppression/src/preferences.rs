//! Per-lead unsubscribe preferences and durable unsubscribe tokens.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cadence_core::types::SendWindow;

/// One preference record per (organization, lead).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribePreference {
    pub organization_id: Uuid,
    pub lead_id: Uuid,
    /// Opted out of every sequence.
    pub all_sequences: bool,
    /// Category slugs the lead opted out of.
    pub category_opt_outs: Vec<String>,
    /// Frequency cap: at most this many messages per week.
    pub max_per_week: Option<u32>,
    pub preferred_window: Option<SendWindow>,
    /// Durable token used in self-service unsubscribe links.
    pub token: String,
    pub updated_at: DateTime<Utc>,
}

/// Store of unsubscribe preferences, indexed by (organization, lead) and
/// by token.
pub struct PreferenceStore {
    prefs: DashMap<(Uuid, Uuid), UnsubscribePreference>,
    by_token: DashMap<String, (Uuid, Uuid)>,
}

impl PreferenceStore {
    pub fn new() -> Self {
        Self {
            prefs: DashMap::new(),
            by_token: DashMap::new(),
        }
    }

    /// Return the existing preference record, creating a default one (with
    /// a fresh durable token) if none exists yet.
    pub fn get_or_create(&self, organization_id: Uuid, lead_id: Uuid) -> UnsubscribePreference {
        let key = (organization_id, lead_id);
        if let Some(existing) = self.prefs.get(&key) {
            return existing.clone();
        }
        let pref = UnsubscribePreference {
            organization_id,
            lead_id,
            all_sequences: false,
            category_opt_outs: Vec::new(),
            max_per_week: None,
            preferred_window: None,
            token: Uuid::new_v4().simple().to_string(),
            updated_at: Utc::now(),
        };
        self.by_token.insert(pref.token.clone(), key);
        self.prefs.insert(key, pref.clone());
        pref
    }

    /// Durable unsubscribe token for the lead, minting one on first use.
    pub fn token_for(&self, organization_id: Uuid, lead_id: Uuid) -> String {
        self.get_or_create(organization_id, lead_id).token
    }

    pub fn get(&self, organization_id: Uuid, lead_id: Uuid) -> Option<UnsubscribePreference> {
        self.prefs.get(&(organization_id, lead_id)).map(|p| p.clone())
    }

    /// Look up a preference record from a self-service link token.
    pub fn find_by_token(&self, token: &str) -> Option<UnsubscribePreference> {
        let key = self.by_token.get(token)?;
        self.prefs.get(&key).map(|p| p.clone())
    }

    /// Apply a preference update, creating the record if needed. Returns
    /// the updated record.
    pub fn update(
        &self,
        organization_id: Uuid,
        lead_id: Uuid,
        apply: impl FnOnce(&mut UnsubscribePreference),
    ) -> UnsubscribePreference {
        self.get_or_create(organization_id, lead_id);
        let mut entry = self
            .prefs
            .get_mut(&(organization_id, lead_id))
            .expect("preference record was just created");
        apply(&mut entry);
        entry.updated_at = Utc::now();
        tracing::info!(
            organization_id = %organization_id,
            lead_id = %lead_id,
            all_sequences = entry.all_sequences,
            "unsubscribe preferences updated"
        );
        entry.clone()
    }

    /// Mark the lead as opted out of all sequences.
    pub fn opt_out_all(&self, organization_id: Uuid, lead_id: Uuid) -> UnsubscribePreference {
        self.update(organization_id, lead_id, |p| p.all_sequences = true)
    }
}

impl Default for PreferenceStore {
    fn default() -> Self {
        Self::new()
    }
}
