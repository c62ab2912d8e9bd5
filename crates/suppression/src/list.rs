//! Organization-scoped suppression entries with lifecycle state, expiry
//! support, and bulk import.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// Reason why a target was added to the suppression list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    #[default]
    Unsubscribe,
    Bounce,
    Complaint,
    Competitor,
    Customer,
    Manual,
    Invalid,
}

impl std::fmt::Display for SuppressionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SuppressionReason::Unsubscribe => "unsubscribe",
            SuppressionReason::Bounce => "bounce",
            SuppressionReason::Complaint => "complaint",
            SuppressionReason::Competitor => "competitor",
            SuppressionReason::Customer => "customer",
            SuppressionReason::Manual => "manual",
            SuppressionReason::Invalid => "invalid",
        };
        write!(f, "{s}")
    }
}

/// What a suppression entry blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum SuppressionTarget {
    /// A single email address.
    Address(String),
    /// Every address at a domain.
    Domain(String),
    /// A specific lead, regardless of address.
    Lead(Uuid),
}

/// Lifecycle of an entry. Entries are never deleted, only revoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Active,
    Revoked,
}

/// A single suppression record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuppressionEntry {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub target: SuppressionTarget,
    pub reason: SuppressionReason,
    pub state: EntryState,
    pub created_at: DateTime<Utc>,
    /// If set, the entry stops matching at this time.
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: String,
}

impl SuppressionEntry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        if self.state != EntryState::Active {
            return false;
        }
        match self.expires_at {
            Some(exp) => exp > now,
            None => true,
        }
    }
}

// ---------------------------------------------------------------------------
// SuppressionList
// ---------------------------------------------------------------------------

/// Thread-safe suppression store keyed by organization.
pub struct SuppressionList {
    entries: DashMap<Uuid, Vec<SuppressionEntry>>,
}

impl SuppressionList {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Add a suppression entry for the organization.
    ///
    /// * `ttl_days` - optional time-to-live in days; the entry stops
    ///   matching after this period.
    pub fn add(
        &self,
        organization_id: Uuid,
        target: SuppressionTarget,
        reason: SuppressionReason,
        created_by: &str,
        ttl_days: Option<u32>,
    ) -> SuppressionEntry {
        let now = Utc::now();
        let entry = SuppressionEntry {
            id: Uuid::new_v4(),
            organization_id,
            target,
            reason,
            state: EntryState::Active,
            created_at: now,
            expires_at: ttl_days.map(|d| now + Duration::days(i64::from(d))),
            created_by: created_by.to_string(),
        };

        self.entries
            .entry(organization_id)
            .or_default()
            .push(entry.clone());

        tracing::info!(
            organization_id = %organization_id,
            target = ?entry.target,
            reason = %entry.reason,
            "suppression entry added"
        );
        entry
    }

    /// Revoke entries matching `target` for the organization. Returns the
    /// number of entries revoked.
    pub fn revoke(&self, organization_id: Uuid, target: &SuppressionTarget) -> usize {
        let mut revoked = 0usize;
        if let Some(mut list) = self.entries.get_mut(&organization_id) {
            for entry in list.iter_mut() {
                if entry.state == EntryState::Active && entry.target == *target {
                    entry.state = EntryState::Revoked;
                    revoked += 1;
                }
            }
        }
        if revoked > 0 {
            tracing::info!(organization_id = %organization_id, revoked, "suppression entries revoked");
        }
        revoked
    }

    /// Find the first live entry matching the given address or lead.
    /// Address comparison is case-insensitive; domain entries match the
    /// address's domain part.
    pub fn find_match(
        &self,
        organization_id: Uuid,
        email: &str,
        lead_id: Option<Uuid>,
    ) -> Option<SuppressionEntry> {
        let now = Utc::now();
        let email_lower = email.to_lowercase();
        let domain = email_lower.rsplit_once('@').map(|(_, d)| d.to_string());

        let list = self.entries.get(&organization_id)?;
        list.iter()
            .find(|entry| {
                if !entry.is_live(now) {
                    return false;
                }
                match &entry.target {
                    SuppressionTarget::Address(a) => a.to_lowercase() == email_lower,
                    SuppressionTarget::Domain(d) => {
                        domain.as_deref() == Some(d.to_lowercase().as_str())
                    }
                    SuppressionTarget::Lead(id) => lead_id == Some(*id),
                }
            })
            .cloned()
    }

    /// Whether any live entry matches.
    pub fn is_suppressed(&self, organization_id: Uuid, email: &str, lead_id: Option<Uuid>) -> bool {
        self.find_match(organization_id, email, lead_id).is_some()
    }

    /// Bulk-add suppressions. Returns the number of entries added.
    pub fn bulk_import(
        &self,
        organization_id: Uuid,
        items: Vec<(SuppressionTarget, SuppressionReason)>,
    ) -> usize {
        let count = items.len();
        for (target, reason) in items {
            self.add(organization_id, target, reason, "bulk_import", None);
        }
        tracing::info!(organization_id = %organization_id, count, "bulk suppression import completed");
        count
    }

    /// All entries (live or not) for an organization.
    pub fn entries_for(&self, organization_id: Uuid) -> Vec<SuppressionEntry> {
        self.entries
            .get(&organization_id)
            .map(|l| l.clone())
            .unwrap_or_default()
    }

    /// Total number of entries across all organizations.
    pub fn count(&self) -> usize {
        self.entries.iter().map(|e| e.value().len()).sum()
    }
}

impl Default for SuppressionList {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
