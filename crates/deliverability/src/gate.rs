//! Deliverability verdicts and chunked bulk validation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use cadence_core::config::DeliverabilityConfig;
use cadence_suppression::SuppressionList;

use crate::validate::{validate_address, ValidationReport};

/// Outcome of a full deliverability check for one address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverabilityVerdict {
    pub report: ValidationReport,
    pub suppressed: bool,
    /// Valid syntax, not disposable, not suppressed, MX not known-bad.
    pub deliverable: bool,
}

/// Validates addresses and answers deliverability questions against the
/// suppression store.
pub struct DeliverabilityGate {
    config: DeliverabilityConfig,
    suppressions: Arc<SuppressionList>,
}

impl DeliverabilityGate {
    pub fn new(config: DeliverabilityConfig, suppressions: Arc<SuppressionList>) -> Self {
        Self {
            config,
            suppressions,
        }
    }

    /// Deliverable = syntactically valid AND not disposable AND not
    /// suppressed. The MX probe is best-effort and treated as passing when
    /// disabled or unavailable.
    pub fn verify_deliverability(
        &self,
        organization_id: Uuid,
        address: &str,
    ) -> DeliverabilityVerdict {
        let report = validate_address(address);
        let suppressed = self
            .suppressions
            .is_suppressed(organization_id, address, None);

        let mx_ok = !self.config.mx_check_enabled || self.probe_mx(&report);
        let deliverable = report.valid && !report.disposable && !suppressed && mx_ok;

        DeliverabilityVerdict {
            report,
            suppressed,
            deliverable,
        }
    }

    /// Validate a batch in fixed-size chunks. Items within a chunk run in
    /// parallel; a chunk completes before the next chunk starts. Results
    /// preserve input order.
    pub async fn bulk_validate(
        &self,
        organization_id: Uuid,
        addresses: Vec<String>,
    ) -> Vec<DeliverabilityVerdict> {
        let total = addresses.len();
        let chunk_size = self.config.validation_chunk_size.max(1);
        let mut verdicts = Vec::with_capacity(total);

        for chunk in addresses.chunks(chunk_size) {
            let handles: Vec<_> = chunk
                .iter()
                .cloned()
                .map(|address| tokio::task::spawn_blocking(move || validate_address(&address)))
                .collect();

            for handle in handles {
                let report = handle.await.unwrap_or_else(|_| ValidationReport {
                    address: String::new(),
                    valid: false,
                    errors: vec!["validation task failed".to_string()],
                    role_account: false,
                    disposable: false,
                });
                let suppressed =
                    self.suppressions
                        .is_suppressed(organization_id, &report.address, None);
                let mx_ok = !self.config.mx_check_enabled || self.probe_mx(&report);
                let deliverable = report.valid && !report.disposable && !suppressed && mx_ok;
                verdicts.push(DeliverabilityVerdict {
                    report,
                    suppressed,
                    deliverable,
                });
            }
            debug!(done = verdicts.len(), total, "bulk validation chunk committed");
        }

        info!(total, "bulk validation finished");
        verdicts
    }

    /// Best-effort MX presence probe. Without a resolver wired in this
    /// always passes; a failing probe must never be the only reason an
    /// address is rejected.
    fn probe_mx(&self, _report: &ValidationReport) -> bool {
        true
    }
}
