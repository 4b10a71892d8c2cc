//! Billing reconciliation.
//!
//! The pipeline's only responsibility here is discipline: one spend event
//! per durably completed item, and exactly one `finalize` per terminal
//! job, on every exit path. Balance math lives in the ledger service.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::services::store::Ledger;

/// Credits recorded per completed item.
pub const CREDITS_PER_ITEM: u32 = 1;

/// Thin wrapper around the ledger seam.
pub struct BillingReconciler {
    ledger: Arc<dyn Ledger>,
}

impl BillingReconciler {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    /// Append one item's spend against the job's reservation.
    pub async fn record_item_spend(&self, job_id: Uuid) -> Result<(), crate::error::LedgerError> {
        self.ledger.record_spend(job_id, CREDITS_PER_ITEM).await
    }

    /// Refund the reserved-but-unspent remainder. Called exactly once per
    /// terminal job transition; a ledger failure here is logged rather
    /// than propagated so it can never mask the job's own outcome.
    pub async fn finalize(&self, user_id: Uuid, job_id: Uuid) {
        match self.ledger.finalize(user_id, job_id).await {
            Ok(refund) => {
                info!(%job_id, refund, "billing finalized");
            }
            Err(e) => {
                warn!(%job_id, error = %e, "billing finalization failed");
            }
        }
    }
}
