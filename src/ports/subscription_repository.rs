//! SubscriptionRepository port - the authoritative local subscription record.
//!
//! Every write is a compare-and-swap on `version`. Implementations must bump
//! the stored version by exactly one on success and leave the row untouched
//! on mismatch. There is no cross-tenant locking.

use async_trait::async_trait;

use crate::domain::billing::Subscription;
use crate::domain::foundation::{DomainError, TenantId, Timestamp};

use super::webhook_event_repository::SaveResult;

/// Result of a compare-and-swap write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// Row updated; it now carries `new_version`.
    Applied { new_version: i64 },
    /// Stored version differs from the expected one. Nothing was written.
    VersionMismatch,
}

/// Selection for the periodic reconciliation sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepQuery {
    /// Flagged rows last written before this instant.
    pub pending_before: Timestamp,
    /// Provider-backed live rows last written before this instant.
    pub stale_before: Timestamp,
    /// Rows whose pending downgrade is due at this instant.
    pub now: Timestamp,
    pub limit: u32,
}

impl SweepQuery {
    /// Whether a row matches this query. Shared by in-process implementations.
    pub fn matches(&self, sub: &Subscription) -> bool {
        let flagged = sub.pending_reconciliation && sub.updated_at < self.pending_before;
        let stale = sub.external_subscription_id.is_some()
            && !sub.status.is_closed()
            && sub.updated_at < self.stale_before;
        flagged || stale || sub.rollover_due(self.now)
    }
}

/// Repository port for Subscription persistence.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Insert the initial row for a tenant.
    ///
    /// Returns `AlreadyExists` if the tenant already has a row.
    async fn insert(&self, subscription: &Subscription) -> Result<SaveResult, DomainError>;

    /// Find a tenant's subscription.
    async fn find_by_tenant(&self, tenant_id: &TenantId)
        -> Result<Option<Subscription>, DomainError>;

    /// Find by the provider's subscription id.
    async fn find_by_external_id(
        &self,
        external_subscription_id: &str,
    ) -> Result<Option<Subscription>, DomainError>;

    /// Write `subscription` if the stored version still equals
    /// `expected_version`.
    async fn compare_and_swap(
        &self,
        subscription: &Subscription,
        expected_version: i64,
    ) -> Result<CasOutcome, DomainError>;

    /// Rows the reconciliation sweep should look at. Rows never swept come
    /// first, then the least recently swept, then the oldest written.
    async fn find_for_sweep(&self, query: SweepQuery) -> Result<Vec<Subscription>, DomainError>;

    /// Records that the sweep visited a row, whatever the outcome. Leaves
    /// `version` and `updated_at` alone.
    async fn mark_swept(&self, tenant_id: &TenantId, at: Timestamp) -> Result<(), DomainError>;
}
