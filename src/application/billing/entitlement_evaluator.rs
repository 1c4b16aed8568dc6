//! EntitlementEvaluator - the read path for limits and feature gates.
//!
//! Advisory: callers that protect an action must consult it first; this
//! service does not block anything itself.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use crate::domain::billing::{
    BillingError, Entitlement, Feature, LineLimit, PlanCatalog, Subscription,
};
use crate::domain::foundation::{TenantId, Timestamp};

use super::state_store::SubscriptionStateStore;
use super::usage_meter::UsageMeter;

/// Entitlement combined with current usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntitlementReport {
    pub entitlement: Entitlement,
    pub active_lines: u32,
    pub at_limit: bool,
}

/// Decides what a tenant may currently do.
pub struct EntitlementEvaluator {
    store: Arc<SubscriptionStateStore>,
    catalog: Arc<PlanCatalog>,
    usage: Arc<UsageMeter>,
}

impl EntitlementEvaluator {
    pub fn new(
        store: Arc<SubscriptionStateStore>,
        catalog: Arc<PlanCatalog>,
        usage: Arc<UsageMeter>,
    ) -> Self {
        Self {
            store,
            catalog,
            usage,
        }
    }

    /// Entitlement at this instant. A tenant without a row has none.
    pub async fn entitlement(&self, tenant_id: &TenantId) -> Result<Entitlement, BillingError> {
        let now = Timestamp::now();
        let subscription = match self.store.load(tenant_id).await? {
            Some(sub) => sub,
            None => Subscription::provision(*tenant_id, now),
        };
        Ok(Entitlement::evaluate(&subscription, &self.catalog, now))
    }

    /// Line limit of the tier currently in effect.
    pub async fn limit(&self, tenant_id: &TenantId) -> Result<LineLimit, BillingError> {
        Ok(self.entitlement(tenant_id).await?.line_limit)
    }

    /// True once active lines reach the limit.
    pub async fn is_at_limit(&self, tenant_id: &TenantId) -> Result<bool, BillingError> {
        Ok(self.evaluate(tenant_id).await?.at_limit)
    }

    pub async fn can_access_feature(
        &self,
        tenant_id: &TenantId,
        feature: Feature,
    ) -> Result<bool, BillingError> {
        Ok(self.entitlement(tenant_id).await?.can_access(feature))
    }

    /// Features available now.
    pub async fn features(&self, tenant_id: &TenantId) -> Result<BTreeSet<Feature>, BillingError> {
        Ok(self.entitlement(tenant_id).await?.features)
    }

    /// Entitlement plus usage in one read.
    pub async fn evaluate(&self, tenant_id: &TenantId) -> Result<EntitlementReport, BillingError> {
        let entitlement = self.entitlement(tenant_id).await?;
        let active_lines = self.usage.active_count(tenant_id).await?;
        Ok(EntitlementReport {
            at_limit: entitlement.line_limit.is_reached_by(active_lines),
            entitlement,
            active_lines,
        })
    }
}
