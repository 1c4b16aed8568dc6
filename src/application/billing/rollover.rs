//! Applies due pending downgrades.
//!
//! A downgrade scheduled for period end is treated as in effect by the
//! entitlement read path as soon as it is due. This persists it: the
//! provider plan is replaced without proration first, then the local row.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::billing::{BillingError, Subscription};
use crate::domain::foundation::{TenantId, Timestamp};
use crate::ports::{PaymentProvider, Proration, ReplacePlanRequest};

use super::provider_call::call_provider;
use super::state_store::SubscriptionStateStore;

/// Persists due pending downgrades for one tenant at a time.
pub struct RolloverApplier {
    store: Arc<SubscriptionStateStore>,
    provider: Arc<dyn PaymentProvider>,
    provider_timeout: Duration,
}

impl RolloverApplier {
    pub fn new(
        store: Arc<SubscriptionStateStore>,
        provider: Arc<dyn PaymentProvider>,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            provider_timeout,
        }
    }

    /// Applies the tenant's pending downgrade if it is due at `now`.
    ///
    /// Returns the current row, rolled over or not.
    pub async fn apply_if_due(
        &self,
        tenant_id: &TenantId,
        now: Timestamp,
    ) -> Result<Subscription, BillingError> {
        let current = self.store.require(tenant_id).await?;
        let Some(pending) = current.pending_downgrade.filter(|_| current.rollover_due(now)) else {
            return Ok(current);
        };

        if let Some(external_id) = current.external_subscription_id.clone() {
            call_provider(
                "replace_plan",
                self.provider_timeout,
                self.provider.replace_plan(ReplacePlanRequest {
                    tenant_id: *tenant_id,
                    external_subscription_id: external_id,
                    tier: pending.tier,
                    interval: pending.interval,
                    proration: Proration::None,
                }),
            )
            .await?;
        }

        let (saved, applied) = self
            .store
            .update(tenant_id, |s| Ok(s.apply_rollover(now)))
            .await?;

        if applied {
            tracing::info!(
                tenant_id = %tenant_id,
                tier = %saved.tier,
                interval = %saved.interval,
                "Applied scheduled downgrade at period end"
            );
        }
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemorySubscriptionRepository;
    use crate::adapters::stripe::MockPaymentProvider;
    use crate::domain::billing::{BillingInterval, PendingDowngrade, PlanTierId, SubscriptionStatus};
    use crate::ports::PaymentError;

    struct Fixture {
        repo: InMemorySubscriptionRepository,
        provider: MockPaymentProvider,
        applier: RolloverApplier,
    }

    fn fixture() -> Fixture {
        let repo = InMemorySubscriptionRepository::new();
        let provider = MockPaymentProvider::new();
        let store = Arc::new(SubscriptionStateStore::new(Arc::new(repo.clone()), 3));
        let applier =
            RolloverApplier::new(store, Arc::new(provider.clone()), Duration::from_secs(1));
        Fixture {
            repo,
            provider,
            applier,
        }
    }

    fn growth_with_downgrade(effective_at: Timestamp, external: Option<&str>) -> Subscription {
        let now = Timestamp::now();
        let mut sub = Subscription::provision(TenantId::new(), now.minus_days(60));
        sub.status = SubscriptionStatus::Active;
        sub.tier = PlanTierId::Growth;
        sub.interval = BillingInterval::Year;
        sub.current_period_end = Some(effective_at);
        sub.external_subscription_id = external.map(String::from);
        sub.pending_downgrade = Some(PendingDowngrade {
            tier: PlanTierId::Starter,
            interval: BillingInterval::Year,
            effective_at,
        });
        sub
    }

    #[tokio::test]
    async fn not_due_is_untouched() {
        let f = fixture();
        let sub = growth_with_downgrade(Timestamp::now().add_days(5), Some("sub_1"));
        f.repo.put(sub.clone()).await;

        let result = f.applier.apply_if_due(&sub.tenant_id, Timestamp::now()).await.unwrap();

        assert_eq!(result.tier, PlanTierId::Growth);
        assert!(!f.provider.was_called("replace_plan"));
    }

    #[tokio::test]
    async fn due_downgrade_is_pushed_then_persisted() {
        let f = fixture();
        let sub = growth_with_downgrade(Timestamp::now().minus_days(1), Some("sub_1"));
        f.repo.put(sub.clone()).await;

        let result = f.applier.apply_if_due(&sub.tenant_id, Timestamp::now()).await.unwrap();

        assert_eq!(result.tier, PlanTierId::Starter);
        assert!(result.pending_downgrade.is_none());
        let call = &f.provider.calls()[0];
        assert_eq!(call.method, "replace_plan");
        assert_eq!(call.args[3], "None");
    }

    #[tokio::test]
    async fn provider_failure_leaves_row_unchanged() {
        let f = fixture();
        let sub = growth_with_downgrade(Timestamp::now().minus_days(1), Some("sub_1"));
        f.repo.put(sub.clone()).await;
        f.provider
            .set_method_error("replace_plan", PaymentError::network("down"));

        let err = f
            .applier
            .apply_if_due(&sub.tenant_id, Timestamp::now())
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::ProviderUnavailable { .. }));
        let stored = f.repo.get(&sub.tenant_id).await.unwrap();
        assert_eq!(stored.tier, PlanTierId::Growth);
        assert!(stored.pending_downgrade.is_some());
    }

    #[tokio::test]
    async fn local_only_subscription_skips_provider() {
        let f = fixture();
        let sub = growth_with_downgrade(Timestamp::now().minus_days(1), None);
        f.repo.put(sub.clone()).await;

        let result = f.applier.apply_if_due(&sub.tenant_id, Timestamp::now()).await.unwrap();

        assert_eq!(result.tier, PlanTierId::Starter);
        assert!(f.provider.calls().is_empty());
    }
}
