//! Entitlement computation.
//!
//! Pure function of a subscription snapshot, the catalog and the current
//! time. Usage is layered on top by the application service.

use serde::Serialize;
use std::collections::BTreeSet;

use crate::domain::foundation::{TenantId, Timestamp};

use super::aggregate::{PendingDowngrade, Subscription};
use super::catalog::PlanCatalog;
use super::plan::{BillingInterval, Feature, LineLimit, PlanTierId};
use super::status::SubscriptionStatus;

/// What a tenant may currently use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entitlement {
    pub tenant_id: TenantId,
    /// Tier in effect now; a due pending downgrade counts as applied.
    pub tier: PlanTierId,
    pub interval: BillingInterval,
    pub status: SubscriptionStatus,
    pub line_limit: LineLimit,
    /// Features available now. Empty unless status is active or an
    /// unexpired trial.
    pub features: BTreeSet<Feature>,
    pub current_period_end: Option<Timestamp>,
    pub cancel_at_period_end: bool,
    /// Downgrade scheduled for a future date, if any.
    pub upcoming_downgrade: Option<PendingDowngrade>,
}

impl Entitlement {
    /// Derives entitlement at `now`.
    ///
    /// | Status                | Line limit | Features |
    /// |-----------------------|------------|----------|
    /// | active                | tier       | tier     |
    /// | trialing (in period)  | tier       | tier     |
    /// | past_due              | tier       | none     |
    /// | anything else         | 0          | none     |
    pub fn evaluate(subscription: &Subscription, catalog: &PlanCatalog, now: Timestamp) -> Self {
        let (tier_id, interval) = subscription.effective_plan(now);
        let tier = catalog.get(tier_id);

        let features_usable = match subscription.status {
            SubscriptionStatus::Active => true,
            SubscriptionStatus::Trialing => !subscription.trial_lapsed(now),
            _ => false,
        };
        let lines_usable = features_usable || subscription.status == SubscriptionStatus::PastDue;

        let upcoming_downgrade = subscription
            .pending_downgrade
            .filter(|p| p.effective_at > now);

        Self {
            tenant_id: subscription.tenant_id,
            tier: tier_id,
            interval,
            status: subscription.status,
            line_limit: if lines_usable {
                tier.line_limit()
            } else {
                LineLimit::Limited(0)
            },
            features: if features_usable {
                tier.features.clone()
            } else {
                BTreeSet::new()
            },
            current_period_end: subscription.current_period_end,
            cancel_at_period_end: subscription.cancel_at_period_end,
            upcoming_downgrade,
        }
    }

    /// True when the tenant can use anything at all.
    pub fn is_usable(&self) -> bool {
        !self.features.is_empty() || self.line_limit != LineLimit::Limited(0)
    }

    pub fn can_access(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription(status: SubscriptionStatus, tier: PlanTierId) -> Subscription {
        let now = Timestamp::now();
        let mut sub = Subscription::provision(TenantId::new(), now);
        sub.status = status;
        sub.tier = tier;
        sub.current_period_start = Some(now.minus_days(1));
        sub.current_period_end = Some(now.add_days(29));
        sub
    }

    #[test]
    fn active_tenant_gets_tier_limit_and_features() {
        let catalog = PlanCatalog::standard();
        let sub = subscription(SubscriptionStatus::Active, PlanTierId::Growth);
        let ent = Entitlement::evaluate(&sub, &catalog, Timestamp::now());

        assert_eq!(ent.line_limit, LineLimit::Limited(10));
        assert!(ent.can_access(Feature::Insights));
        assert!(!ent.can_access(Feature::ApiAccess));
    }

    #[test]
    fn canceled_tenant_has_nothing_even_mid_period() {
        let catalog = PlanCatalog::standard();
        let sub = subscription(SubscriptionStatus::Canceled, PlanTierId::Scale);
        let ent = Entitlement::evaluate(&sub, &catalog, Timestamp::now());

        assert!(!ent.is_usable());
        assert_eq!(ent.line_limit, LineLimit::Limited(0));
    }

    #[test]
    fn past_due_keeps_lines_but_not_features() {
        let catalog = PlanCatalog::standard();
        let sub = subscription(SubscriptionStatus::PastDue, PlanTierId::Growth);
        let ent = Entitlement::evaluate(&sub, &catalog, Timestamp::now());

        assert_eq!(ent.line_limit, LineLimit::Limited(10));
        assert!(!ent.can_access(Feature::OutputTracking));
    }

    #[test]
    fn lapsed_trial_loses_access() {
        let catalog = PlanCatalog::standard();
        let now = Timestamp::now();
        let mut sub = subscription(SubscriptionStatus::Trialing, PlanTierId::Growth);
        sub.current_period_end = Some(now.minus_days(1));

        let ent = Entitlement::evaluate(&sub, &catalog, now);
        assert!(!ent.is_usable());
    }

    #[test]
    fn pending_downgrade_keeps_current_tier_until_due() {
        let catalog = PlanCatalog::standard();
        let now = Timestamp::now();
        let mut sub = subscription(SubscriptionStatus::Active, PlanTierId::Growth);
        let period_end = sub.current_period_end.unwrap();
        sub.schedule_downgrade(PlanTierId::Starter, BillingInterval::Month, now)
            .unwrap();

        let before = Entitlement::evaluate(&sub, &catalog, now);
        assert_eq!(before.tier, PlanTierId::Growth);
        assert_eq!(before.line_limit, LineLimit::Limited(10));
        assert!(before.upcoming_downgrade.is_some());

        let after = Entitlement::evaluate(&sub, &catalog, period_end.add_days(1));
        assert_eq!(after.tier, PlanTierId::Starter);
        assert_eq!(after.line_limit, LineLimit::Limited(3));
        assert!(after.upcoming_downgrade.is_none());
    }

    #[test]
    fn enterprise_is_unlimited() {
        let catalog = PlanCatalog::standard();
        let sub = subscription(SubscriptionStatus::Active, PlanTierId::Enterprise);
        let ent = Entitlement::evaluate(&sub, &catalog, Timestamp::now());
        assert_eq!(ent.line_limit, LineLimit::Unlimited);
    }

    mod plan_changes {
        use super::super::*;
        use super::subscription;
        use proptest::prelude::*;

        fn tier_strategy() -> impl Strategy<Value = PlanTierId> {
            prop::sample::select(PlanTierId::ALL.to_vec())
        }

        fn interval_strategy() -> impl Strategy<Value = BillingInterval> {
            prop::sample::select(vec![BillingInterval::Month, BillingInterval::Year])
        }

        fn assert_grants(ent: &Entitlement, catalog: &PlanCatalog, tier: PlanTierId) {
            let expected = catalog.get(tier);
            assert_eq!(ent.tier, tier);
            assert_eq!(ent.line_limit, expected.line_limit());
            assert_eq!(ent.features, expected.features);
        }

        proptest! {
            #[test]
            fn upgrade_is_reflected_immediately(
                low in tier_strategy(),
                high in tier_strategy(),
                interval in interval_strategy(),
            ) {
                prop_assume!(low < high);
                let catalog = PlanCatalog::standard();
                let mut sub = subscription(SubscriptionStatus::Active, low);
                let now = Timestamp::now();

                sub.apply_upgrade(high, interval, false, now).unwrap();

                let ent = Entitlement::evaluate(&sub, &catalog, now);
                assert_grants(&ent, &catalog, high);
                prop_assert_eq!(ent.interval, interval);
                prop_assert!(ent.upcoming_downgrade.is_none());
            }

            #[test]
            fn downgrade_waits_for_period_end(
                low in tier_strategy(),
                high in tier_strategy(),
                interval in interval_strategy(),
            ) {
                prop_assume!(low < high);
                let catalog = PlanCatalog::standard();
                let mut sub = subscription(SubscriptionStatus::Active, high);
                let period_end = sub.current_period_end.unwrap();
                let now = Timestamp::now();

                let effective_at = sub.schedule_downgrade(low, interval, now).unwrap();
                prop_assert_eq!(effective_at, period_end);

                assert_grants(&Entitlement::evaluate(&sub, &catalog, now), &catalog, high);
                assert_grants(
                    &Entitlement::evaluate(&sub, &catalog, period_end.minus_secs(1)),
                    &catalog,
                    high,
                );
                let at_end = Entitlement::evaluate(&sub, &catalog, period_end);
                assert_grants(&at_end, &catalog, low);
                prop_assert_eq!(at_end.interval, interval);
                prop_assert!(at_end.upcoming_downgrade.is_none());
            }
        }
    }
}
