//! Plan change classification and the typed outcome of user intents.

use serde::Serialize;

use crate::domain::foundation::Timestamp;

use super::catalog::PlanCatalog;
use super::plan::{BillingInterval, PlanTierId};

/// How a requested plan change relates to the current plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanChange {
    /// Higher tier, or same tier moving to the longer commitment.
    /// Applied immediately with proration.
    Upgrade,
    /// Lower tier, or same tier moving to the shorter commitment.
    /// Deferred to the end of the current period.
    Downgrade,
    /// Enterprise on either side of the change.
    ContactSales,
    /// Requested plan is the current plan.
    Unchanged,
}

/// Classifies moving from `current` to `requested` using catalog rank.
pub fn classify(
    catalog: &PlanCatalog,
    current: (PlanTierId, BillingInterval),
    requested: (PlanTierId, BillingInterval),
) -> PlanChange {
    let (current_tier, current_interval) = current;
    let (new_tier, new_interval) = requested;

    if current_tier.is_sales_assisted() || new_tier.is_sales_assisted() {
        return PlanChange::ContactSales;
    }

    let current_rank = catalog.get(current_tier).rank;
    let new_rank = catalog.get(new_tier).rank;

    if new_rank > current_rank {
        return PlanChange::Upgrade;
    }
    if new_rank < current_rank {
        return PlanChange::Downgrade;
    }

    match (current_interval, new_interval) {
        (BillingInterval::Month, BillingInterval::Year) => PlanChange::Upgrade,
        (BillingInterval::Year, BillingInterval::Month) => PlanChange::Downgrade,
        _ => PlanChange::Unchanged,
    }
}

/// Result of a user-initiated subscription intent.
///
/// Transport layers map this to their own response format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ChangeOutcome {
    /// New plan is in effect now.
    Upgraded {
        tier: PlanTierId,
        interval: BillingInterval,
        /// A provider webhook is still expected to confirm the final state.
        pending_reconciliation: bool,
    },
    /// New plan takes effect at `scheduled_date`.
    DowngradeScheduled {
        tier: PlanTierId,
        interval: BillingInterval,
        scheduled_date: Timestamp,
        needs_payment_method: bool,
    },
    TrialStarted {
        tier: PlanTierId,
        interval: BillingInterval,
        trial_ends_at: Timestamp,
    },
    /// Tenant must complete checkout at the provider.
    CheckoutStarted { url: String },
    /// Tier is sold by the sales team.
    ContactSales { tier: PlanTierId },
    Canceled { canceled_at: Timestamp },
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tier_strategy() -> impl Strategy<Value = PlanTierId> {
        prop::sample::select(PlanTierId::ALL.to_vec())
    }

    fn interval_strategy() -> impl Strategy<Value = BillingInterval> {
        prop::sample::select(vec![BillingInterval::Month, BillingInterval::Year])
    }

    #[test]
    fn starter_to_growth_is_upgrade() {
        let catalog = PlanCatalog::standard();
        let change = classify(
            &catalog,
            (PlanTierId::Starter, BillingInterval::Month),
            (PlanTierId::Growth, BillingInterval::Month),
        );
        assert_eq!(change, PlanChange::Upgrade);
    }

    #[test]
    fn growth_yearly_to_starter_yearly_is_downgrade() {
        let catalog = PlanCatalog::standard();
        let change = classify(
            &catalog,
            (PlanTierId::Growth, BillingInterval::Year),
            (PlanTierId::Starter, BillingInterval::Year),
        );
        assert_eq!(change, PlanChange::Downgrade);
    }

    #[test]
    fn interval_change_within_tier() {
        let catalog = PlanCatalog::standard();
        let monthly = (PlanTierId::Scale, BillingInterval::Month);
        let yearly = (PlanTierId::Scale, BillingInterval::Year);

        assert_eq!(classify(&catalog, monthly, yearly), PlanChange::Upgrade);
        assert_eq!(classify(&catalog, yearly, monthly), PlanChange::Downgrade);
        assert_eq!(classify(&catalog, yearly, yearly), PlanChange::Unchanged);
    }

    #[test]
    fn enterprise_always_routes_to_sales() {
        let catalog = PlanCatalog::standard();
        assert_eq!(
            classify(
                &catalog,
                (PlanTierId::Scale, BillingInterval::Month),
                (PlanTierId::Enterprise, BillingInterval::Year),
            ),
            PlanChange::ContactSales
        );
        assert_eq!(
            classify(
                &catalog,
                (PlanTierId::Enterprise, BillingInterval::Year),
                (PlanTierId::Starter, BillingInterval::Month),
            ),
            PlanChange::ContactSales
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            max_global_rejects: 65536,
            ..ProptestConfig::default()
        })]

        #[test]
        fn rank_order_decides_direction(
            a in tier_strategy(),
            b in tier_strategy(),
            ia in interval_strategy(),
            ib in interval_strategy(),
        ) {
            prop_assume!(a < b);
            prop_assume!(!b.is_sales_assisted());
            let catalog = PlanCatalog::standard();

            prop_assert_eq!(classify(&catalog, (a, ia), (b, ib)), PlanChange::Upgrade);
            prop_assert_eq!(classify(&catalog, (b, ib), (a, ia)), PlanChange::Downgrade);
        }
    }
}
