//! Mapping between catalog plans and Stripe price ids.

use std::collections::HashMap;

use crate::domain::billing::{BillingInterval, PlanTierId};
use crate::ports::PaymentError;

/// Two-way lookup between (tier, interval) and a Stripe price id.
#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    by_plan: HashMap<(PlanTierId, BillingInterval), String>,
    by_price: HashMap<String, (PlanTierId, BillingInterval)>,
}

impl PriceTable {
    /// Builds the table from config entries keyed `<tier>_<interval>`,
    /// e.g. `growth_year = "price_123"`.
    pub fn from_keys<'a, I>(entries: I) -> Result<Self, PaymentError>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let mut table = Self::default();
        for (key, price_id) in entries {
            let (tier, interval) = key
                .rsplit_once('_')
                .ok_or_else(|| PaymentError::configuration(format!("bad price key '{}'", key)))?;
            let tier: PlanTierId = tier
                .parse()
                .map_err(|_| PaymentError::configuration(format!("unknown tier in '{}'", key)))?;
            let interval: BillingInterval = interval.parse().map_err(|_| {
                PaymentError::configuration(format!("unknown interval in '{}'", key))
            })?;
            table.insert(tier, interval, price_id.clone());
        }
        Ok(table)
    }

    pub fn insert(&mut self, tier: PlanTierId, interval: BillingInterval, price_id: String) {
        self.by_price.insert(price_id.clone(), (tier, interval));
        self.by_plan.insert((tier, interval), price_id);
    }

    /// Price to charge for a plan. Sales-assisted tiers have none.
    pub fn price_for(
        &self,
        tier: PlanTierId,
        interval: BillingInterval,
    ) -> Result<&str, PaymentError> {
        self.by_plan
            .get(&(tier, interval))
            .map(String::as_str)
            .ok_or_else(|| {
                PaymentError::configuration(format!(
                    "no price configured for {} / {}",
                    tier.as_str(),
                    interval.as_str()
                ))
            })
    }

    pub fn plan_for(&self, price_id: &str) -> Option<(PlanTierId, BillingInterval)> {
        self.by_price.get(price_id).copied()
    }

    pub fn len(&self) -> usize {
        self.by_plan.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_plan.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::PaymentErrorCode;

    #[test]
    fn parses_tier_interval_keys() {
        let raw: HashMap<String, String> = [
            ("starter_month".to_string(), "price_s_m".to_string()),
            ("growth_year".to_string(), "price_g_y".to_string()),
        ]
        .into_iter()
        .collect();

        let table = PriceTable::from_keys(&raw).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.price_for(PlanTierId::Growth, BillingInterval::Year).unwrap(),
            "price_g_y"
        );
        assert_eq!(
            table.plan_for("price_s_m"),
            Some((PlanTierId::Starter, BillingInterval::Month))
        );
    }

    #[test]
    fn rejects_unknown_keys() {
        let raw: HashMap<String, String> =
            [("platinum_month".to_string(), "p".to_string())].into_iter().collect();
        assert!(PriceTable::from_keys(&raw).is_err());
    }

    #[test]
    fn missing_price_is_a_configuration_error() {
        let err = PriceTable::default()
            .price_for(PlanTierId::Scale, BillingInterval::Month)
            .unwrap_err();
        assert_eq!(err.code, PaymentErrorCode::Configuration);
        assert!(!err.retryable);
    }
}
