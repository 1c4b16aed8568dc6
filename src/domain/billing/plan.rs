//! Plan tier definitions.
//!
//! A plan tier bundles a price, a capacity in active production lines and a
//! feature set. Tiers are totally ordered by rank:
//! `starter < growth < scale < enterprise`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::ValidationError;

/// Identifier of a plan tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTierId {
    Starter,
    Growth,
    Scale,
    Enterprise,
}

impl PlanTierId {
    /// All tiers in ascending order.
    pub const ALL: [PlanTierId; 4] = [
        PlanTierId::Starter,
        PlanTierId::Growth,
        PlanTierId::Scale,
        PlanTierId::Enterprise,
    ];

    /// Returns the wire/storage name of this tier.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTierId::Starter => "starter",
            PlanTierId::Growth => "growth",
            PlanTierId::Scale => "scale",
            PlanTierId::Enterprise => "enterprise",
        }
    }

    /// Enterprise is sold by the sales team, never through self-service.
    pub fn is_sales_assisted(&self) -> bool {
        matches!(self, PlanTierId::Enterprise)
    }
}

impl fmt::Display for PlanTierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanTierId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "starter" => Ok(PlanTierId::Starter),
            "growth" => Ok(PlanTierId::Growth),
            "scale" => Ok(PlanTierId::Scale),
            "enterprise" => Ok(PlanTierId::Enterprise),
            _ => Err(ValidationError::unknown_value("tier", s)),
        }
    }
}

/// How often a subscription is billed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    Month,
    Year,
}

impl BillingInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingInterval::Month => "month",
            BillingInterval::Year => "year",
        }
    }
}

impl fmt::Display for BillingInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillingInterval {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "month" | "monthly" => Ok(BillingInterval::Month),
            "year" | "yearly" | "annual" => Ok(BillingInterval::Year),
            _ => Err(ValidationError::unknown_value("interval", s)),
        }
    }
}

/// Product capabilities that are gated by tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Daily output targets and tracking per line.
    OutputTracking,
    /// Blocker logging with notifications.
    BlockerAlerts,
    /// Statistics and insights dashboards.
    Insights,
    /// CSV/PDF export of production history.
    DataExport,
    /// Programmatic access to production data.
    ApiAccess,
    /// Single sign-on for factory staff.
    SingleSignOn,
    /// Dedicated support channel.
    PrioritySupport,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::OutputTracking => "output_tracking",
            Feature::BlockerAlerts => "blocker_alerts",
            Feature::Insights => "insights",
            Feature::DataExport => "data_export",
            Feature::ApiAccess => "api_access",
            Feature::SingleSignOn => "single_sign_on",
            Feature::PrioritySupport => "priority_support",
        }
    }
}

impl FromStr for Feature {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "output_tracking" => Ok(Feature::OutputTracking),
            "blocker_alerts" => Ok(Feature::BlockerAlerts),
            "insights" => Ok(Feature::Insights),
            "data_export" => Ok(Feature::DataExport),
            "api_access" => Ok(Feature::ApiAccess),
            "single_sign_on" => Ok(Feature::SingleSignOn),
            "priority_support" => Ok(Feature::PrioritySupport),
            _ => Err(ValidationError::unknown_value("feature", s)),
        }
    }
}

/// Capacity of a tier in active production lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum LineLimit {
    Limited(u32),
    Unlimited,
}

impl LineLimit {
    /// Builds a limit from a nullable maximum (`None` = unlimited).
    pub fn from_max(max: Option<u32>) -> Self {
        match max {
            Some(n) => LineLimit::Limited(n),
            None => LineLimit::Unlimited,
        }
    }

    /// Returns true once `active` has reached the limit.
    pub fn is_reached_by(&self, active: u32) -> bool {
        match self {
            LineLimit::Limited(max) => active >= *max,
            LineLimit::Unlimited => false,
        }
    }

    pub fn as_option(&self) -> Option<u32> {
        match self {
            LineLimit::Limited(n) => Some(*n),
            LineLimit::Unlimited => None,
        }
    }
}

/// A sellable plan tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanTier {
    pub id: PlanTierId,
    pub display_name: String,
    /// Monthly list price in cents. `None` for quote-based tiers.
    pub monthly_price_cents: Option<i64>,
    /// Yearly list price in cents. `None` for quote-based tiers.
    pub yearly_price_cents: Option<i64>,
    /// Maximum active production lines. `None` = unlimited.
    pub max_active_lines: Option<u32>,
    pub features: BTreeSet<Feature>,
    pub rank: u8,
}

impl PlanTier {
    /// Price for the given interval, if the tier is self-service.
    pub fn price_cents(&self, interval: BillingInterval) -> Option<i64> {
        match interval {
            BillingInterval::Month => self.monthly_price_cents,
            BillingInterval::Year => self.yearly_price_cents,
        }
    }

    pub fn line_limit(&self) -> LineLimit {
        LineLimit::from_max(self.max_active_lines)
    }

    pub fn has_feature(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }
}

/// Default yearly price: twelve months at a 15% discount, rounded to the cent.
///
/// `None` when the result does not fit in an `i64`.
pub fn discounted_yearly_price(monthly_price_cents: i64) -> Option<i64> {
    // monthly * 12 * 0.85 == monthly * 1020 / 100, rounded half away from zero
    let scaled = monthly_price_cents.checked_mul(1020)?;
    let rounded = if scaled >= 0 {
        scaled.checked_add(50)?
    } else {
        scaled.checked_sub(50)?
    };
    Some(rounded / 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_ids_are_ordered() {
        assert!(PlanTierId::Starter < PlanTierId::Growth);
        assert!(PlanTierId::Growth < PlanTierId::Scale);
        assert!(PlanTierId::Scale < PlanTierId::Enterprise);
    }

    #[test]
    fn tier_id_parses_case_insensitively() {
        assert_eq!("Growth".parse::<PlanTierId>().unwrap(), PlanTierId::Growth);
        assert!("platinum".parse::<PlanTierId>().is_err());
    }

    #[test]
    fn tier_serializes_lowercase() {
        let json = serde_json::to_string(&PlanTierId::Scale).unwrap();
        assert_eq!(json, "\"scale\"");
    }

    #[test]
    fn interval_accepts_common_aliases() {
        assert_eq!("monthly".parse::<BillingInterval>().unwrap(), BillingInterval::Month);
        assert_eq!("year".parse::<BillingInterval>().unwrap(), BillingInterval::Year);
        assert!("weekly".parse::<BillingInterval>().is_err());
    }

    #[test]
    fn yearly_price_applies_fifteen_percent_discount() {
        // 49.00 * 12 * 0.85 = 499.80
        assert_eq!(discounted_yearly_price(4900), Some(49980));
        // 0.99 * 12 * 0.85 = 10.098 -> 10.10
        assert_eq!(discounted_yearly_price(99), Some(1010));
    }

    #[test]
    fn yearly_price_reports_overflow() {
        assert_eq!(discounted_yearly_price(i64::MAX / 1000), None);
        assert_eq!(discounted_yearly_price(1_000_000_000), Some(10_200_000_000));
    }

    #[test]
    fn line_limit_is_reached_at_max() {
        assert!(!LineLimit::Limited(3).is_reached_by(2));
        assert!(LineLimit::Limited(3).is_reached_by(3));
        assert!(!LineLimit::Unlimited.is_reached_by(u32::MAX));
    }
}
