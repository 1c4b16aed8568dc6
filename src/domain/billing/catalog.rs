//! Plan catalog.
//!
//! Immutable lookup table of plan tiers, built once at startup and passed to
//! every component that needs it.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use thiserror::Error;

use super::plan::{discounted_yearly_price, Feature, PlanTier, PlanTierId};

/// Errors raised while building a catalog from an override file.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read catalog file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse catalog: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Catalog is missing tier '{0}'")]
    MissingTier(PlanTierId),

    #[error("Catalog defines tier '{0}' more than once")]
    DuplicateTier(PlanTierId),

    #[error("Tier '{tier}' has invalid price: {reason}")]
    InvalidPrice { tier: PlanTierId, reason: String },
}

/// One tier as written in a catalog file.
#[derive(Debug, Clone, Deserialize)]
pub struct TierDefinition {
    pub id: PlanTierId,
    pub display_name: String,
    #[serde(default)]
    pub monthly_price_cents: Option<i64>,
    /// Overrides the discounted default when present.
    #[serde(default)]
    pub yearly_price_cents: Option<i64>,
    #[serde(default)]
    pub max_active_lines: Option<u32>,
    #[serde(default)]
    pub features: BTreeSet<Feature>,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    tiers: Vec<TierDefinition>,
}

/// Immutable, totally ordered table of plan tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanCatalog {
    tiers: [PlanTier; 4],
}

fn slot(id: PlanTierId) -> usize {
    match id {
        PlanTierId::Starter => 0,
        PlanTierId::Growth => 1,
        PlanTierId::Scale => 2,
        PlanTierId::Enterprise => 3,
    }
}

fn into_tier(def: TierDefinition) -> PlanTier {
    let yearly = def
        .yearly_price_cents
        .or_else(|| def.monthly_price_cents.and_then(discounted_yearly_price));

    PlanTier {
        id: def.id,
        display_name: def.display_name,
        monthly_price_cents: def.monthly_price_cents,
        yearly_price_cents: yearly,
        max_active_lines: def.max_active_lines,
        features: def.features,
        rank: slot(def.id) as u8,
    }
}

impl PlanCatalog {
    /// The catalog shipped with the product.
    ///
    /// | Tier       | Monthly | Lines     |
    /// |------------|---------|-----------|
    /// | Starter    | $49     | 3         |
    /// | Growth     | $129    | 10        |
    /// | Scale      | $299    | 30        |
    /// | Enterprise | quote   | unlimited |
    pub fn standard() -> Self {
        use Feature::*;

        let starter: BTreeSet<Feature> = [OutputTracking, BlockerAlerts].into_iter().collect();
        let mut growth = starter.clone();
        growth.extend([Insights, DataExport]);
        let mut scale = growth.clone();
        scale.extend([ApiAccess, PrioritySupport]);
        let mut enterprise = scale.clone();
        enterprise.insert(SingleSignOn);

        let definitions = [
            TierDefinition {
                id: PlanTierId::Starter,
                display_name: "Starter".to_string(),
                monthly_price_cents: Some(4_900),
                yearly_price_cents: None,
                max_active_lines: Some(3),
                features: starter,
            },
            TierDefinition {
                id: PlanTierId::Growth,
                display_name: "Growth".to_string(),
                monthly_price_cents: Some(12_900),
                yearly_price_cents: None,
                max_active_lines: Some(10),
                features: growth,
            },
            TierDefinition {
                id: PlanTierId::Scale,
                display_name: "Scale".to_string(),
                monthly_price_cents: Some(29_900),
                yearly_price_cents: None,
                max_active_lines: Some(30),
                features: scale,
            },
            TierDefinition {
                id: PlanTierId::Enterprise,
                display_name: "Enterprise".to_string(),
                monthly_price_cents: None,
                yearly_price_cents: None,
                max_active_lines: None,
                features: enterprise,
            },
        ];

        Self {
            tiers: definitions.map(into_tier),
        }
    }

    /// Builds a catalog from explicit tier definitions.
    ///
    /// Every tier must be defined exactly once. Ranks follow the fixed tier
    /// order; yearly prices default to the discounted monthly price.
    pub fn from_definitions(definitions: Vec<TierDefinition>) -> Result<Self, CatalogError> {
        let mut by_id: BTreeMap<PlanTierId, TierDefinition> = BTreeMap::new();
        for def in definitions {
            let id = def.id;
            if by_id.insert(id, def).is_some() {
                return Err(CatalogError::DuplicateTier(id));
            }
        }

        let mut tiers = Vec::with_capacity(PlanTierId::ALL.len());
        for id in PlanTierId::ALL.iter() {
            let def = by_id.remove(id).ok_or(CatalogError::MissingTier(*id))?;

            if let Some(price) = def.monthly_price_cents {
                if price < 0 {
                    return Err(CatalogError::InvalidPrice {
                        tier: *id,
                        reason: format!("monthly price {price} is negative"),
                    });
                }
                if def.yearly_price_cents.is_none() && discounted_yearly_price(price).is_none() {
                    return Err(CatalogError::InvalidPrice {
                        tier: *id,
                        reason: format!("monthly price {price} is too large"),
                    });
                }
            }
            if let Some(price) = def.yearly_price_cents {
                if price < 0 {
                    return Err(CatalogError::InvalidPrice {
                        tier: *id,
                        reason: format!("yearly price {price} is negative"),
                    });
                }
            }

            tiers.push(into_tier(def));
        }

        let tiers: [PlanTier; 4] = tiers
            .try_into()
            .map_err(|_| CatalogError::MissingTier(PlanTierId::Enterprise))?;
        Ok(Self { tiers })
    }

    /// Parses a YAML catalog (`tiers: [...]`).
    pub fn from_yaml_str(yaml: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_yaml::from_str(yaml)?;
        Self::from_definitions(file.tiers)
    }

    /// Reads and parses a YAML catalog file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Looks up a tier.
    pub fn get(&self, id: PlanTierId) -> &PlanTier {
        &self.tiers[slot(id)]
    }

    /// Returns the immediate successor of a tier, or `None` for the top tier.
    pub fn next_tier(&self, id: PlanTierId) -> Option<&PlanTier> {
        self.tiers.get(slot(id) + 1)
    }

    /// All tiers in ascending rank order.
    pub fn tiers(&self) -> &[PlanTier] {
        &self.tiers
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::standard()
    }
}
