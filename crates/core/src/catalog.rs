//! Plan catalog
//!
//! Static registry of subscription plans and the feature flags each plan
//! grants. Loaded from the `plans` table once at service construction and
//! immutable at runtime; plan changes are deployed via migration, never
//! mutated by user action.

use std::collections::BTreeMap;

use giftforge_shared::{FeatureFlag, PlanTier};
use sqlx::PgPool;

use crate::error::{CoreError, CoreResult};

/// A subscription plan definition
#[derive(Debug, Clone)]
pub struct Plan {
    pub tier: PlanTier,
    pub display_name: String,
    pub price_cents: i64,
    pub live_workshops: bool,
    pub hd_video: bool,
    pub downloads: bool,
    pub certificates: bool,
    pub mentorship: bool,
}

impl Plan {
    /// Whether this plan grants the given feature flag.
    pub fn grants(&self, flag: FeatureFlag) -> bool {
        match flag {
            FeatureFlag::LiveWorkshops => self.live_workshops,
            FeatureFlag::HdVideo => self.hd_video,
            FeatureFlag::Downloads => self.downloads,
            FeatureFlag::Certificates => self.certificates,
            FeatureFlag::Mentorship => self.mentorship,
        }
    }

    /// The full feature set as a name -> granted map, covering every
    /// known flag. Flags the plan does not grant appear as `false` so
    /// callers never have to distinguish "absent" from "denied".
    pub fn feature_set(&self) -> BTreeMap<String, bool> {
        FeatureFlag::all()
            .into_iter()
            .map(|flag| (flag.as_str().to_string(), self.grants(flag)))
            .collect()
    }

    /// Free plan: no paid features.
    pub fn free() -> Self {
        Self {
            tier: PlanTier::Free,
            display_name: "Free".to_string(),
            price_cents: 0,
            live_workshops: false,
            hd_video: false,
            downloads: false,
            certificates: false,
            mentorship: false,
        }
    }

    /// Premium plan: workshops, HD video, downloads.
    pub fn premium() -> Self {
        Self {
            tier: PlanTier::Premium,
            display_name: "Premium".to_string(),
            price_cents: 1900,
            live_workshops: true,
            hd_video: true,
            downloads: true,
            certificates: false,
            mentorship: false,
        }
    }

    /// Pro plan: everything.
    pub fn pro() -> Self {
        Self {
            tier: PlanTier::Pro,
            display_name: "Pro".to_string(),
            price_cents: 4900,
            live_workshops: true,
            hd_video: true,
            downloads: true,
            certificates: true,
            mentorship: true,
        }
    }
}

/// Row type for loading the catalog
#[derive(Debug, sqlx::FromRow)]
struct PlanRow {
    code: String,
    display_name: String,
    price_cents: i64,
    live_workshops: bool,
    hd_video: bool,
    downloads: bool,
    certificates: bool,
    mentorship: bool,
}

/// Immutable registry of plans keyed by tier
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: BTreeMap<PlanTier, Plan>,
}

impl PlanCatalog {
    /// Load the catalog from the `plans` table.
    ///
    /// Fails with `IntegrityViolation` if the table contains a code
    /// outside the tier order or is missing the `free` plan, since the
    /// resolver's fallback depends on `free` always existing.
    pub async fn load(pool: &PgPool) -> CoreResult<Self> {
        let rows: Vec<PlanRow> = sqlx::query_as(
            r#"
            SELECT code, display_name, price_cents,
                   live_workshops, hd_video, downloads, certificates, mentorship
            FROM plans
            ORDER BY tier_order
            "#,
        )
        .fetch_all(pool)
        .await?;

        let mut plans = BTreeMap::new();
        for row in rows {
            let tier = PlanTier::parse(&row.code).ok_or_else(|| {
                CoreError::IntegrityViolation(format!(
                    "plan catalog contains unknown code '{}'",
                    row.code
                ))
            })?;
            plans.insert(
                tier,
                Plan {
                    tier,
                    display_name: row.display_name,
                    price_cents: row.price_cents,
                    live_workshops: row.live_workshops,
                    hd_video: row.hd_video,
                    downloads: row.downloads,
                    certificates: row.certificates,
                    mentorship: row.mentorship,
                },
            );
        }

        let catalog = Self { plans };
        if catalog.plans.is_empty() || !catalog.plans.contains_key(&PlanTier::Free) {
            return Err(CoreError::IntegrityViolation(
                "plan catalog must always contain the free plan".to_string(),
            ));
        }

        tracing::info!(plan_count = catalog.plans.len(), "Plan catalog loaded");
        Ok(catalog)
    }

    /// Built-in catalog matching the seed migration. Used in tests and
    /// as documentation of the deployed defaults.
    pub fn builtin() -> Self {
        let mut plans = BTreeMap::new();
        for plan in [Plan::free(), Plan::premium(), Plan::pro()] {
            plans.insert(plan.tier, plan);
        }
        Self { plans }
    }

    pub fn get(&self, tier: PlanTier) -> Option<&Plan> {
        self.plans.get(&tier)
    }

    /// Look up a plan by code string, failing with `UnknownPlan` for
    /// codes outside the catalog.
    pub fn require(&self, code: &str) -> CoreResult<&Plan> {
        PlanTier::parse(code)
            .and_then(|tier| self.plans.get(&tier))
            .ok_or_else(|| CoreError::UnknownPlan(code.to_string()))
    }

    /// The free plan. The loader guarantees it exists.
    #[allow(clippy::expect_used)]
    pub fn free(&self) -> &Plan {
        // Constructors refuse to build a catalog without the free plan.
        self.plans
            .get(&PlanTier::Free)
            .expect("catalog always contains the free plan")
    }

    pub fn iter(&self) -> impl Iterator<Item = &Plan> {
        self.plans.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_has_all_tiers_in_order() {
        let catalog = PlanCatalog::builtin();
        let tiers: Vec<PlanTier> = catalog.iter().map(|p| p.tier).collect();
        assert_eq!(tiers, vec![PlanTier::Free, PlanTier::Premium, PlanTier::Pro]);
    }

    #[test]
    fn require_rejects_unknown_codes() {
        let catalog = PlanCatalog::builtin();
        assert!(catalog.require("pro").is_ok());
        assert!(matches!(
            catalog.require("enterprise"),
            Err(CoreError::UnknownPlan(code)) if code == "enterprise"
        ));
    }

    #[test]
    fn free_plan_grants_nothing() {
        let free = Plan::free();
        for flag in FeatureFlag::all() {
            assert!(!free.grants(flag), "free should not grant {flag}");
        }
    }

    #[test]
    fn pro_plan_grants_everything() {
        let pro = Plan::pro();
        for flag in FeatureFlag::all() {
            assert!(pro.grants(flag), "pro should grant {flag}");
        }
    }

    #[test]
    fn feature_set_covers_every_known_flag() {
        let set = Plan::premium().feature_set();
        assert_eq!(set.len(), FeatureFlag::all().len());
        assert_eq!(set.get("live_workshops"), Some(&true));
        assert_eq!(set.get("certificates"), Some(&false));
    }
}
