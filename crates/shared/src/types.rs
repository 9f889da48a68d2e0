//! Shared domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Subscription plan tier.
///
/// Tiers form a strict total order by entitlement breadth
/// (`Free < Premium < Pro`). The ordering is used only for
/// upgrade/downgrade labeling in logs and analytics; plan changes
/// themselves are symmetric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Premium,
    Pro,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Premium => "premium",
            PlanTier::Pro => "pro",
        }
    }

    /// Parse a plan code. Returns `None` for codes not in the tier order.
    pub fn parse(code: &str) -> Option<Self> {
        match code.to_lowercase().as_str() {
            "free" => Some(PlanTier::Free),
            "premium" => Some(PlanTier::Premium),
            "pro" => Some(PlanTier::Pro),
            _ => None,
        }
    }

    /// All tiers in ascending order of entitlement breadth.
    pub fn all() -> [PlanTier; 3] {
        [PlanTier::Free, PlanTier::Premium, PlanTier::Pro]
    }

    /// Whether moving from `self` to `target` is a downgrade.
    pub fn is_downgrade_to(&self, target: PlanTier) -> bool {
        target < *self
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Feature flag granted by a plan.
///
/// Unknown flag names never parse; callers that look up an unknown flag
/// get "no access" rather than an error (fail closed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureFlag {
    LiveWorkshops,
    HdVideo,
    Downloads,
    Certificates,
    Mentorship,
}

impl FeatureFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureFlag::LiveWorkshops => "live_workshops",
            FeatureFlag::HdVideo => "hd_video",
            FeatureFlag::Downloads => "downloads",
            FeatureFlag::Certificates => "certificates",
            FeatureFlag::Mentorship => "mentorship",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "live_workshops" => Some(FeatureFlag::LiveWorkshops),
            "hd_video" => Some(FeatureFlag::HdVideo),
            "downloads" => Some(FeatureFlag::Downloads),
            "certificates" => Some(FeatureFlag::Certificates),
            "mentorship" => Some(FeatureFlag::Mentorship),
            _ => None,
        }
    }

    /// All known flags, in catalog column order.
    pub fn all() -> [FeatureFlag; 5] {
        [
            FeatureFlag::LiveWorkshops,
            FeatureFlag::HdVideo,
            FeatureFlag::Downloads,
            FeatureFlag::Certificates,
            FeatureFlag::Mentorship,
        ]
    }
}

impl fmt::Display for FeatureFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who uploaded a request image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Uploader {
    Customer,
    Admin,
}

impl Uploader {
    pub fn as_str(&self) -> &'static str {
        match self {
            Uploader::Customer => "customer",
            Uploader::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "customer" => Some(Uploader::Customer),
            "admin" => Some(Uploader::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for Uploader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity of the admin actor driving an operation.
///
/// Always supplied by the caller; the core never falls back to a
/// built-in identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminIdentity {
    pub id: Uuid,
    pub email: String,
}

impl AdminIdentity {
    pub fn new(id: Uuid, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into().to_lowercase(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_order_reflects_entitlement_breadth() {
        assert!(PlanTier::Free < PlanTier::Premium);
        assert!(PlanTier::Premium < PlanTier::Pro);
        assert!(PlanTier::Pro.is_downgrade_to(PlanTier::Free));
        assert!(!PlanTier::Free.is_downgrade_to(PlanTier::Pro));
    }

    #[test]
    fn tier_parse_roundtrip() {
        for tier in PlanTier::all() {
            assert_eq!(PlanTier::parse(tier.as_str()), Some(tier));
        }
        assert_eq!(PlanTier::parse("PRO"), Some(PlanTier::Pro));
        assert_eq!(PlanTier::parse("enterprise"), None);
    }

    #[test]
    fn unknown_feature_flag_does_not_parse() {
        assert_eq!(FeatureFlag::parse("live_workshops"), Some(FeatureFlag::LiveWorkshops));
        assert_eq!(FeatureFlag::parse("live_workshop"), None);
        assert_eq!(FeatureFlag::parse(""), None);
    }

    #[test]
    fn admin_identity_normalizes_email() {
        let admin = AdminIdentity::new(Uuid::new_v4(), "Ops@Example.COM");
        assert_eq!(admin.email, "ops@example.com");
    }
}
