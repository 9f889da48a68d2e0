//! Entitlement resolution
//!
//! The ONLY read/write path for subscription state. All plan changes
//! (customer upgrades, downgrades, admin changes) go through
//! [`EntitlementResolver::change_plan`]; all entitlement reads go through
//! [`EntitlementResolver::resolve`]. The database is the source of truth.

use std::collections::BTreeMap;
use std::sync::Arc;

use giftforge_shared::PlanTier;
use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::catalog::PlanCatalog;
use crate::error::{CoreError, CoreResult};
use crate::events::{ActorType, DomainEventBuilder, DomainEventLogger, DomainEventType};
use crate::ledger::{EntitlementLedger, SubscriptionEvent, SubscriptionStatus};

/// A customer's current effective plan and feature access, derived from
/// the single active ledger event. Never stored.
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveEntitlement {
    pub customer_id: Uuid,
    pub plan_code: PlanTier,
    pub feature_set: BTreeMap<String, bool>,
    pub effective_at: OffsetDateTime,
    pub resolved_at: OffsetDateTime,
}

/// Resolves and mutates customer entitlements
#[derive(Clone)]
pub struct EntitlementResolver {
    pool: PgPool,
    catalog: Arc<PlanCatalog>,
    ledger: EntitlementLedger,
    event_logger: DomainEventLogger,
}

impl EntitlementResolver {
    pub fn new(pool: PgPool, catalog: Arc<PlanCatalog>) -> Self {
        let ledger = EntitlementLedger::new(pool.clone());
        let event_logger = DomainEventLogger::new(pool.clone());
        Self {
            pool,
            catalog,
            ledger,
            event_logger,
        }
    }

    pub fn ledger(&self) -> &EntitlementLedger {
        &self.ledger
    }

    /// Compute the customer's current effective entitlement.
    ///
    /// A customer with no subscription history is lazily materialized
    /// onto the free plan, so downstream callers never see a "no
    /// entitlement" state. Idempotent: repeated calls with no
    /// intervening writes return the same plan and feature set.
    pub async fn resolve(&self, customer_id: Uuid) -> CoreResult<EffectiveEntitlement> {
        if !self.ledger.customer_exists(customer_id).await? {
            return Err(CoreError::CustomerNotFound(customer_id));
        }

        if let Some(event) = self.ledger.active_event(customer_id).await? {
            return self.entitlement_from(customer_id, event.plan, event.effective_at);
        }

        // No active event: materialize the free tier. The partial unique
        // index makes a concurrent materialization benign; whichever
        // writer wins, the re-read below sees exactly one active row.
        let written = self.ledger.materialize_free_if_absent(customer_id).await?;
        if written {
            tracing::info!(customer_id = %customer_id, "Materialized free subscription event");
            if let Err(e) = self
                .event_logger
                .log_event(DomainEventBuilder::new(
                    customer_id,
                    DomainEventType::FreePlanMaterialized,
                ))
                .await
            {
                tracing::warn!(error = %e, "Failed to log free-plan materialization event");
            }
        }

        let event = self.ledger.active_event(customer_id).await?.ok_or_else(|| {
            CoreError::IntegrityViolation(format!(
                "customer {customer_id} has no active event after free-plan materialization"
            ))
        })?;
        self.entitlement_from(customer_id, event.plan, event.effective_at)
    }

    /// Move the customer to a different plan.
    ///
    /// Supersede-old and insert-new happen in one transaction: a crash
    /// between them can never leave zero or two active rows. Upgrades
    /// and downgrades take the same path; the tier order is only used
    /// for labeling the audit event.
    pub async fn change_plan(
        &self,
        customer_id: Uuid,
        target_plan_code: &str,
        actor_id: Option<Uuid>,
    ) -> CoreResult<EffectiveEntitlement> {
        let target = self.catalog.require(target_plan_code)?.tier;

        if !self.ledger.customer_exists(customer_id).await? {
            return Err(CoreError::CustomerNotFound(customer_id));
        }

        let now = OffsetDateTime::now_utc();
        let mut tx = self.pool.begin().await?;

        let current = self
            .ledger
            .active_event_for_update(&mut tx, customer_id)
            .await?;

        let from_plan = current.as_ref().map(|e| e.plan);
        match plan_change_decision(current.as_ref(), target)? {
            PlanChangeAction::Supersede { superseded_id } => {
                self.ledger.supersede(&mut tx, superseded_id, now).await?;
            }
            PlanChangeAction::InsertOnly => {}
        }
        let new_event = self
            .ledger
            .insert_active(&mut tx, customer_id, target, now)
            .await?;

        tx.commit().await?;

        let is_downgrade = from_plan.map(|f| f.is_downgrade_to(target)).unwrap_or(false);
        tracing::info!(
            customer_id = %customer_id,
            from_plan = ?from_plan.map(|p| p.as_str()),
            to_plan = %target,
            is_downgrade = is_downgrade,
            "Plan changed"
        );

        if let Err(e) = self
            .event_logger
            .log_event(
                DomainEventBuilder::new(customer_id, DomainEventType::PlanChanged)
                    .data(serde_json::json!({
                        "from_plan": from_plan.map(|p| p.as_str()),
                        "to_plan": target.as_str(),
                        "is_downgrade": is_downgrade,
                    }))
                    .actor_opt(actor_id, ActorType::Customer),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to log plan change event");
        }

        self.entitlement_from(customer_id, new_event.plan, new_event.effective_at)
    }

    /// Whether the customer's current plan grants a feature flag.
    ///
    /// Unknown flag names fail closed: a typo degrades to "no access"
    /// rather than an error in the caller.
    pub async fn has_feature(&self, customer_id: Uuid, feature_flag: &str) -> CoreResult<bool> {
        let Some(flag) = giftforge_shared::FeatureFlag::parse(feature_flag) else {
            tracing::debug!(flag = feature_flag, "Unknown feature flag, denying access");
            return Ok(false);
        };

        let entitlement = self.resolve(customer_id).await?;
        let plan = self
            .catalog
            .get(entitlement.plan_code)
            .ok_or_else(|| {
                CoreError::IntegrityViolation(format!(
                    "resolved plan '{}' missing from catalog",
                    entitlement.plan_code
                ))
            })?;
        Ok(plan.grants(flag))
    }

    fn entitlement_from(
        &self,
        customer_id: Uuid,
        plan: PlanTier,
        effective_at: OffsetDateTime,
    ) -> CoreResult<EffectiveEntitlement> {
        let plan = self.catalog.get(plan).ok_or_else(|| {
            CoreError::IntegrityViolation(format!("ledger references plan '{plan}' missing from catalog"))
        })?;

        Ok(EffectiveEntitlement {
            customer_id,
            plan_code: plan.tier,
            feature_set: plan.feature_set(),
            effective_at,
            resolved_at: OffsetDateTime::now_utc(),
        })
    }
}

/// What the plan-change transaction must do after reading the single
/// active row under lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PlanChangeAction {
    /// Supersede this row, then insert the new active one.
    Supersede { superseded_id: Uuid },
    /// No active row exists; insert only.
    InsertOnly,
}

/// Pure decision for the plan-change write path. Compares against the
/// single active row only; a duplicated row never reaches this point
/// because the ledger read reports duplicates as an integrity
/// violation.
pub(crate) fn plan_change_decision(
    current: Option<&SubscriptionEvent>,
    target: PlanTier,
) -> CoreResult<PlanChangeAction> {
    match current {
        Some(event) if event.plan == target && event.status == SubscriptionStatus::Active => {
            Err(CoreError::AlreadyOnPlan(target.as_str().to_string()))
        }
        Some(event) => Ok(PlanChangeAction::Supersede {
            superseded_id: event.id,
        }),
        None => Ok(PlanChangeAction::InsertOnly),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Plan;

    #[test]
    fn feature_set_matches_catalog_exactly() {
        // Round-trip property: the resolved set for "pro" is the
        // catalog's pro entry, nothing more, nothing less.
        let catalog = PlanCatalog::builtin();
        let pro = catalog.get(PlanTier::Pro).unwrap();
        assert_eq!(pro.feature_set(), Plan::pro().feature_set());
    }

    #[test]
    fn downgrade_labeling_is_symmetric_with_ordering() {
        assert!(PlanTier::Pro.is_downgrade_to(PlanTier::Free));
        assert!(!PlanTier::Premium.is_downgrade_to(PlanTier::Pro));
        // Same-tier moves are not downgrades; they are rejected as
        // AlreadyOnPlan before labeling matters.
        assert!(!PlanTier::Pro.is_downgrade_to(PlanTier::Pro));
    }
}
