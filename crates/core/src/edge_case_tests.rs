// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Core
//!
//! Covers the boundary conditions of:
//! - Plan catalog and entitlement fallback (GF-E01 to GF-E06)
//! - Plan-change write-path decisions (GF-W01 to GF-W03)
//! - Lifecycle edge list and projections (GF-L01 to GF-L07)
//! - Error taxonomy classification (GF-X01 to GF-X03)

#[cfg(test)]
mod entitlement_tests {
    use crate::catalog::{Plan, PlanCatalog};
    use giftforge_shared::{FeatureFlag, PlanTier};

    // =========================================================================
    // GF-E01: New customer falls back to the free feature set, never
    // "no entitlement"
    // =========================================================================
    #[test]
    fn test_fallback_feature_set_is_the_free_plan() {
        let catalog = PlanCatalog::builtin();
        let free = catalog.free();
        assert_eq!(free.tier, PlanTier::Free);
        // Every flag present and false: scenario A's shape.
        for (_, granted) in free.feature_set() {
            assert!(!granted);
        }
        assert_eq!(free.feature_set().len(), FeatureFlag::all().len());
    }

    // =========================================================================
    // GF-E02: Round-trip - resolved pro set equals the catalog's pro entry
    // =========================================================================
    #[test]
    fn test_pro_feature_set_matches_catalog_entry_exactly() {
        let catalog = PlanCatalog::builtin();
        let resolved = catalog.get(PlanTier::Pro).unwrap().feature_set();
        assert_eq!(resolved, Plan::pro().feature_set());
        assert!(resolved.values().all(|granted| *granted));
    }

    // =========================================================================
    // GF-E03: Unknown plan code fails with UnknownPlan before any write
    // =========================================================================
    #[test]
    fn test_unknown_plan_rejected() {
        let catalog = PlanCatalog::builtin();
        for code in ["enterprise", "PRO ", "", "premium2"] {
            assert!(catalog.require(code).is_err(), "'{code}' should be rejected");
        }
    }

    // =========================================================================
    // GF-E04: Unknown feature flag fails closed, not loudly
    // =========================================================================
    #[test]
    fn test_unknown_feature_flag_fails_closed() {
        assert!(FeatureFlag::parse("live_workhops").is_none()); // typo
        assert!(FeatureFlag::parse("admin_override").is_none());
        // A None parse is reported as "no access" by has_feature, so the
        // caller's typo degrades instead of crashing.
    }

    // =========================================================================
    // GF-E05: Tier order is strict and total
    // =========================================================================
    #[test]
    fn test_tier_order_strict_total() {
        let tiers = PlanTier::all();
        for (i, a) in tiers.iter().enumerate() {
            for (j, b) in tiers.iter().enumerate() {
                assert_eq!(a < b, i < j);
                assert_eq!(a == b, i == j);
            }
        }
    }

    // =========================================================================
    // GF-E06: Catalog price ordering follows entitlement breadth
    // =========================================================================
    #[test]
    fn test_price_monotonic_in_tier() {
        let catalog = PlanCatalog::builtin();
        let prices: Vec<i64> = catalog.iter().map(|p| p.price_cents).collect();
        assert!(prices.windows(2).all(|w| w[0] < w[1]));
    }
}

#[cfg(test)]
mod plan_change_tests {
    use crate::error::CoreError;
    use crate::ledger::{SubscriptionEvent, SubscriptionStatus};
    use crate::resolver::{plan_change_decision, PlanChangeAction};
    use giftforge_shared::PlanTier;
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn active_event(plan: PlanTier) -> SubscriptionEvent {
        SubscriptionEvent {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            plan,
            status: SubscriptionStatus::Active,
            effective_at: OffsetDateTime::now_utc(),
            superseded_at: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    // =========================================================================
    // GF-W01: Repeating a change to the current plan fails with
    // AlreadyOnPlan and schedules no ledger writes
    // =========================================================================
    #[test]
    fn test_repeat_change_is_already_on_plan() {
        let current = active_event(PlanTier::Premium);
        let decision = plan_change_decision(Some(&current), PlanTier::Premium);
        assert!(matches!(
            decision,
            Err(CoreError::AlreadyOnPlan(code)) if code == "premium"
        ));
    }

    // =========================================================================
    // GF-W02: A change to a different plan supersedes exactly the single
    // active row, then inserts - the two writes share one transaction
    // =========================================================================
    #[test]
    fn test_change_supersedes_the_single_active_row() {
        let current = active_event(PlanTier::Free);
        let decision = plan_change_decision(Some(&current), PlanTier::Pro).unwrap();
        assert_eq!(
            decision,
            PlanChangeAction::Supersede {
                superseded_id: current.id
            }
        );

        // Downgrades take the same path as upgrades.
        let pro = active_event(PlanTier::Pro);
        let down = plan_change_decision(Some(&pro), PlanTier::Free).unwrap();
        assert_eq!(
            down,
            PlanChangeAction::Supersede {
                superseded_id: pro.id
            }
        );
    }

    // =========================================================================
    // GF-W03: A customer with no active row gets a plain insert - the
    // change still succeeds even when resolve never materialized free
    // =========================================================================
    #[test]
    fn test_no_active_row_means_insert_only() {
        let decision = plan_change_decision(None, PlanTier::Premium).unwrap();
        assert_eq!(decision, PlanChangeAction::InsertOnly);
    }
}

#[cfg(test)]
mod lifecycle_tests {
    use crate::lifecycle::{CoarseStatus, LifecycleState};

    // =========================================================================
    // GF-L01: Scenario D - submitted cannot skip to packed
    // =========================================================================
    #[test]
    fn test_no_skip_from_submitted_to_packed() {
        assert!(!LifecycleState::Submitted.can_transition_to(LifecycleState::Packed));
        // and the legal first step still works
        assert!(LifecycleState::Submitted.can_transition_to(LifecycleState::InDesign));
    }

    // =========================================================================
    // GF-L02: Full happy-path walk is exactly six transitions
    // =========================================================================
    #[test]
    fn test_happy_path_walk() {
        let mut state = LifecycleState::Submitted;
        let mut steps = 0;
        while let Some(next) = LifecycleState::all()
            .into_iter()
            .find(|&s| s != LifecycleState::Cancelled && state.can_transition_to(s))
        {
            state = next;
            steps += 1;
            assert!(steps <= 6, "walk should terminate");
        }
        assert_eq!(state, LifecycleState::Delivered);
        assert_eq!(steps, 6);
    }

    // =========================================================================
    // GF-L03: Cancellation is terminal - nothing leaves cancelled
    // =========================================================================
    #[test]
    fn test_cancelled_is_terminal() {
        for target in LifecycleState::all() {
            assert!(!LifecycleState::Cancelled.can_transition_to(target));
        }
    }

    // =========================================================================
    // GF-L04: Delivered cannot be cancelled
    // =========================================================================
    #[test]
    fn test_delivered_cannot_be_cancelled() {
        assert!(!LifecycleState::Delivered.can_transition_to(LifecycleState::Cancelled));
    }

    // =========================================================================
    // GF-L05: Self-transitions are always illegal
    // =========================================================================
    #[test]
    fn test_no_self_transitions() {
        for state in LifecycleState::all() {
            assert!(!state.can_transition_to(state), "{state} -> {state}");
        }
    }

    // =========================================================================
    // GF-L06: Coarse status projection is total over the state space
    // =========================================================================
    #[test]
    fn test_coarse_projection_total() {
        let mut seen = std::collections::HashSet::new();
        for state in LifecycleState::all() {
            seen.insert(state.coarse_status());
        }
        assert_eq!(seen.len(), 4);
        assert!(seen.contains(&CoarseStatus::Pending));
        assert!(seen.contains(&CoarseStatus::InProgress));
        assert!(seen.contains(&CoarseStatus::Completed));
        assert!(seen.contains(&CoarseStatus::Cancelled));
    }

    // =========================================================================
    // GF-L07: Exactly five states project to in_progress
    // =========================================================================
    #[test]
    fn test_in_progress_covers_the_middle_five() {
        let in_progress = LifecycleState::all()
            .into_iter()
            .filter(|s| s.coarse_status() == CoarseStatus::InProgress)
            .count();
        assert_eq!(in_progress, 5);
    }
}

#[cfg(test)]
mod error_tests {
    use crate::error::CoreError;
    use crate::lifecycle::LifecycleState;
    use uuid::Uuid;

    // =========================================================================
    // GF-X01: Expected domain outcomes are distinguishable from faults
    // =========================================================================
    #[test]
    fn test_domain_outcome_classification() {
        let outcomes: Vec<CoreError> = vec![
            CoreError::CustomerNotFound(Uuid::new_v4()),
            CoreError::UnknownPlan("gold".into()),
            CoreError::AlreadyOnPlan("pro".into()),
            CoreError::RequestNotFound(Uuid::new_v4()),
            CoreError::ImageNotFound(Uuid::new_v4()),
            CoreError::IllegalTransition {
                from: LifecycleState::Submitted,
                to: LifecycleState::Packed,
            },
            CoreError::NotOrphaned {
                image_id: Uuid::new_v4(),
                request_id: Uuid::new_v4(),
            },
            CoreError::ConcurrentModification("raced".into()),
            CoreError::IntegrityViolation("two active rows".into()),
        ];
        for outcome in outcomes {
            assert!(outcome.is_domain_outcome(), "{outcome} should be a domain outcome");
        }
        assert!(!CoreError::Database(sqlx::Error::PoolClosed).is_domain_outcome());
    }

    // =========================================================================
    // GF-X02: Illegal transition message names both states
    // =========================================================================
    #[test]
    fn test_illegal_transition_message() {
        let err = CoreError::IllegalTransition {
            from: LifecycleState::Submitted,
            to: LifecycleState::Packed,
        };
        let message = err.to_string();
        assert!(message.contains("submitted"));
        assert!(message.contains("packed"));
    }

    // =========================================================================
    // GF-X03: AlreadyOnPlan carries the plan code for the caller's message
    // =========================================================================
    #[test]
    fn test_already_on_plan_message() {
        let err = CoreError::AlreadyOnPlan("pro".into());
        assert!(err.to_string().contains("pro"));
    }
}
