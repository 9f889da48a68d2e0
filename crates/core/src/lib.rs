// Core crate clippy configuration
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Giftforge Core
//!
//! The two coupled subsystems behind the crafts commerce backend:
//!
//! - **Entitlement resolution**: which subscription plan is
//!   authoritative for a customer and which features it unlocks.
//!   Single write path, append-mostly ledger, at most one active
//!   subscription event per customer.
//! - **Custom-request lifecycle**: fixed state machine for bespoke
//!   orders with atomic transitions, plus the image association index
//!   that keeps uploaded reference images pointing at real requests.
//!
//! All admin-facing reads go through these services; nothing else
//! touches the ledger or image tables directly.

pub mod catalog;
pub mod error;
pub mod events;
pub mod images;
pub mod invariants;
pub mod ledger;
pub mod lifecycle;
pub mod resolver;
pub mod suggestions;

#[cfg(test)]
mod edge_case_tests;

// Catalog
pub use catalog::{Plan, PlanCatalog};

// Error
pub use error::{CoreError, CoreResult};

// Events
pub use events::{ActorType, DomainEventBuilder, DomainEventLogger, DomainEventType};

// Images
pub use images::{ImageAssociationIndex, RequestImage, ORPHAN_PAGE_SIZE};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Ledger
pub use ledger::{EntitlementLedger, SubscriptionEvent, SubscriptionStatus};

// Lifecycle
pub use lifecycle::{CoarseStatus, CustomRequest, LifecycleState, NewRequest, RequestLifecycle};

// Resolver
pub use resolver::{EffectiveEntitlement, EntitlementResolver};

// Suggestions
pub use suggestions::{OrphanCandidate, OrphanMatcher};

use std::sync::Arc;

use sqlx::PgPool;

/// Main core service that combines all domain functionality
pub struct CoreService {
    pub catalog: Arc<PlanCatalog>,
    pub entitlements: EntitlementResolver,
    pub lifecycle: RequestLifecycle,
    pub images: ImageAssociationIndex,
    pub matcher: OrphanMatcher,
    pub invariants: InvariantChecker,
}

impl CoreService {
    /// Create the core service, loading the plan catalog from the store.
    pub async fn new(pool: PgPool) -> CoreResult<Self> {
        let catalog = Arc::new(PlanCatalog::load(&pool).await?);

        Ok(Self {
            entitlements: EntitlementResolver::new(pool.clone(), catalog.clone()),
            lifecycle: RequestLifecycle::new(pool.clone()),
            images: ImageAssociationIndex::new(pool.clone()),
            matcher: OrphanMatcher::new(pool.clone()),
            invariants: InvariantChecker::new(pool),
            catalog,
        })
    }
}
