#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Giftforge Shared
//!
//! Domain-neutral types and infrastructure helpers used by every crate in
//! the workspace: plan tiers, feature flags, actor identity, and the
//! Postgres pool/migration plumbing.

pub mod db;
pub mod types;

pub use db::{create_pool, run_migrations};
pub use types::{AdminIdentity, FeatureFlag, PlanTier, Uploader};
