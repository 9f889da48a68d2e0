//! Consistency invariants
//!
//! Runnable read-only checks over the entitlement ledger and request
//! lifecycle tables. Each check is a real SQL query; violations carry
//! enough context to debug. Run them after any bulk import or manual
//! repair to confirm the system is in a valid state. Checks never write.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::CoreResult;

/// Result of a single failed invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Subject row(s) affected (customer or request/image ids)
    pub subject_ids: Vec<Uuid>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    /// Severity level
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - entitlements may be resolved incorrectly
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
    /// Low - minor inconsistency, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    /// When the check was run
    pub checked_at: OffsetDateTime,
    /// Total number of checks run
    pub checks_run: usize,
    /// Number of checks that passed
    pub checks_passed: usize,
    /// Number of checks that failed
    pub checks_failed: usize,
    /// List of all violations found
    pub violations: Vec<InvariantViolation>,
    /// Overall health status
    pub healthy: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct MultipleActiveRow {
    customer_id: Uuid,
    active_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct UnknownPlanRow {
    id: Uuid,
    customer_id: Uuid,
    plan_code: String,
}

#[derive(Debug, sqlx::FromRow)]
struct SupersededNoTimestampRow {
    id: Uuid,
    customer_id: Uuid,
}

#[derive(Debug, sqlx::FromRow)]
struct OrphanImageRow {
    id: Uuid,
    request_id: Uuid,
    blob_reference: String,
}

#[derive(Debug, sqlx::FromRow)]
struct TerminalNoTimestampRow {
    id: Uuid,
    lifecycle_state: String,
}

/// Service for running consistency checks
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> CoreResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_single_active_subscription().await?);
        violations.extend(self.check_active_plan_in_catalog().await?);
        violations.extend(self.check_superseded_has_timestamp().await?);
        violations.extend(self.check_orphaned_request_images().await?);
        violations.extend(self.check_terminal_state_timestamps().await?);

        let checks_run = Self::available_checks().len();
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: At most 1 active subscription event per customer
    ///
    /// More than one active row makes entitlement resolution ambiguous;
    /// this is the failure mode the whole ledger design exists to
    /// prevent.
    async fn check_single_active_subscription(&self) -> CoreResult<Vec<InvariantViolation>> {
        let rows: Vec<MultipleActiveRow> = sqlx::query_as(
            r#"
            SELECT customer_id, COUNT(*) as active_count
            FROM subscription_events
            WHERE status = 'active'
            GROUP BY customer_id
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "single_active_subscription".to_string(),
                subject_ids: vec![row.customer_id],
                description: format!(
                    "Customer has {} active subscription events (expected at most 1)",
                    row.active_count
                ),
                context: serde_json::json!({
                    "active_count": row.active_count,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 2: Every active event references a catalog plan
    ///
    /// An active event pointing outside the catalog cannot be resolved
    /// to a feature set.
    async fn check_active_plan_in_catalog(&self) -> CoreResult<Vec<InvariantViolation>> {
        let rows: Vec<UnknownPlanRow> = sqlx::query_as(
            r#"
            SELECT se.id, se.customer_id, se.plan_code
            FROM subscription_events se
            LEFT JOIN plans p ON p.code = se.plan_code
            WHERE se.status = 'active'
              AND p.code IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "active_plan_in_catalog".to_string(),
                subject_ids: vec![row.customer_id],
                description: format!(
                    "Active subscription event references plan '{}' not in the catalog",
                    row.plan_code
                ),
                context: serde_json::json!({
                    "event_id": row.id,
                    "plan_code": row.plan_code,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 3: Superseded events carry a superseded_at timestamp
    ///
    /// A superseded row without a timestamp means a supersede ran
    /// outside the resolver's transaction.
    async fn check_superseded_has_timestamp(&self) -> CoreResult<Vec<InvariantViolation>> {
        let rows: Vec<SupersededNoTimestampRow> = sqlx::query_as(
            r#"
            SELECT id, customer_id
            FROM subscription_events
            WHERE status = 'superseded'
              AND superseded_at IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "superseded_has_timestamp".to_string(),
                subject_ids: vec![row.customer_id],
                description: "Superseded subscription event has no superseded_at timestamp"
                    .to_string(),
                context: serde_json::json!({
                    "event_id": row.id,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 4: Every request image resolves to an existing request
    ///
    /// Orphans are detected and surfaced, never silently hidden; repair
    /// goes through reconcile_orphan with a confirmed candidate.
    async fn check_orphaned_request_images(&self) -> CoreResult<Vec<InvariantViolation>> {
        let rows: Vec<OrphanImageRow> = sqlx::query_as(
            r#"
            SELECT ri.id, ri.request_id, ri.blob_reference
            FROM request_images ri
            LEFT JOIN custom_requests cr ON cr.id = ri.request_id
            WHERE cr.id IS NULL
            ORDER BY ri.id
            LIMIT 100
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "orphaned_request_images".to_string(),
                subject_ids: vec![row.id],
                description: format!(
                    "Image references request {} which does not exist",
                    row.request_id
                ),
                context: serde_json::json!({
                    "dangling_request_id": row.request_id,
                    "blob_reference": row.blob_reference,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 5: Terminal states carry their entry timestamp
    ///
    /// A delivered request without delivered_at (or cancelled without
    /// cancelled_at) means a transition bypassed the lifecycle engine.
    async fn check_terminal_state_timestamps(&self) -> CoreResult<Vec<InvariantViolation>> {
        let rows: Vec<TerminalNoTimestampRow> = sqlx::query_as(
            r#"
            SELECT id, lifecycle_state
            FROM custom_requests
            WHERE (lifecycle_state = 'delivered' AND delivered_at IS NULL)
               OR (lifecycle_state = 'cancelled' AND cancelled_at IS NULL)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "terminal_state_timestamps".to_string(),
                subject_ids: vec![row.id],
                description: format!(
                    "Request in terminal state '{}' is missing its entry timestamp",
                    row.lifecycle_state
                ),
                context: serde_json::json!({
                    "lifecycle_state": row.lifecycle_state,
                }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> CoreResult<Vec<InvariantViolation>> {
        match name {
            "single_active_subscription" => self.check_single_active_subscription().await,
            "active_plan_in_catalog" => self.check_active_plan_in_catalog().await,
            "superseded_has_timestamp" => self.check_superseded_has_timestamp().await,
            "orphaned_request_images" => self.check_orphaned_request_images().await,
            "terminal_state_timestamps" => self.check_terminal_state_timestamps().await,
            _ => Ok(vec![]),
        }
    }

    /// Get list of all available invariant checks
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "single_active_subscription",
            "active_plan_in_catalog",
            "superseded_has_timestamp",
            "orphaned_request_images",
            "terminal_state_timestamps",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_severity_display() {
        assert_eq!(ViolationSeverity::Critical.to_string(), "CRITICAL");
        assert_eq!(ViolationSeverity::High.to_string(), "HIGH");
        assert_eq!(ViolationSeverity::Medium.to_string(), "MEDIUM");
        assert_eq!(ViolationSeverity::Low.to_string(), "LOW");
    }

    #[test]
    fn test_available_checks() {
        let checks = InvariantChecker::available_checks();
        assert_eq!(checks.len(), 5);
        assert!(checks.contains(&"single_active_subscription"));
        assert!(checks.contains(&"orphaned_request_images"));
    }
}
