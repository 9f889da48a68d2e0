//! Subscription event ledger
//!
//! Append-mostly record of subscription events per customer. Rows are
//! inserted by the resolver and only ever updated in place to flip
//! `status` when superseded. The single-active-subscription invariant is
//! enforced here transactionally and at the storage layer by a partial
//! unique index; a read that still finds more than one active row
//! reports `IntegrityViolation` instead of silently picking one.

use giftforge_shared::PlanTier;
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// Status of a subscription event row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Active,
    Superseded,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Superseded => "superseded",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SubscriptionStatus::Active),
            "superseded" => Some(SubscriptionStatus::Superseded),
            "cancelled" => Some(SubscriptionStatus::Cancelled),
            _ => None,
        }
    }
}

/// One immutable ledger row
#[derive(Debug, Clone)]
pub struct SubscriptionEvent {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub plan: PlanTier,
    pub status: SubscriptionStatus,
    pub effective_at: OffsetDateTime,
    pub superseded_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

/// Raw row as stored; converted into the typed event at the boundary so
/// invalid codes surface as integrity violations instead of panics.
#[derive(Debug, sqlx::FromRow)]
struct SubscriptionEventRow {
    id: Uuid,
    customer_id: Uuid,
    plan_code: String,
    status: String,
    effective_at: OffsetDateTime,
    superseded_at: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
}

impl TryFrom<SubscriptionEventRow> for SubscriptionEvent {
    type Error = CoreError;

    fn try_from(row: SubscriptionEventRow) -> CoreResult<Self> {
        let plan = PlanTier::parse(&row.plan_code).ok_or_else(|| {
            CoreError::IntegrityViolation(format!(
                "ledger row {} references unknown plan '{}'",
                row.id, row.plan_code
            ))
        })?;
        let status = SubscriptionStatus::parse(&row.status).ok_or_else(|| {
            CoreError::IntegrityViolation(format!(
                "ledger row {} has unknown status '{}'",
                row.id, row.status
            ))
        })?;
        Ok(SubscriptionEvent {
            id: row.id,
            customer_id: row.customer_id,
            plan,
            status,
            effective_at: row.effective_at,
            superseded_at: row.superseded_at,
            created_at: row.created_at,
        })
    }
}

const EVENT_COLUMNS: &str =
    "id, customer_id, plan_code, status, effective_at, superseded_at, created_at";

/// Ledger access. All mutating helpers take a caller-supplied transaction
/// so supersede + insert always commit or roll back together.
#[derive(Clone)]
pub struct EntitlementLedger {
    pool: PgPool,
}

impl EntitlementLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn customer_exists(&self, customer_id: Uuid) -> CoreResult<bool> {
        let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM customers WHERE id = $1")
            .bind(customer_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(exists.is_some())
    }

    /// The single active event for a customer, if any.
    pub async fn active_event(&self, customer_id: Uuid) -> CoreResult<Option<SubscriptionEvent>> {
        let rows: Vec<SubscriptionEventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM subscription_events \
             WHERE customer_id = $1 AND status = 'active'"
        ))
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;

        Self::single_active(customer_id, rows)
    }

    /// Same as [`active_event`](Self::active_event) but inside a
    /// transaction with a row lock, for the plan-change write path.
    pub async fn active_event_for_update(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        customer_id: Uuid,
    ) -> CoreResult<Option<SubscriptionEvent>> {
        let rows: Vec<SubscriptionEventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM subscription_events \
             WHERE customer_id = $1 AND status = 'active' FOR UPDATE"
        ))
        .bind(customer_id)
        .fetch_all(&mut **tx)
        .await?;

        Self::single_active(customer_id, rows)
    }

    fn single_active(
        customer_id: Uuid,
        rows: Vec<SubscriptionEventRow>,
    ) -> CoreResult<Option<SubscriptionEvent>> {
        if rows.len() > 1 {
            return Err(CoreError::IntegrityViolation(format!(
                "customer {} has {} active subscription events (expected at most 1)",
                customer_id,
                rows.len()
            )));
        }
        rows.into_iter().next().map(SubscriptionEvent::try_from).transpose()
    }

    /// Full event history for a customer, newest first.
    pub async fn history(&self, customer_id: Uuid) -> CoreResult<Vec<SubscriptionEvent>> {
        let rows: Vec<SubscriptionEventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM subscription_events \
             WHERE customer_id = $1 ORDER BY created_at DESC"
        ))
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SubscriptionEvent::try_from).collect()
    }

    /// Flip an active event to superseded. Must run in the same
    /// transaction as the insert that replaces it.
    pub async fn supersede(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event_id: Uuid,
        now: OffsetDateTime,
    ) -> CoreResult<()> {
        let rows_affected = sqlx::query(
            "UPDATE subscription_events SET status = 'superseded', superseded_at = $1 \
             WHERE id = $2 AND status = 'active'",
        )
        .bind(now)
        .bind(event_id)
        .execute(&mut **tx)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(CoreError::ConcurrentModification(format!(
                "subscription event {event_id} was superseded by another writer"
            )));
        }
        Ok(())
    }

    /// Insert a new active event. The partial unique index turns a race
    /// with a concurrent writer into a unique violation, reported as
    /// `ConcurrentModification`.
    pub async fn insert_active(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        customer_id: Uuid,
        plan: PlanTier,
        now: OffsetDateTime,
    ) -> CoreResult<SubscriptionEvent> {
        let row: SubscriptionEventRow = sqlx::query_as(&format!(
            "INSERT INTO subscription_events (customer_id, plan_code, status, effective_at) \
             VALUES ($1, $2, 'active', $3) RETURNING {EVENT_COLUMNS}"
        ))
        .bind(customer_id)
        .bind(plan.as_str())
        .bind(now)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                CoreError::ConcurrentModification(format!(
                    "another writer activated a subscription for customer {customer_id}"
                ))
            } else {
                CoreError::Database(e)
            }
        })?;

        SubscriptionEvent::try_from(row)
    }

    /// Insert an active free event only if the customer has no active
    /// event. Relies on the partial unique index as the conflict target,
    /// so a concurrent materialization is benign. Returns whether a row
    /// was written.
    pub async fn materialize_free_if_absent(&self, customer_id: Uuid) -> CoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO subscription_events (customer_id, plan_code, status) \
             VALUES ($1, 'free', 'active') \
             ON CONFLICT (customer_id) WHERE status = 'active' DO NOTHING",
        )
        .bind(customer_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

}

/// Postgres unique violations carry SQLSTATE 23505.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code == "23505")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(plan_code: &str, status: &str) -> SubscriptionEventRow {
        SubscriptionEventRow {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            plan_code: plan_code.to_string(),
            status: status.to_string(),
            effective_at: OffsetDateTime::now_utc(),
            superseded_at: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn status_parse_roundtrip() {
        for status in [
            SubscriptionStatus::Active,
            SubscriptionStatus::Superseded,
            SubscriptionStatus::Cancelled,
        ] {
            assert_eq!(SubscriptionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SubscriptionStatus::parse("expired"), None);
    }

    #[test]
    fn typed_event_rejects_unknown_plan_code() {
        let result = SubscriptionEvent::try_from(row("gold", "active"));
        assert!(matches!(result, Err(CoreError::IntegrityViolation(_))));
    }

    #[test]
    fn typed_event_rejects_unknown_status() {
        let result = SubscriptionEvent::try_from(row("pro", "paused"));
        assert!(matches!(result, Err(CoreError::IntegrityViolation(_))));
    }

    #[test]
    fn two_active_rows_is_an_integrity_violation_not_a_pick() {
        let customer_id = Uuid::new_v4();
        let rows = vec![row("free", "active"), row("pro", "active")];
        let result = EntitlementLedger::single_active(customer_id, rows);
        assert!(matches!(result, Err(CoreError::IntegrityViolation(_))));
    }

    #[test]
    fn zero_active_rows_is_none() {
        let result = EntitlementLedger::single_active(Uuid::new_v4(), vec![]);
        assert!(matches!(result, Ok(None)));
    }
}
