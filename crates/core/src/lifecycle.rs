//! Custom request lifecycle
//!
//! Fixed state machine for a bespoke order:
//!
//! ```text
//! submitted -> in_design -> in_crafting -> design_completed
//!           -> packed -> courier_assigned -> delivered
//! ```
//!
//! with `cancelled` reachable from any non-terminal state. `delivered`
//! and `cancelled` are terminal. Transition validation is pure and
//! exhaustive; the database write is a single optimistic-locked update
//! so a concurrent transition fails loudly instead of clobbering state.

use std::fmt;

use giftforge_shared::AdminIdentity;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::events::{ActorType, DomainEventBuilder, DomainEventLogger, DomainEventType};

/// Fine-grained lifecycle state of a custom request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Submitted,
    InDesign,
    InCrafting,
    DesignCompleted,
    Packed,
    CourierAssigned,
    Delivered,
    Cancelled,
}

/// Legacy coarse status, derived from the lifecycle state for older
/// callers. Computed, never stored, so the two can never disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoarseStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Submitted => "submitted",
            LifecycleState::InDesign => "in_design",
            LifecycleState::InCrafting => "in_crafting",
            LifecycleState::DesignCompleted => "design_completed",
            LifecycleState::Packed => "packed",
            LifecycleState::CourierAssigned => "courier_assigned",
            LifecycleState::Delivered => "delivered",
            LifecycleState::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "submitted" => Some(LifecycleState::Submitted),
            "in_design" => Some(LifecycleState::InDesign),
            "in_crafting" => Some(LifecycleState::InCrafting),
            "design_completed" => Some(LifecycleState::DesignCompleted),
            "packed" => Some(LifecycleState::Packed),
            "courier_assigned" => Some(LifecycleState::CourierAssigned),
            "delivered" => Some(LifecycleState::Delivered),
            "cancelled" => Some(LifecycleState::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Delivered | LifecycleState::Cancelled)
    }

    /// The next state along the forward chain, if any.
    fn successor(&self) -> Option<LifecycleState> {
        match self {
            LifecycleState::Submitted => Some(LifecycleState::InDesign),
            LifecycleState::InDesign => Some(LifecycleState::InCrafting),
            LifecycleState::InCrafting => Some(LifecycleState::DesignCompleted),
            LifecycleState::DesignCompleted => Some(LifecycleState::Packed),
            LifecycleState::Packed => Some(LifecycleState::CourierAssigned),
            LifecycleState::CourierAssigned => Some(LifecycleState::Delivered),
            LifecycleState::Delivered | LifecycleState::Cancelled => None,
        }
    }

    /// Whether the fixed edge list permits moving from `self` to
    /// `target`. No stage skipping; direct cancellation from any
    /// non-terminal state is the only side branch.
    pub fn can_transition_to(&self, target: LifecycleState) -> bool {
        if target == LifecycleState::Cancelled {
            return !self.is_terminal();
        }
        self.successor() == Some(target)
    }

    /// Projection onto the legacy coarse status.
    pub fn coarse_status(&self) -> CoarseStatus {
        match self {
            LifecycleState::Submitted => CoarseStatus::Pending,
            LifecycleState::InDesign
            | LifecycleState::InCrafting
            | LifecycleState::DesignCompleted
            | LifecycleState::Packed
            | LifecycleState::CourierAssigned => CoarseStatus::InProgress,
            LifecycleState::Delivered => CoarseStatus::Completed,
            LifecycleState::Cancelled => CoarseStatus::Cancelled,
        }
    }

    /// Column stamped the first time this state is entered. The update
    /// uses COALESCE so an already-set timestamp is never overwritten.
    fn entry_timestamp_column(&self) -> Option<&'static str> {
        match self {
            LifecycleState::InDesign => Some("started_at"),
            LifecycleState::DesignCompleted => Some("design_completed_at"),
            LifecycleState::Packed => Some("packed_at"),
            LifecycleState::CourierAssigned => Some("courier_assigned_at"),
            LifecycleState::Delivered => Some("delivered_at"),
            LifecycleState::Cancelled => Some("cancelled_at"),
            LifecycleState::Submitted | LifecycleState::InCrafting => None,
        }
    }

    pub fn all() -> [LifecycleState; 8] {
        [
            LifecycleState::Submitted,
            LifecycleState::InDesign,
            LifecycleState::InCrafting,
            LifecycleState::DesignCompleted,
            LifecycleState::Packed,
            LifecycleState::CourierAssigned,
            LifecycleState::Delivered,
            LifecycleState::Cancelled,
        ]
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl CoarseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoarseStatus::Pending => "pending",
            CoarseStatus::InProgress => "in_progress",
            CoarseStatus::Completed => "completed",
            CoarseStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for CoarseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One bespoke order
#[derive(Debug, Clone, Serialize)]
pub struct CustomRequest {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub order_reference: String,
    pub title: String,
    pub description: String,
    pub priority: String,
    pub deadline: Option<OffsetDateTime>,
    pub lifecycle_state: LifecycleState,
    pub started_at: Option<OffsetDateTime>,
    pub design_completed_at: Option<OffsetDateTime>,
    pub packed_at: Option<OffsetDateTime>,
    pub courier_assigned_at: Option<OffsetDateTime>,
    pub delivered_at: Option<OffsetDateTime>,
    pub cancelled_at: Option<OffsetDateTime>,
    pub revision: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl CustomRequest {
    /// Legacy coarse status for older callers.
    pub fn status(&self) -> CoarseStatus {
        self.lifecycle_state.coarse_status()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CustomRequestRow {
    id: Uuid,
    customer_id: Uuid,
    order_reference: String,
    title: String,
    description: String,
    priority: String,
    deadline: Option<OffsetDateTime>,
    lifecycle_state: String,
    started_at: Option<OffsetDateTime>,
    design_completed_at: Option<OffsetDateTime>,
    packed_at: Option<OffsetDateTime>,
    courier_assigned_at: Option<OffsetDateTime>,
    delivered_at: Option<OffsetDateTime>,
    cancelled_at: Option<OffsetDateTime>,
    revision: i64,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<CustomRequestRow> for CustomRequest {
    type Error = CoreError;

    fn try_from(row: CustomRequestRow) -> CoreResult<Self> {
        let lifecycle_state = LifecycleState::parse(&row.lifecycle_state).ok_or_else(|| {
            CoreError::IntegrityViolation(format!(
                "request {} has unknown lifecycle state '{}'",
                row.id, row.lifecycle_state
            ))
        })?;
        Ok(CustomRequest {
            id: row.id,
            customer_id: row.customer_id,
            order_reference: row.order_reference,
            title: row.title,
            description: row.description,
            priority: row.priority,
            deadline: row.deadline,
            lifecycle_state,
            started_at: row.started_at,
            design_completed_at: row.design_completed_at,
            packed_at: row.packed_at,
            courier_assigned_at: row.courier_assigned_at,
            delivered_at: row.delivered_at,
            cancelled_at: row.cancelled_at,
            revision: row.revision,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Input for creating a custom request
#[derive(Debug, Clone, Deserialize)]
pub struct NewRequest {
    pub customer_id: Uuid,
    pub title: String,
    pub description: String,
    #[serde(default = "default_priority")]
    pub priority: String,
    pub deadline: Option<OffsetDateTime>,
}

fn default_priority() -> String {
    "normal".to_string()
}

const REQUEST_COLUMNS: &str = "id, customer_id, order_reference, title, description, priority, \
     deadline, lifecycle_state, started_at, design_completed_at, packed_at, courier_assigned_at, \
     delivered_at, cancelled_at, revision, created_at, updated_at";

/// Lifecycle engine for custom requests
#[derive(Clone)]
pub struct RequestLifecycle {
    pool: PgPool,
    event_logger: DomainEventLogger,
}

impl RequestLifecycle {
    pub fn new(pool: PgPool) -> Self {
        let event_logger = DomainEventLogger::new(pool.clone());
        Self { pool, event_logger }
    }

    /// Create a request in the `submitted` state.
    ///
    /// The order reference is generated at creation and never changes
    /// afterwards.
    pub async fn create(&self, new: NewRequest) -> CoreResult<CustomRequest> {
        let customer_exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM customers WHERE id = $1")
            .bind(new.customer_id)
            .fetch_optional(&self.pool)
            .await?;
        if customer_exists.is_none() {
            return Err(CoreError::CustomerNotFound(new.customer_id));
        }

        let order_reference = generate_order_reference();
        let row = match self.insert_request(&new, &order_reference).await {
            Ok(row) => row,
            // Not a storage fault: a caller-side retry of create would
            // duplicate the request, so regenerate the reference instead.
            Err(sqlx::Error::Database(db)) if is_order_reference_collision(db.as_ref()) => {
                let regenerated = generate_order_reference();
                tracing::warn!(
                    order_reference = %order_reference,
                    regenerated = %regenerated,
                    "Order reference collision, regenerating"
                );
                self.insert_request(&new, &regenerated).await?
            }
            Err(e) => return Err(e.into()),
        };

        let request = CustomRequest::try_from(row)?;

        tracing::info!(
            request_id = %request.id,
            customer_id = %request.customer_id,
            order_reference = %request.order_reference,
            "Custom request created"
        );

        if let Err(e) = self
            .event_logger
            .log_event(
                DomainEventBuilder::new(request.id, DomainEventType::RequestCreated)
                    .data(serde_json::json!({
                        "order_reference": request.order_reference,
                        "title": request.title,
                    }))
                    .actor(request.customer_id, ActorType::Customer),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to log request creation event");
        }

        Ok(request)
    }

    async fn insert_request(
        &self,
        new: &NewRequest,
        order_reference: &str,
    ) -> Result<CustomRequestRow, sqlx::Error> {
        sqlx::query_as(&format!(
            "INSERT INTO custom_requests \
                 (customer_id, order_reference, title, description, priority, deadline) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {REQUEST_COLUMNS}"
        ))
        .bind(new.customer_id)
        .bind(order_reference)
        .bind(&new.title)
        .bind(&new.description)
        .bind(&new.priority)
        .bind(new.deadline)
        .fetch_one(&self.pool)
        .await
    }

    /// Fetch a request by id.
    pub async fn get(&self, request_id: Uuid) -> CoreResult<CustomRequest> {
        let row: Option<CustomRequestRow> = sqlx::query_as(&format!(
            "SELECT {REQUEST_COLUMNS} FROM custom_requests WHERE id = $1"
        ))
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(CustomRequest::try_from)
            .transpose()?
            .ok_or(CoreError::RequestNotFound(request_id))
    }

    /// Requests for a customer, newest first.
    pub async fn list_for_customer(&self, customer_id: Uuid) -> CoreResult<Vec<CustomRequest>> {
        let rows: Vec<CustomRequestRow> = sqlx::query_as(&format!(
            "SELECT {REQUEST_COLUMNS} FROM custom_requests \
             WHERE customer_id = $1 ORDER BY created_at DESC"
        ))
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CustomRequest::try_from).collect()
    }

    /// Move a request to `target`.
    ///
    /// Read-validate-write runs as one transaction with an optimistic
    /// revision check: if another transition lands between our read and
    /// our write, zero rows match and the caller gets
    /// `ConcurrentModification` instead of a silent clobber. An invalid
    /// edge fails with `IllegalTransition` before any write.
    pub async fn transition(
        &self,
        request_id: Uuid,
        target: LifecycleState,
        actor: &AdminIdentity,
    ) -> CoreResult<CustomRequest> {
        let mut tx = self.pool.begin().await?;

        let row: Option<CustomRequestRow> = sqlx::query_as(&format!(
            "SELECT {REQUEST_COLUMNS} FROM custom_requests WHERE id = $1"
        ))
        .bind(request_id)
        .fetch_optional(&mut *tx)
        .await?;

        let current = row
            .map(CustomRequest::try_from)
            .transpose()?
            .ok_or(CoreError::RequestNotFound(request_id))?;

        if !current.lifecycle_state.can_transition_to(target) {
            return Err(CoreError::IllegalTransition {
                from: current.lifecycle_state,
                to: target,
            });
        }

        // First-entry timestamps are stamped via COALESCE so re-entering
        // a state (not permitted by the edge list, but defended against)
        // never overwrites an already-set value.
        let stamp = target
            .entry_timestamp_column()
            .map(|col| format!(", {col} = COALESCE({col}, NOW())"))
            .unwrap_or_default();

        let row: Option<CustomRequestRow> = sqlx::query_as(&format!(
            "UPDATE custom_requests SET \
                 lifecycle_state = $1, \
                 revision = revision + 1, \
                 updated_at = NOW(){stamp} \
             WHERE id = $2 AND revision = $3 \
             RETURNING {REQUEST_COLUMNS}"
        ))
        .bind(target.as_str())
        .bind(request_id)
        .bind(current.revision)
        .fetch_optional(&mut *tx)
        .await?;

        let row = confirm_transition_write(row, request_id)?;

        tx.commit().await?;

        let updated = CustomRequest::try_from(row)?;

        tracing::info!(
            request_id = %request_id,
            from_state = %current.lifecycle_state,
            to_state = %target,
            actor = %actor.email,
            "Request transitioned"
        );

        if let Err(e) = self
            .event_logger
            .log_event(
                DomainEventBuilder::new(request_id, DomainEventType::RequestTransitioned)
                    .data(serde_json::json!({
                        "from_state": current.lifecycle_state.as_str(),
                        "to_state": target.as_str(),
                    }))
                    .actor(actor.id, ActorType::Admin),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to log transition event");
        }

        Ok(updated)
    }
}

/// Maps the optimistic-locked update's result: no returned row means the
/// revision moved between our read and our write, and another
/// transition won the race.
fn confirm_transition_write(
    row: Option<CustomRequestRow>,
    request_id: Uuid,
) -> CoreResult<CustomRequestRow> {
    row.ok_or_else(|| {
        CoreError::ConcurrentModification(format!(
            "request {request_id} was transitioned by another caller"
        ))
    })
}

/// Unique violation on the order-reference column specifically, as
/// opposed to any other 23505.
fn is_order_reference_collision(db: &dyn sqlx::error::DatabaseError) -> bool {
    db.code().as_deref() == Some("23505")
        && db.constraint() == Some("custom_requests_order_reference_key")
}

/// Human order reference, generated once at creation. Format:
/// `GF-<year><month>-<6 upper alphanumerics>`, e.g. `GF-202608-4K7QPD`.
fn generate_order_reference() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let mut rng = rand::rng();
    let suffix: String = (0..6)
        .map(|_| {
            let idx = rng.random_range(0..ALPHABET.len());
            ALPHABET[idx] as char
        })
        .collect();
    let now = OffsetDateTime::now_utc();
    format!("GF-{}{:02}-{}", now.year(), u8::from(now.month()), suffix)
}
