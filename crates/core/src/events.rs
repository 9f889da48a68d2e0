//! Domain event audit log
//!
//! Append-only record of what the core did and who asked for it. Event
//! logging is best-effort: a failed audit write is warned about by the
//! call site, never propagated, so it can never roll back the mutation
//! it describes.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::CoreResult;

/// Type of domain event being recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainEventType {
    PlanChanged,
    FreePlanMaterialized,
    RequestCreated,
    RequestTransitioned,
    ImageAttached,
    OrphanReconciled,
}

impl DomainEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainEventType::PlanChanged => "plan_changed",
            DomainEventType::FreePlanMaterialized => "free_plan_materialized",
            DomainEventType::RequestCreated => "request_created",
            DomainEventType::RequestTransitioned => "request_transitioned",
            DomainEventType::ImageAttached => "image_attached",
            DomainEventType::OrphanReconciled => "orphan_reconciled",
        }
    }
}

/// Who triggered the event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    Customer,
    Admin,
    System,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::Customer => "customer",
            ActorType::Admin => "admin",
            ActorType::System => "system",
        }
    }
}

/// Builder for a domain event record
#[derive(Debug, Clone)]
pub struct DomainEventBuilder {
    subject_id: Uuid,
    event_type: DomainEventType,
    actor_type: ActorType,
    actor_id: Option<Uuid>,
    data: serde_json::Value,
}

impl DomainEventBuilder {
    pub fn new(subject_id: Uuid, event_type: DomainEventType) -> Self {
        Self {
            subject_id,
            event_type,
            actor_type: ActorType::System,
            actor_id: None,
            data: serde_json::json!({}),
        }
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn actor(mut self, actor_id: Uuid, actor_type: ActorType) -> Self {
        self.actor_id = Some(actor_id);
        self.actor_type = actor_type;
        self
    }

    pub fn actor_opt(mut self, actor_id: Option<Uuid>, actor_type: ActorType) -> Self {
        self.actor_id = actor_id;
        self.actor_type = actor_type;
        self
    }
}

/// Writes domain events to the `domain_events` table
#[derive(Clone)]
pub struct DomainEventLogger {
    pool: PgPool,
}

impl DomainEventLogger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn log_event(&self, event: DomainEventBuilder) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO domain_events (subject_id, event_type, actor_type, actor_id, data)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(event.subject_id)
        .bind(event.event_type.as_str())
        .bind(event.actor_type.as_str())
        .bind(event.actor_id)
        .bind(&event.data)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_names_are_stable() {
        assert_eq!(DomainEventType::PlanChanged.as_str(), "plan_changed");
        assert_eq!(
            DomainEventType::RequestTransitioned.as_str(),
            "request_transitioned"
        );
        assert_eq!(DomainEventType::OrphanReconciled.as_str(), "orphan_reconciled");
    }

    #[test]
    fn builder_defaults_to_system_actor() {
        let event = DomainEventBuilder::new(Uuid::new_v4(), DomainEventType::PlanChanged);
        assert_eq!(event.actor_type, ActorType::System);
        assert!(event.actor_id.is_none());
    }
}
