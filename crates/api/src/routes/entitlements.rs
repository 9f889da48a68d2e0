//! Entitlement routes
//!
//! Thin adapters over the resolver; all reads and writes of
//! subscription state go through it, never the tables directly.

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::Json;
use giftforge_shared::PlanTier;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Request to change a customer's plan
#[derive(Debug, Deserialize)]
pub struct ChangePlanRequest {
    pub plan_code: String,
    /// Acting user for the audit trail, if the gateway knows it
    pub actor_id: Option<Uuid>,
}

/// Entitlement response shared by resolve and change-plan
#[derive(Debug, Serialize)]
pub struct EntitlementResponse {
    pub plan_code: PlanTier,
    pub feature_set: BTreeMap<String, bool>,
    pub effective_at: OffsetDateTime,
}

/// Response for a feature gate check
#[derive(Debug, Serialize)]
pub struct HasFeatureResponse {
    pub has_feature: bool,
}

pub async fn resolve(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
) -> Result<Json<EntitlementResponse>, ApiError> {
    let entitlement = state.core.entitlements.resolve(customer_id).await?;
    Ok(Json(EntitlementResponse {
        plan_code: entitlement.plan_code,
        feature_set: entitlement.feature_set,
        effective_at: entitlement.effective_at,
    }))
}

pub async fn change_plan(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
    Json(req): Json<ChangePlanRequest>,
) -> Result<Json<EntitlementResponse>, ApiError> {
    let entitlement = state
        .core
        .entitlements
        .change_plan(customer_id, &req.plan_code, req.actor_id)
        .await?;
    Ok(Json(EntitlementResponse {
        plan_code: entitlement.plan_code,
        feature_set: entitlement.feature_set,
        effective_at: entitlement.effective_at,
    }))
}

pub async fn has_feature(
    State(state): State<AppState>,
    Path((customer_id, flag)): Path<(Uuid, String)>,
) -> Result<Json<HasFeatureResponse>, ApiError> {
    let has_feature = state.core.entitlements.has_feature(customer_id, &flag).await?;
    Ok(Json(HasFeatureResponse { has_feature }))
}

/// One ledger entry in the history response
#[derive(Debug, Serialize)]
pub struct HistoryEntry {
    pub plan_code: PlanTier,
    pub status: String,
    pub effective_at: OffsetDateTime,
    pub superseded_at: Option<OffsetDateTime>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub events: Vec<HistoryEntry>,
}

/// Subscription event history, newest first. Admin-facing read over the
/// ledger; the active row always comes through `resolve` instead.
pub async fn history(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let events = state.core.entitlements.ledger().history(customer_id).await?;
    Ok(Json(HistoryResponse {
        events: events
            .into_iter()
            .map(|e| HistoryEntry {
                plan_code: e.plan,
                status: e.status.as_str().to_string(),
                effective_at: e.effective_at,
                superseded_at: e.superseded_at,
            })
            .collect(),
    }))
}
