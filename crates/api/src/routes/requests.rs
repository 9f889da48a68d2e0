//! Custom request routes
//!
//! Creation is customer-facing; transitions, image reconciliation and
//! orphan tooling are admin-driven and require the acting admin in the
//! caller context headers.

use axum::extract::{Path, Query, State};
use axum::Json;
use giftforge_core::{
    CoarseStatus, LifecycleState, NewRequest, OrphanCandidate, ORPHAN_PAGE_SIZE,
};
use giftforge_shared::Uploader;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::actor::AdminActor;
use crate::error::ApiError;
use crate::state::AppState;

/// Response for a created request
#[derive(Debug, Serialize)]
pub struct CreateRequestResponse {
    pub id: Uuid,
    pub order_reference: String,
    pub lifecycle_state: LifecycleState,
}

/// Request to transition a custom request
#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub target_state: String,
}

/// Response after a transition (or for a plain read)
#[derive(Debug, Serialize)]
pub struct RequestStateResponse {
    pub id: Uuid,
    pub order_reference: String,
    pub lifecycle_state: LifecycleState,
    /// Legacy coarse status, derived from lifecycle_state
    pub status: CoarseStatus,
    pub updated_at: OffsetDateTime,
}

/// Request to attach an already-stored blob
#[derive(Debug, Deserialize)]
pub struct AttachImageRequest {
    pub blob_reference: String,
    pub uploaded_by: String,
}

#[derive(Debug, Serialize)]
pub struct AttachImageResponse {
    pub image_id: Uuid,
}

/// Keyset pagination parameters for the orphan scan
#[derive(Debug, Deserialize)]
pub struct OrphanPageParams {
    pub after: Option<Uuid>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct OrphanImageInfo {
    pub image_id: Uuid,
    pub request_id: Uuid,
    pub blob_reference: String,
    pub uploaded_at: OffsetDateTime,
}

#[derive(Debug, Serialize)]
pub struct OrphanPageResponse {
    pub orphans: Vec<OrphanImageInfo>,
    /// Pass as `after` to fetch the next page
    pub next_cursor: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ReconcileRequest {
    pub candidate_request_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ReconcileResponse {
    pub image_id: Uuid,
    pub request_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct SuggestionsResponse {
    pub candidates: Vec<OrphanCandidate>,
}

pub async fn create(
    State(state): State<AppState>,
    Json(new): Json<NewRequest>,
) -> Result<Json<CreateRequestResponse>, ApiError> {
    let request = state.core.lifecycle.create(new).await?;
    Ok(Json(CreateRequestResponse {
        id: request.id,
        order_reference: request.order_reference,
        lifecycle_state: request.lifecycle_state,
    }))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RequestStateResponse>, ApiError> {
    let request = state.core.lifecycle.get(id).await?;
    Ok(Json(RequestStateResponse {
        id: request.id,
        order_reference: request.order_reference.clone(),
        status: request.status(),
        lifecycle_state: request.lifecycle_state,
        updated_at: request.updated_at,
    }))
}

pub async fn transition(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    AdminActor(actor): AdminActor,
    Json(req): Json<TransitionRequest>,
) -> Result<Json<RequestStateResponse>, ApiError> {
    let target = LifecycleState::parse(&req.target_state).ok_or_else(|| {
        ApiError::BadRequest(format!("unknown lifecycle state '{}'", req.target_state))
    })?;

    let request = state.core.lifecycle.transition(id, target, &actor).await?;
    Ok(Json(RequestStateResponse {
        id: request.id,
        order_reference: request.order_reference.clone(),
        status: request.status(),
        lifecycle_state: request.lifecycle_state,
        updated_at: request.updated_at,
    }))
}

pub async fn attach_image(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AttachImageRequest>,
) -> Result<Json<AttachImageResponse>, ApiError> {
    let uploaded_by = Uploader::parse(&req.uploaded_by).ok_or_else(|| {
        ApiError::BadRequest(format!("unknown uploader '{}'", req.uploaded_by))
    })?;

    let image = state
        .core
        .images
        .attach(id, &req.blob_reference, uploaded_by)
        .await?;
    Ok(Json(AttachImageResponse { image_id: image.id }))
}

#[derive(Debug, Serialize)]
pub struct RequestImageInfo {
    pub image_id: Uuid,
    pub blob_reference: String,
    pub uploaded_by: Uploader,
    pub uploaded_at: OffsetDateTime,
}

#[derive(Debug, Serialize)]
pub struct RequestImagesResponse {
    pub images: Vec<RequestImageInfo>,
}

#[derive(Debug, Serialize)]
pub struct RequestListResponse {
    pub requests: Vec<RequestStateResponse>,
}

/// Images attached to a request, oldest first.
pub async fn list_images(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RequestImagesResponse>, ApiError> {
    // 404 for a missing request rather than an empty list.
    state.core.lifecycle.get(id).await?;

    let images = state.core.images.for_request(id).await?;
    Ok(Json(RequestImagesResponse {
        images: images
            .into_iter()
            .map(|i| RequestImageInfo {
                image_id: i.id,
                blob_reference: i.blob_reference,
                uploaded_by: i.uploaded_by,
                uploaded_at: i.uploaded_at,
            })
            .collect(),
    }))
}

/// A customer's requests, newest first.
pub async fn list_for_customer(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
) -> Result<Json<RequestListResponse>, ApiError> {
    let requests = state.core.lifecycle.list_for_customer(customer_id).await?;
    Ok(Json(RequestListResponse {
        requests: requests
            .into_iter()
            .map(|r| RequestStateResponse {
                id: r.id,
                order_reference: r.order_reference.clone(),
                status: r.status(),
                lifecycle_state: r.lifecycle_state,
                updated_at: r.updated_at,
            })
            .collect(),
    }))
}

pub async fn orphan_images(
    State(state): State<AppState>,
    Query(params): Query<OrphanPageParams>,
) -> Result<Json<OrphanPageResponse>, ApiError> {
    let limit = params.limit.unwrap_or(ORPHAN_PAGE_SIZE).clamp(1, 1_000);
    let orphans = state.core.images.find_orphans(params.after, limit).await?;

    let next_cursor = (orphans.len() as i64 == limit)
        .then(|| orphans.last().map(|o| o.id))
        .flatten();

    Ok(Json(OrphanPageResponse {
        orphans: orphans
            .into_iter()
            .map(|o| OrphanImageInfo {
                image_id: o.id,
                request_id: o.request_id,
                blob_reference: o.blob_reference,
                uploaded_at: o.uploaded_at,
            })
            .collect(),
        next_cursor,
    }))
}

pub async fn orphan_suggestions(
    State(state): State<AppState>,
    Path(image_id): Path<Uuid>,
) -> Result<Json<SuggestionsResponse>, ApiError> {
    let candidates = state.core.matcher.suggest(image_id, 10).await?;
    Ok(Json(SuggestionsResponse { candidates }))
}

pub async fn reconcile_orphan(
    State(state): State<AppState>,
    Path(image_id): Path<Uuid>,
    AdminActor(actor): AdminActor,
    Json(req): Json<ReconcileRequest>,
) -> Result<Json<ReconcileResponse>, ApiError> {
    let image = state
        .core
        .images
        .reconcile_orphan(image_id, req.candidate_request_id, &actor)
        .await?;
    Ok(Json(ReconcileResponse {
        image_id: image.id,
        request_id: image.request_id,
    }))
}
