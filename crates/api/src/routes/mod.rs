//! HTTP routes

pub mod admin;
pub mod entitlements;
pub mod requests;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::state::AppState;

/// Build the application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        // Entitlements
        .route(
            "/v1/entitlements/{customer_id}",
            get(entitlements::resolve),
        )
        .route(
            "/v1/entitlements/{customer_id}/plan",
            post(entitlements::change_plan),
        )
        .route(
            "/v1/entitlements/{customer_id}/features/{flag}",
            get(entitlements::has_feature),
        )
        .route(
            "/v1/entitlements/{customer_id}/history",
            get(entitlements::history),
        )
        // Custom requests
        .route("/v1/requests", post(requests::create))
        .route("/v1/requests/{id}", get(requests::get))
        .route("/v1/requests/{id}/transition", post(requests::transition))
        .route(
            "/v1/requests/{id}/images",
            post(requests::attach_image).get(requests::list_images),
        )
        .route(
            "/v1/customers/{customer_id}/requests",
            get(requests::list_for_customer),
        )
        .route("/v1/requests/orphan-images", get(requests::orphan_images))
        .route(
            "/v1/requests/orphan-images/{image_id}/suggestions",
            get(requests::orphan_suggestions),
        )
        .route(
            "/v1/requests/images/{image_id}/reconcile",
            post(requests::reconcile_orphan),
        )
        // Admin diagnostics
        .route("/v1/admin/invariants", get(admin::run_all_invariants))
        .route("/v1/admin/invariants/{name}", get(admin::run_invariant))
        .with_state(state)
}

/// Liveness plus a storage ping.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let database = sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&state.pool)
        .await
        .is_ok();

    Json(json!({
        "status": if database { "ok" } else { "degraded" },
        "database": database,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
