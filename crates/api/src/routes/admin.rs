//! Admin diagnostics routes
//!
//! Read-only invariant checks. These go through the checker service,
//! never the tables directly, and require an acting admin.

use axum::extract::{Path, State};
use axum::Json;
use giftforge_core::{InvariantCheckSummary, InvariantChecker, InvariantViolation};
use serde::Serialize;

use crate::actor::AdminActor;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SingleCheckResponse {
    pub invariant: String,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

pub async fn run_all_invariants(
    State(state): State<AppState>,
    AdminActor(actor): AdminActor,
) -> Result<Json<InvariantCheckSummary>, ApiError> {
    let summary = state.core.invariants.run_all_checks().await?;
    tracing::info!(
        actor = %actor.email,
        healthy = summary.healthy,
        checks_failed = summary.checks_failed,
        "Invariant check run"
    );
    Ok(Json(summary))
}

pub async fn run_invariant(
    State(state): State<AppState>,
    Path(name): Path<String>,
    AdminActor(_actor): AdminActor,
) -> Result<Json<SingleCheckResponse>, ApiError> {
    if !InvariantChecker::available_checks().contains(&name.as_str()) {
        return Err(ApiError::BadRequest(format!("unknown invariant '{name}'")));
    }

    let violations = state.core.invariants.run_check(&name).await?;
    Ok(Json(SingleCheckResponse {
        healthy: violations.is_empty(),
        invariant: name,
        violations,
    }))
}
