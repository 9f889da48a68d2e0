//! API error mapping
//!
//! Expected domain outcomes (already-on-plan, illegal transition, and
//! friends) map to 4xx responses with a stable machine-readable code so
//! the frontend can tell them apart from real server errors. Only
//! storage faults surface as 503 with a retry hint.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use giftforge_core::CoreError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Core(core) => match core {
                CoreError::CustomerNotFound(_) => (StatusCode::NOT_FOUND, "customer_not_found"),
                CoreError::RequestNotFound(_) => (StatusCode::NOT_FOUND, "request_not_found"),
                CoreError::ImageNotFound(_) => (StatusCode::NOT_FOUND, "image_not_found"),
                CoreError::UnknownPlan(_) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "unknown_plan")
                }
                CoreError::AlreadyOnPlan(_) => (StatusCode::CONFLICT, "already_on_plan"),
                CoreError::IllegalTransition { .. } => {
                    (StatusCode::CONFLICT, "illegal_transition")
                }
                CoreError::NotOrphaned { .. } => (StatusCode::CONFLICT, "not_orphaned"),
                CoreError::ConcurrentModification(_) => {
                    (StatusCode::CONFLICT, "concurrent_modification")
                }
                CoreError::IntegrityViolation(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "integrity_violation")
                }
                CoreError::Database(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            },
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, ApiError::Core(CoreError::Database(_)))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Storage faults get logged with detail but return a generic
        // message; domain outcomes are safe to echo to the caller.
        let message = match &self {
            ApiError::Core(CoreError::Database(e)) => {
                tracing::error!(error = %e, "Storage unavailable");
                "storage temporarily unavailable, retry with backoff".to_string()
            }
            ApiError::Core(CoreError::IntegrityViolation(detail)) => {
                tracing::error!(detail = %detail, "Integrity violation detected");
                self.to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": code,
            "message": message,
            "retryable": self.retryable(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use giftforge_core::LifecycleState;
    use uuid::Uuid;

    #[test]
    fn expected_outcomes_are_never_500() {
        let outcomes = [
            ApiError::Core(CoreError::AlreadyOnPlan("pro".into())),
            ApiError::Core(CoreError::IllegalTransition {
                from: LifecycleState::Submitted,
                to: LifecycleState::Packed,
            }),
            ApiError::Core(CoreError::NotOrphaned {
                image_id: Uuid::new_v4(),
                request_id: Uuid::new_v4(),
            }),
            ApiError::Core(CoreError::ConcurrentModification("raced".into())),
        ];
        for outcome in outcomes {
            let (status, _) = outcome.status_and_code();
            assert_ne!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(status, StatusCode::CONFLICT);
        }
    }

    #[test]
    fn only_storage_faults_are_retryable() {
        assert!(ApiError::Core(CoreError::Database(sqlx::Error::PoolClosed)).retryable());
        assert!(!ApiError::Core(CoreError::AlreadyOnPlan("pro".into())).retryable());
        assert!(!ApiError::BadRequest("nope".into()).retryable());
    }

    #[test]
    fn not_found_family_maps_to_404() {
        for err in [
            ApiError::Core(CoreError::CustomerNotFound(Uuid::new_v4())),
            ApiError::Core(CoreError::RequestNotFound(Uuid::new_v4())),
            ApiError::Core(CoreError::ImageNotFound(Uuid::new_v4())),
        ] {
            assert_eq!(err.status_and_code().0, StatusCode::NOT_FOUND);
        }
    }
}
