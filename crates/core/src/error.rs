//! Core error taxonomy
//!
//! Every variant except `Database` is an expected domain outcome that
//! callers turn into normal-flow responses; only `Database` represents a
//! genuine infrastructure fault worth retrying with backoff. The core
//! itself never retries.

use thiserror::Error;
use uuid::Uuid;

use crate::lifecycle::LifecycleState;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("customer {0} not found")]
    CustomerNotFound(Uuid),

    #[error("unknown plan '{0}'")]
    UnknownPlan(String),

    #[error("customer is already on plan '{0}'")]
    AlreadyOnPlan(String),

    #[error("custom request {0} not found")]
    RequestNotFound(Uuid),

    #[error("request image {0} not found")]
    ImageNotFound(Uuid),

    #[error("illegal transition from '{from}' to '{to}'")]
    IllegalTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("image {image_id} is already attached to existing request {request_id}")]
    NotOrphaned { image_id: Uuid, request_id: Uuid },

    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl CoreError {
    /// Whether this error is an expected domain outcome (as opposed to an
    /// infrastructure fault the caller may retry).
    pub fn is_domain_outcome(&self) -> bool {
        !matches!(self, CoreError::Database(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_outcomes_are_not_faults() {
        assert!(CoreError::UnknownPlan("gold".into()).is_domain_outcome());
        assert!(CoreError::AlreadyOnPlan("pro".into()).is_domain_outcome());
        assert!(!CoreError::Database(sqlx::Error::PoolClosed).is_domain_outcome());
    }
}
