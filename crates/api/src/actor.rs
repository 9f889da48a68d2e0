//! Admin actor extraction
//!
//! Admin-driven operations require the caller to identify the acting
//! admin explicitly via headers; the core never falls back to a
//! built-in identity. Authentication of those headers is the gateway's
//! job and out of scope here.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use giftforge_shared::AdminIdentity;
use uuid::Uuid;

use crate::error::ApiError;

const ADMIN_ID_HEADER: &str = "x-admin-id";
const ADMIN_EMAIL_HEADER: &str = "x-admin-email";

/// Extractor for the admin identity carried in caller context headers
#[derive(Debug, Clone)]
pub struct AdminActor(pub AdminIdentity);

impl<S> FromRequestParts<S> for AdminActor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(ADMIN_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v).ok())
            .ok_or_else(|| {
                ApiError::BadRequest(format!("missing or invalid {ADMIN_ID_HEADER} header"))
            })?;

        let email = parts
            .headers
            .get(ADMIN_EMAIL_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                ApiError::BadRequest(format!("missing {ADMIN_EMAIL_HEADER} header"))
            })?;

        Ok(AdminActor(AdminIdentity::new(id, email)))
    }
}
