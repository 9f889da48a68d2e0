//! Image association index
//!
//! Maintains the many-to-one mapping between uploaded reference images
//! and the custom request they belong to. [`ImageAssociationIndex::attach`]
//! is the only legitimate write path for the association; orphan
//! detection and reconciliation exist because legacy rows predate
//! referential integrity.

use giftforge_shared::{AdminIdentity, Uploader};
use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::events::{ActorType, DomainEventBuilder, DomainEventLogger, DomainEventType};

/// One uploaded reference image
#[derive(Debug, Clone, Serialize)]
pub struct RequestImage {
    pub id: Uuid,
    pub request_id: Uuid,
    pub blob_reference: String,
    pub uploaded_by: Uploader,
    pub uploaded_at: OffsetDateTime,
}

#[derive(Debug, sqlx::FromRow)]
struct RequestImageRow {
    id: Uuid,
    request_id: Uuid,
    blob_reference: String,
    uploaded_by: String,
    uploaded_at: OffsetDateTime,
}

impl TryFrom<RequestImageRow> for RequestImage {
    type Error = CoreError;

    fn try_from(row: RequestImageRow) -> CoreResult<Self> {
        let uploaded_by = Uploader::parse(&row.uploaded_by).ok_or_else(|| {
            CoreError::IntegrityViolation(format!(
                "image {} has unknown uploader '{}'",
                row.id, row.uploaded_by
            ))
        })?;
        Ok(RequestImage {
            id: row.id,
            request_id: row.request_id,
            blob_reference: row.blob_reference,
            uploaded_by,
            uploaded_at: row.uploaded_at,
        })
    }
}

const IMAGE_COLUMNS: &str = "id, request_id, blob_reference, uploaded_by, uploaded_at";

/// Default page size for orphan scans
pub const ORPHAN_PAGE_SIZE: i64 = 100;

/// Association index over `request_images`
#[derive(Clone)]
pub struct ImageAssociationIndex {
    pool: PgPool,
    event_logger: DomainEventLogger,
}

impl ImageAssociationIndex {
    pub fn new(pool: PgPool) -> Self {
        let event_logger = DomainEventLogger::new(pool.clone());
        Self { pool, event_logger }
    }

    /// Associate an already-stored blob with a request.
    ///
    /// The existence check and the insert run in one transaction, so a
    /// missing request fails with `RequestNotFound` and no row written.
    pub async fn attach(
        &self,
        request_id: Uuid,
        blob_reference: &str,
        uploaded_by: Uploader,
    ) -> CoreResult<RequestImage> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM custom_requests WHERE id = $1")
            .bind(request_id)
            .fetch_optional(&mut *tx)
            .await?;
        require_request(exists.is_some(), request_id)?;

        let row: RequestImageRow = sqlx::query_as(&format!(
            "INSERT INTO request_images (request_id, blob_reference, uploaded_by) \
             VALUES ($1, $2, $3) RETURNING {IMAGE_COLUMNS}"
        ))
        .bind(request_id)
        .bind(blob_reference)
        .bind(uploaded_by.as_str())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let image = RequestImage::try_from(row)?;

        tracing::info!(
            image_id = %image.id,
            request_id = %request_id,
            uploaded_by = %uploaded_by,
            "Image attached to request"
        );

        if let Err(e) = self
            .event_logger
            .log_event(
                DomainEventBuilder::new(request_id, DomainEventType::ImageAttached).data(
                    serde_json::json!({
                        "image_id": image.id,
                        "blob_reference": image.blob_reference,
                        "uploaded_by": uploaded_by.as_str(),
                    }),
                ),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to log image attach event");
        }

        Ok(image)
    }

    /// One page of images whose `request_id` resolves to no request.
    ///
    /// Keyset-paginated on image id: pass the last id of the previous
    /// page as `after` to continue, or `None` to (re)start. Read-only.
    pub async fn find_orphans(
        &self,
        after: Option<Uuid>,
        limit: i64,
    ) -> CoreResult<Vec<RequestImage>> {
        let limit = limit.clamp(1, 1_000);
        let rows: Vec<RequestImageRow> = sqlx::query_as(&format!(
            "SELECT ri.{} FROM request_images ri \
             LEFT JOIN custom_requests cr ON cr.id = ri.request_id \
             WHERE cr.id IS NULL AND ($1::uuid IS NULL OR ri.id > $1) \
             ORDER BY ri.id \
             LIMIT $2",
            IMAGE_COLUMNS.replace(", ", ", ri.")
        ))
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RequestImage::try_from).collect()
    }

    /// Re-point an orphaned image at a confirmed candidate request.
    ///
    /// Refuses to re-parent an image whose current association is valid
    /// (`NotOrphaned`) and validates the candidate exists
    /// (`RequestNotFound`). Candidate selection is the advisory
    /// matcher's job; this only performs the confirmed re-point.
    pub async fn reconcile_orphan(
        &self,
        image_id: Uuid,
        candidate_request_id: Uuid,
        actor: &AdminIdentity,
    ) -> CoreResult<RequestImage> {
        let mut tx = self.pool.begin().await?;

        let row: Option<RequestImageRow> = sqlx::query_as(&format!(
            "SELECT {IMAGE_COLUMNS} FROM request_images WHERE id = $1 FOR UPDATE"
        ))
        .bind(image_id)
        .fetch_optional(&mut *tx)
        .await?;
        let image = row
            .map(RequestImage::try_from)
            .transpose()?
            .ok_or(CoreError::ImageNotFound(image_id))?;

        let current_valid: Option<i32> =
            sqlx::query_scalar("SELECT 1 FROM custom_requests WHERE id = $1")
                .bind(image.request_id)
                .fetch_optional(&mut *tx)
                .await?;
        if current_valid.is_some() {
            return Err(CoreError::NotOrphaned {
                image_id,
                request_id: image.request_id,
            });
        }

        let candidate_exists: Option<i32> =
            sqlx::query_scalar("SELECT 1 FROM custom_requests WHERE id = $1")
                .bind(candidate_request_id)
                .fetch_optional(&mut *tx)
                .await?;
        if candidate_exists.is_none() {
            return Err(CoreError::RequestNotFound(candidate_request_id));
        }

        let row: RequestImageRow = sqlx::query_as(&format!(
            "UPDATE request_images SET request_id = $1 WHERE id = $2 RETURNING {IMAGE_COLUMNS}"
        ))
        .bind(candidate_request_id)
        .bind(image_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let reconciled = RequestImage::try_from(row)?;

        tracing::info!(
            image_id = %image_id,
            old_request_id = %image.request_id,
            new_request_id = %candidate_request_id,
            actor = %actor.email,
            "Orphaned image reconciled"
        );

        if let Err(e) = self
            .event_logger
            .log_event(
                DomainEventBuilder::new(candidate_request_id, DomainEventType::OrphanReconciled)
                    .data(serde_json::json!({
                        "image_id": image_id,
                        "previous_request_id": image.request_id,
                    }))
                    .actor(actor.id, ActorType::Admin),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to log orphan reconciliation event");
        }

        Ok(reconciled)
    }

    /// Images attached to a request, oldest first.
    pub async fn for_request(&self, request_id: Uuid) -> CoreResult<Vec<RequestImage>> {
        let rows: Vec<RequestImageRow> = sqlx::query_as(&format!(
            "SELECT {IMAGE_COLUMNS} FROM request_images \
             WHERE request_id = $1 ORDER BY uploaded_at"
        ))
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RequestImage::try_from).collect()
    }
}

/// Pre-check for the attach write path. Runs inside the same
/// transaction as the insert; the insert never executes for a missing
/// request.
fn require_request(exists: bool, request_id: Uuid) -> CoreResult<()> {
    if exists {
        Ok(())
    } else {
        Err(CoreError::RequestNotFound(request_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_precheck_gates_the_insert() {
        // A missing request fails with RequestNotFound and the insert
        // after the check is never reached, so no row is written.
        let request_id = Uuid::new_v4();
        assert!(matches!(
            require_request(false, request_id),
            Err(CoreError::RequestNotFound(id)) if id == request_id
        ));
        assert!(require_request(true, request_id).is_ok());
    }

    #[test]
    fn uploader_parse_roundtrip() {
        assert_eq!(Uploader::parse("customer"), Some(Uploader::Customer));
        assert_eq!(Uploader::parse("admin"), Some(Uploader::Admin));
        assert_eq!(Uploader::parse("bot"), None);
    }

    #[test]
    fn typed_image_rejects_unknown_uploader() {
        let row = RequestImageRow {
            id: Uuid::new_v4(),
            request_id: Uuid::new_v4(),
            blob_reference: "blobs/abc123.png".to_string(),
            uploaded_by: "robot".to_string(),
            uploaded_at: OffsetDateTime::now_utc(),
        };
        assert!(matches!(
            RequestImage::try_from(row),
            Err(CoreError::IntegrityViolation(_))
        ));
    }

    #[test]
    fn orphan_page_columns_are_qualified() {
        // The orphan query prefixes every column with the image alias so
        // the LEFT JOIN cannot introduce ambiguity.
        let qualified = format!("ri.{}", IMAGE_COLUMNS.replace(", ", ", ri."));
        assert_eq!(
            qualified,
            "ri.id, ri.request_id, ri.blob_reference, ri.uploaded_by, ri.uploaded_at"
        );
    }
}
