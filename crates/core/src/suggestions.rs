//! Orphan match suggestions
//!
//! Best-effort advisory tool that proposes candidate requests for an
//! orphaned image, scored by title-token overlap with the blob name and
//! by date proximity between request creation and image upload. It only
//! proposes; committing a candidate is always an explicit
//! [`reconcile_orphan`](crate::images::ImageAssociationIndex::reconcile_orphan)
//! call with a human in the loop.

use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// How far around the upload time to look for candidate requests.
const CANDIDATE_WINDOW_DAYS: i64 = 14;

/// Minimum score for a candidate to be worth proposing.
const MIN_SCORE: f64 = 0.15;

/// A proposed request for an orphaned image
#[derive(Debug, Clone, Serialize)]
pub struct OrphanCandidate {
    pub request_id: Uuid,
    pub order_reference: String,
    pub title: String,
    pub created_at: OffsetDateTime,
    /// Confidence in [0, 1]; advisory only.
    pub score: f64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct CandidateRow {
    id: Uuid,
    order_reference: String,
    title: String,
    created_at: OffsetDateTime,
}

#[derive(Debug, sqlx::FromRow)]
struct OrphanRow {
    blob_reference: String,
    uploaded_at: OffsetDateTime,
    /// Whether the current association resolves to a real request.
    request_exists: bool,
}

/// Suggestion generator for orphaned images
#[derive(Clone)]
pub struct OrphanMatcher {
    pool: PgPool,
}

impl OrphanMatcher {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Propose up to `limit` candidate requests for an orphaned image,
    /// best first. An image whose association still resolves gets no
    /// proposals. Read-only; never writes an association.
    pub async fn suggest(&self, image_id: Uuid, limit: usize) -> CoreResult<Vec<OrphanCandidate>> {
        let orphan: Option<OrphanRow> = sqlx::query_as(
            "SELECT ri.blob_reference, ri.uploaded_at, cr.id IS NOT NULL AS request_exists \
             FROM request_images ri \
             LEFT JOIN custom_requests cr ON cr.id = ri.request_id \
             WHERE ri.id = $1",
        )
        .bind(image_id)
        .fetch_optional(&self.pool)
        .await?;
        let orphan = orphan.ok_or(CoreError::ImageNotFound(image_id))?;

        if orphan.request_exists {
            tracing::debug!(image_id = %image_id, "Image association resolves, no suggestions");
            return Ok(Vec::new());
        }

        let rows: Vec<CandidateRow> = sqlx::query_as(
            "SELECT id, order_reference, title, created_at FROM custom_requests \
             WHERE created_at BETWEEN $1 - make_interval(days => $2) \
                               AND $1 + make_interval(days => $2) \
             ORDER BY created_at DESC \
             LIMIT 500",
        )
        .bind(orphan.uploaded_at)
        .bind(CANDIDATE_WINDOW_DAYS as i32)
        .fetch_all(&self.pool)
        .await?;

        Ok(propose(&orphan, rows, limit))
    }
}

/// Pure ranking over the fetched candidate window. Returns nothing for
/// an image whose association still resolves.
fn propose(orphan: &OrphanRow, rows: Vec<CandidateRow>, limit: usize) -> Vec<OrphanCandidate> {
    if orphan.request_exists {
        return Vec::new();
    }

    let mut candidates: Vec<OrphanCandidate> = rows
        .into_iter()
        .filter_map(|row| {
            let score = candidate_score(
                &row.title,
                row.created_at,
                &orphan.blob_reference,
                orphan.uploaded_at,
            );
            (score >= MIN_SCORE).then_some(OrphanCandidate {
                request_id: row.id,
                order_reference: row.order_reference,
                title: row.title,
                created_at: row.created_at,
                score,
            })
        })
        .collect();

    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    candidates.truncate(limit);
    candidates
}

/// Combined confidence: 60% title/blob token overlap, 40% date proximity.
fn candidate_score(
    title: &str,
    created_at: OffsetDateTime,
    blob_reference: &str,
    uploaded_at: OffsetDateTime,
) -> f64 {
    let overlap = token_overlap(&tokenize(title), &tokenize(blob_reference));
    let proximity = date_proximity(created_at, uploaded_at);
    0.6 * overlap + 0.4 * proximity
}

/// Lowercased alphanumeric tokens of length >= 3; short tokens match
/// too much in file names to be useful.
fn tokenize(s: &str) -> Vec<String> {
    s.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| t.len() >= 3)
        .map(str::to_string)
        .collect()
}

/// Jaccard overlap between two token sets.
fn token_overlap(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let set_a: std::collections::HashSet<&String> = a.iter().collect();
    let set_b: std::collections::HashSet<&String> = b.iter().collect();
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f64 / union as f64
}

/// 1.0 at zero distance, decaying linearly to 0.0 at the window edge.
fn date_proximity(a: OffsetDateTime, b: OffsetDateTime) -> f64 {
    let distance_days = (a - b).whole_hours().abs() as f64 / 24.0;
    let window = CANDIDATE_WINDOW_DAYS as f64;
    ((window - distance_days) / window).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[test]
    fn tokenize_drops_short_and_non_alphanumeric() {
        assert_eq!(
            tokenize("Mr. Fox's Birthday-Cake topper v2"),
            vec!["fox", "birthday", "cake", "topper"]
        );
        assert!(tokenize("a b c").is_empty());
    }

    #[test]
    fn overlap_is_jaccard_over_token_sets() {
        let a = tokenize("wedding ring box");
        // Blob tokens: wedding, ring, box, png. Intersection 3, union 4.
        let b = tokenize("wedding_ring_box.png");
        assert!((token_overlap(&a, &b) - 0.75).abs() < f64::EPSILON);

        assert!((token_overlap(&a, &a) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn disjoint_token_sets_score_zero() {
        let a = tokenize("knitted scarf");
        let b = tokenize("IMG_20250114_093211.jpg");
        assert_eq!(token_overlap(&a, &b), 0.0);
    }

    #[test]
    fn empty_tokens_score_zero_not_nan() {
        assert_eq!(token_overlap(&[], &tokenize("anything here")), 0.0);
        assert_eq!(token_overlap(&[], &[]), 0.0);
    }

    #[test]
    fn date_proximity_decays_with_distance() {
        let now = OffsetDateTime::now_utc();
        assert!((date_proximity(now, now) - 1.0).abs() < f64::EPSILON);

        let week = date_proximity(now, now + Duration::days(7));
        assert!(week > 0.0 && week < 1.0);

        // Outside the window: clamped to zero, never negative.
        assert_eq!(date_proximity(now, now + Duration::days(30)), 0.0);
    }

    #[test]
    fn linked_image_gets_no_proposals() {
        let now = OffsetDateTime::now_utc();
        let rows = vec![CandidateRow {
            id: Uuid::new_v4(),
            order_reference: "GF-202608-AAAAAA".to_string(),
            title: "Oak keepsake box".to_string(),
            created_at: now,
        }];

        // A perfect-match candidate is still withheld while the image's
        // current association resolves.
        let linked = OrphanRow {
            blob_reference: "uploads/oak_keepsake_box.png".to_string(),
            uploaded_at: now,
            request_exists: true,
        };
        assert!(propose(&linked, rows.clone(), 10).is_empty());

        let orphaned = OrphanRow {
            request_exists: false,
            ..linked
        };
        let proposals = propose(&orphaned, rows, 10);
        assert_eq!(proposals.len(), 1);
        assert!(proposals[0].score > MIN_SCORE);
    }

    #[test]
    fn score_prefers_same_name_recent_request() {
        let now = OffsetDateTime::now_utc();
        let strong = candidate_score(
            "Oak keepsake box",
            now,
            "uploads/oak_keepsake_box_final.png",
            now,
        );
        let weak = candidate_score(
            "Ceramic mug set",
            now - Duration::days(13),
            "uploads/oak_keepsake_box_final.png",
            now,
        );
        assert!(strong > weak);
        assert!(strong > MIN_SCORE);
    }
}
