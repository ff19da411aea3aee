use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};

use scout_core::error::AppError;
use scout_core::models::OpenReviewProfile;
use scout_core::traits::OpenReviewStore;

/// OpenReview profiles, keyed by profile id (`~First_Last1`).
#[derive(Clone)]
pub struct OpenReviewRepository {
    pool: Pool<Postgres>,
}

impl OpenReviewRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn profile(&self, profile_id: &str) -> Result<Option<serde_json::Value>, AppError> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as(r#"SELECT profile FROM openreview_users WHERE profile_id = $1"#)
                .bind(profile_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(|(profile,)| profile))
    }

    pub async fn candidate_id(&self, profile_id: &str) -> Result<Option<i64>, AppError> {
        let row: Option<(Option<i64>,)> =
            sqlx::query_as(r#"SELECT candidate_id FROM openreview_users WHERE profile_id = $1"#)
                .bind(profile_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.and_then(|(candidate_id,)| candidate_id))
    }
}

impl OpenReviewStore for OpenReviewRepository {
    async fn last_crawled(&self, profile_id: &str) -> Result<Option<DateTime<Utc>>, AppError> {
        let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
            r#"SELECT last_crawled_at FROM openreview_users WHERE profile_id = $1"#,
        )
        .bind(profile_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(|(at,)| at))
    }

    async fn save_profile(
        &self,
        profile: &OpenReviewProfile,
        candidate_id: Option<i64>,
    ) -> Result<i64, AppError> {
        let document = serde_json::to_value(profile)?;
        // A later crawl without a candidate keeps the one already linked.
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO openreview_users (profile_id, profile_url, candidate_id, profile)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (profile_id)
            DO UPDATE SET
                profile_url = EXCLUDED.profile_url,
                candidate_id = COALESCE(EXCLUDED.candidate_id, openreview_users.candidate_id),
                profile = EXCLUDED.profile,
                last_crawled_at = NOW(),
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(&profile.profile_id)
        .bind(&profile.profile_url)
        .bind(candidate_id)
        .bind(&document)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(id)
    }
}
