use sqlx::{PgPool, Pool, Postgres};

use scout_core::error::AppError;
use scout_core::models::NewRawText;
use scout_core::traits::ContentStore;

/// Raw page text keyed by URL and owning candidate.
#[derive(Clone)]
pub struct ContentRepository {
    pool: Pool<Postgres>,
}

impl ContentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl ContentStore for ContentRepository {
    async fn exists(&self, url: &str, candidate_id: Option<i64>) -> Result<bool, AppError> {
        let (found,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM raw_texts
                WHERE url = $1 AND candidate_id IS NOT DISTINCT FROM $2
            )
            "#,
        )
        .bind(url)
        .bind(candidate_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(found)
    }

    async fn save(&self, text: &NewRawText) -> Result<i64, AppError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO raw_texts (candidate_id, url, text, content_hash, source_tag)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(text.candidate_id)
        .bind(&text.url)
        .bind(&text.text)
        .bind(&text.content_hash)
        .bind(&text.source_tag)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(id)
    }
}
