use sqlx::{PgPool, Pool, Postgres};

use scout_core::error::AppError;
use scout_core::models::UpsertOutcome;
use scout_core::traits::LoginStore;

/// Discovered GitHub accounts, keyed by lower-cased login.
#[derive(Clone)]
pub struct LoginRepository {
    pool: Pool<Postgres>,
}

impl LoginRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn profile(&self, login: &str) -> Result<Option<serde_json::Value>, AppError> {
        let row: Option<(Option<serde_json::Value>,)> =
            sqlx::query_as(r#"SELECT profile FROM github_users WHERE github_login = $1"#)
                .bind(login.to_lowercase())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.and_then(|(profile,)| profile))
    }
}

impl LoginStore for LoginRepository {
    async fn upsert_login(&self, login: &str) -> Result<UpsertOutcome, AppError> {
        let login = login.to_lowercase();
        let inserted: Option<(i64,)> = sqlx::query_as(
            r#"
            INSERT INTO github_users (github_login)
            VALUES ($1)
            ON CONFLICT (github_login) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&login)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if let Some((id,)) = inserted {
            return Ok(UpsertOutcome { id, inserted: true });
        }

        let (id,): (i64,) = sqlx::query_as(r#"SELECT id FROM github_users WHERE github_login = $1"#)
            .bind(&login)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(UpsertOutcome {
            id,
            inserted: false,
        })
    }

    async fn save_profile(&self, login: &str, profile: &serde_json::Value) -> Result<i64, AppError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO github_users (github_login, profile)
            VALUES ($1, $2)
            ON CONFLICT (github_login)
            DO UPDATE SET profile = EXCLUDED.profile, updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(login.to_lowercase())
        .bind(profile)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(id)
    }
}
