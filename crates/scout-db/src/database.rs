use scout_core::error::AppError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::DatabaseConfig;
use crate::content_repository::ContentRepository;
use crate::login_repository::LoginRepository;
use crate::openreview_repository::OpenReviewRepository;
use crate::task_repository::TaskRepository;

/// Owns the connection pool, runs migrations and hands out repositories.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {e}")))?;

        tracing::debug!(max_connections = config.max_connections, "Database pool ready");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the pending files of `migrations/`.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    pub fn task_repo(&self) -> TaskRepository {
        TaskRepository::new(self.pool.clone())
    }

    pub fn login_repo(&self) -> LoginRepository {
        LoginRepository::new(self.pool.clone())
    }

    pub fn content_repo(&self) -> ContentRepository {
        ContentRepository::new(self.pool.clone())
    }

    pub fn openreview_repo(&self) -> OpenReviewRepository {
        OpenReviewRepository::new(self.pool.clone())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
