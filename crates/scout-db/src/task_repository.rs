use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};

use scout_core::error::AppError;
use scout_core::task::{CrawlTask, NewCrawlLog, NewTask, PendingQuery, TaskStatus, TaskTarget};
use scout_core::traits::TaskStore;

/// PostgreSQL-backed task queue and crawl log.
#[derive(Clone)]
pub struct TaskRepository {
    pool: Pool<Postgres>,
}

impl TaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: i64) -> Result<Option<CrawlTask>, AppError> {
        let row = sqlx::query_as::<_, TaskRow>(&format!("{SELECT_TASK} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(CrawlTask::try_from).transpose()
    }
}

const SELECT_TASK: &str = r#"
    SELECT id, source, task_type, target_kind, target_value, status, priority,
           retries, batch_id, depth, candidate_id, created_at
    FROM crawl_tasks
"#;

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: i64,
    source: String,
    task_type: String,
    target_kind: String,
    target_value: String,
    status: String,
    priority: i32,
    retries: i32,
    batch_id: Option<String>,
    depth: i32,
    candidate_id: Option<i64>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for CrawlTask {
    type Error = AppError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let target = TaskTarget::from_parts(&row.target_kind, row.target_value)
            .map_err(|e| AppError::DatabaseError(format!("task {}: {e}", row.id)))?;
        let status = row
            .status
            .parse()
            .map_err(|e| AppError::DatabaseError(format!("task {}: {e}", row.id)))?;

        Ok(CrawlTask {
            id: row.id,
            source: row.source,
            task_type: row.task_type,
            target,
            status,
            priority: row.priority,
            retries: row.retries.max(0) as u32,
            batch_id: row.batch_id,
            depth: row.depth.max(0) as u32,
            candidate_id: row.candidate_id,
            created_at: row.created_at,
        })
    }
}

impl TaskStore for TaskRepository {
    async fn fetch_pending(&self, query: &PendingQuery) -> Result<Vec<CrawlTask>, AppError> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            r#"{SELECT_TASK}
            WHERE source = $1
              AND status = 'pending'
              AND ($2::text[] IS NULL OR task_type = ANY($2))
              AND NOT (id = ANY($3))
            ORDER BY priority DESC, created_at ASC, id ASC
            LIMIT $4
            "#
        ))
        .bind(&query.source)
        .bind(query.task_types.as_deref())
        .bind(&query.exclude_ids)
        .bind(query.limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(CrawlTask::try_from).collect()
    }

    async fn update_status(&self, id: i64, status: TaskStatus) -> Result<(), AppError> {
        sqlx::query(r#"UPDATE crawl_tasks SET status = $2, updated_at = NOW() WHERE id = $1"#)
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn increment_retries(&self, id: i64) -> Result<(), AppError> {
        sqlx::query(
            r#"UPDATE crawl_tasks SET retries = retries + 1, updated_at = NOW() WHERE id = $1"#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn append_log(&self, log: &NewCrawlLog) -> Result<i64, AppError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO crawl_logs (task_id, source, task_type, target, status, message, trace_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(log.task_id)
        .bind(&log.source)
        .bind(&log.task_type)
        .bind(&log.target)
        .bind(log.status.as_str())
        .bind(&log.message)
        .bind(&log.trace_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(id)
    }

    async fn link_log_entity(&self, log_id: i64, entity_id: i64) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO crawl_log_entities (log_id, entity_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(log_id)
        .bind(entity_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn create_task(&self, task: &NewTask) -> Result<i64, AppError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO crawl_tasks
                (source, task_type, target_kind, target_value, priority, depth, batch_id, candidate_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(&task.source)
        .bind(&task.task_type)
        .bind(task.target.kind())
        .bind(task.target.value())
        .bind(task.priority)
        .bind(task.depth as i32)
        .bind(&task.batch_id)
        .bind(task.candidate_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tracing::debug!(id, source = %task.source, task_type = %task.task_type, "Task created");
        Ok(id)
    }

    async fn count_by_status(&self, source: &str, status: TaskStatus) -> Result<u64, AppError> {
        let (count,): (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM crawl_tasks WHERE source = $1 AND status = $2"#)
                .bind(source)
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(count.max(0) as u64)
    }
}
