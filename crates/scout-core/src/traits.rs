use std::future::Future;

use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::models::{NewRawText, OpenReviewProfile, PageResponse, RenderedPage, UpsertOutcome};
use crate::task::{CrawlTask, NewCrawlLog, NewTask, PendingQuery, TaskStatus};

/// Issues a plain HTTP GET. Non-2xx statuses come back as a response, not
/// an error; only transport failures are errors.
pub trait PageFetcher: Send + Sync + Clone {
    fn get(&self, url: &str) -> impl Future<Output = Result<PageResponse, AppError>> + Send;
}

/// Turns raw HTML into readable text with boilerplate removed.
pub trait TextExtractor: Send + Sync + Clone {
    fn extract(&self, html: &str) -> Result<String, AppError>;
}

/// Renders a page in a headless browser.
pub trait Renderer: Send + Sync + Clone {
    fn render(&self, url: &str) -> impl Future<Output = Result<RenderedPage, AppError>> + Send;
}

/// Renderer for deployments without a browser engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRenderer;

impl Renderer for NoRenderer {
    async fn render(&self, _url: &str) -> Result<RenderedPage, AppError> {
        Err(AppError::BrowserUnavailable(
            "no browser engine configured".into(),
        ))
    }
}

/// Task persistence collaborator used by the runner.
pub trait TaskStore: Send + Sync + Clone {
    /// Pending tasks ordered by priority desc, then creation time asc.
    fn fetch_pending(
        &self,
        query: &PendingQuery,
    ) -> impl Future<Output = Result<Vec<CrawlTask>, AppError>> + Send;

    fn update_status(
        &self,
        id: i64,
        status: TaskStatus,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn increment_retries(&self, id: i64) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Append one crawl-log row. Returns the log id.
    fn append_log(&self, log: &NewCrawlLog)
    -> impl Future<Output = Result<i64, AppError>> + Send;

    /// Associate a log row with the entity the task belongs to.
    fn link_log_entity(
        &self,
        log_id: i64,
        entity_id: i64,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn create_task(&self, task: &NewTask) -> impl Future<Output = Result<i64, AppError>> + Send;

    fn count_by_status(
        &self,
        source: &str,
        status: TaskStatus,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;
}

/// Idempotent storage of discovered GitHub logins and their profiles.
pub trait LoginStore: Send + Sync + Clone {
    /// Insert the login if absent; report whether it was new.
    fn upsert_login(
        &self,
        login: &str,
    ) -> impl Future<Output = Result<UpsertOutcome, AppError>> + Send;

    /// Store the fetched profile document for a login (upserting it).
    fn save_profile(
        &self,
        login: &str,
        profile: &serde_json::Value,
    ) -> impl Future<Output = Result<i64, AppError>> + Send;
}

/// Persists raw page text.
pub trait ContentStore: Send + Sync + Clone {
    fn exists(
        &self,
        url: &str,
        candidate_id: Option<i64>,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    fn save(&self, text: &NewRawText) -> impl Future<Output = Result<i64, AppError>> + Send;
}

/// OpenReview profiles keyed by profile id.
pub trait OpenReviewStore: Send + Sync + Clone {
    /// When the profile was last saved, if ever.
    fn last_crawled(
        &self,
        profile_id: &str,
    ) -> impl Future<Output = Result<Option<DateTime<Utc>>, AppError>> + Send;

    /// Upsert the profile and stamp its crawl time. Returns the row id.
    fn save_profile(
        &self,
        profile: &OpenReviewProfile,
        candidate_id: Option<i64>,
    ) -> impl Future<Output = Result<i64, AppError>> + Send;
}

/// JSON profile API of the code host.
pub trait ProfileApi: Send + Sync + Clone {
    fn user(
        &self,
        login: &str,
    ) -> impl Future<Output = Result<serde_json::Value, AppError>> + Send;

    fn repos(
        &self,
        login: &str,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<serde_json::Value>, AppError>> + Send;
}
