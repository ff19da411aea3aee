//! Test utilities: in-memory implementations of the core traits.
//!
//! All mocks share state through `Arc<Mutex<_>>`, so a clone handed to the
//! code under test and the copy kept by the test observe the same calls.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::AppError;
use crate::models::{NewRawText, OpenReviewProfile, PageResponse, RenderedPage, UpsertOutcome};
use crate::runner::{RunnerEvent, RunnerReporter};
use crate::task::{CrawlTask, NewCrawlLog, NewTask, PendingQuery, TaskStatus};
use crate::traits::{
    ContentStore, LoginStore, OpenReviewStore, PageFetcher, ProfileApi, Renderer, TaskStore,
    TextExtractor,
};

// ---------------------------------------------------------------------------
// MockTaskStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct TaskStoreState {
    tasks: Vec<CrawlTask>,
    logs: Vec<NewCrawlLog>,
    links: Vec<(i64, i64)>,
    failures: HashMap<&'static str, AppError>,
}

impl TaskStoreState {
    fn injected(&mut self, operation: &'static str) -> Result<(), AppError> {
        match self.failures.remove(operation) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// In-memory task queue with the same ordering rules as the database.
#[derive(Clone, Default)]
pub struct MockTaskStore {
    state: Arc<Mutex<TaskStoreState>>,
}

impl MockTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a task synchronously. Later tasks get later timestamps.
    pub fn add(&self, task: NewTask) -> i64 {
        let mut state = self.state.lock().unwrap();
        let id = state.tasks.len() as i64 + 1;
        state.tasks.push(CrawlTask {
            id,
            source: task.source,
            task_type: task.task_type,
            target: task.target,
            status: TaskStatus::Pending,
            priority: task.priority,
            retries: 0,
            batch_id: task.batch_id,
            depth: task.depth,
            candidate_id: task.candidate_id,
            created_at: Utc::now() + TimeDelta::milliseconds(id),
        });
        id
    }

    pub fn task(&self, id: i64) -> Option<CrawlTask> {
        let state = self.state.lock().unwrap();
        state.tasks.iter().find(|t| t.id == id).cloned()
    }

    pub fn tasks(&self) -> Vec<CrawlTask> {
        self.state.lock().unwrap().tasks.clone()
    }

    pub fn logs(&self) -> Vec<NewCrawlLog> {
        self.state.lock().unwrap().logs.clone()
    }

    /// Recorded (log_id, entity_id) pairs.
    pub fn links(&self) -> Vec<(i64, i64)> {
        self.state.lock().unwrap().links.clone()
    }

    /// Makes the next call of `operation` (`update_status`,
    /// `increment_retries`, `append_log` or `link_log_entity`) fail with
    /// `error`.
    pub fn fail_next(&self, operation: &'static str, error: AppError) {
        self.state.lock().unwrap().failures.insert(operation, error);
    }

    pub fn pending_count(&self, source: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .tasks
            .iter()
            .filter(|t| t.source == source && t.status == TaskStatus::Pending)
            .count()
    }
}

impl TaskStore for MockTaskStore {
    async fn fetch_pending(&self, query: &PendingQuery) -> Result<Vec<CrawlTask>, AppError> {
        let state = self.state.lock().unwrap();
        let mut pending: Vec<CrawlTask> = state
            .tasks
            .iter()
            .filter(|t| t.source == query.source && t.status == TaskStatus::Pending)
            .filter(|t| {
                query
                    .task_types
                    .as_ref()
                    .is_none_or(|types| types.contains(&t.task_type))
            })
            .filter(|t| !query.exclude_ids.contains(&t.id))
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        pending.truncate(query.limit);
        Ok(pending)
    }

    async fn update_status(&self, id: i64, status: TaskStatus) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        state.injected("update_status")?;
        match state.tasks.iter_mut().find(|t| t.id == id) {
            Some(task) => {
                task.status = status;
                Ok(())
            }
            None => Err(AppError::NotFound(format!("task {id}"))),
        }
    }

    async fn increment_retries(&self, id: i64) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        state.injected("increment_retries")?;
        if let Some(task) = state.tasks.iter_mut().find(|t| t.id == id) {
            task.retries += 1;
        }
        Ok(())
    }

    async fn append_log(&self, log: &NewCrawlLog) -> Result<i64, AppError> {
        let mut state = self.state.lock().unwrap();
        state.injected("append_log")?;
        state.logs.push(log.clone());
        Ok(state.logs.len() as i64)
    }

    async fn link_log_entity(&self, log_id: i64, entity_id: i64) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        state.injected("link_log_entity")?;
        state.links.push((log_id, entity_id));
        Ok(())
    }

    async fn create_task(&self, task: &NewTask) -> Result<i64, AppError> {
        Ok(self.add(task.clone()))
    }

    async fn count_by_status(&self, source: &str, status: TaskStatus) -> Result<u64, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .tasks
            .iter()
            .filter(|t| t.source == source && t.status == status)
            .count() as u64)
    }
}

// ---------------------------------------------------------------------------
// MockLoginStore
// ---------------------------------------------------------------------------

/// Insert-if-absent login registry.
#[derive(Clone, Default)]
pub struct MockLoginStore {
    logins: Arc<Mutex<HashMap<String, i64>>>,
    pub profiles: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
}

impl MockLoginStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, login: &str) -> bool {
        self.logins.lock().unwrap().contains_key(login)
    }

    pub fn len(&self) -> usize {
        self.logins.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LoginStore for MockLoginStore {
    async fn upsert_login(&self, login: &str) -> Result<UpsertOutcome, AppError> {
        let mut logins = self.logins.lock().unwrap();
        if let Some(id) = logins.get(login) {
            return Ok(UpsertOutcome {
                id: *id,
                inserted: false,
            });
        }
        let id = logins.len() as i64 + 1;
        logins.insert(login.to_string(), id);
        Ok(UpsertOutcome { id, inserted: true })
    }

    async fn save_profile(
        &self,
        login: &str,
        profile: &serde_json::Value,
    ) -> Result<i64, AppError> {
        let outcome = self.upsert_login(login).await?;
        self.profiles
            .lock()
            .unwrap()
            .push((login.to_string(), profile.clone()));
        Ok(outcome.id)
    }
}

// ---------------------------------------------------------------------------
// MockOpenReviewStore
// ---------------------------------------------------------------------------

/// OpenReview profiles by id, with their crawl time.
#[derive(Clone, Default)]
pub struct MockOpenReviewStore {
    profiles: Arc<Mutex<Vec<(OpenReviewProfile, Option<i64>, DateTime<Utc>)>>>,
}

impl MockOpenReviewStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that saw `profile_id` at `crawled_at`.
    pub fn with_crawled(profile_id: &str, crawled_at: DateTime<Utc>) -> Self {
        let store = Self::default();
        let profile = OpenReviewProfile {
            profile_id: profile_id.to_string(),
            ..Default::default()
        };
        store.profiles.lock().unwrap().push((profile, None, crawled_at));
        store
    }

    pub fn saved(&self) -> Vec<(OpenReviewProfile, Option<i64>)> {
        self.profiles
            .lock()
            .unwrap()
            .iter()
            .map(|(profile, candidate, _)| (profile.clone(), *candidate))
            .collect()
    }
}

impl OpenReviewStore for MockOpenReviewStore {
    async fn last_crawled(&self, profile_id: &str) -> Result<Option<DateTime<Utc>>, AppError> {
        let profiles = self.profiles.lock().unwrap();
        Ok(profiles
            .iter()
            .filter(|(p, _, _)| p.profile_id == profile_id)
            .map(|(_, _, at)| *at)
            .max())
    }

    async fn save_profile(
        &self,
        profile: &OpenReviewProfile,
        candidate_id: Option<i64>,
    ) -> Result<i64, AppError> {
        let mut profiles = self.profiles.lock().unwrap();
        profiles.retain(|(p, _, _)| p.profile_id != profile.profile_id);
        profiles.push((profile.clone(), candidate_id, Utc::now()));
        Ok(profiles.len() as i64)
    }
}

// ---------------------------------------------------------------------------
// MockContentStore
// ---------------------------------------------------------------------------

/// Records saved texts; `exists` matches on URL and candidate.
#[derive(Clone, Default)]
pub struct MockContentStore {
    pub saved: Arc<Mutex<Vec<NewRawText>>>,
}

impl MockContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that already holds text for `url` and `candidate_id`.
    pub fn with_existing(url: &str, candidate_id: Option<i64>) -> Self {
        let store = Self::default();
        store.saved.lock().unwrap().push(NewRawText {
            candidate_id,
            url: url.to_string(),
            text: "existing".into(),
            content_hash: crate::models::compute_hash("existing"),
            source_tag: "homepage".into(),
        });
        store
    }
}

impl ContentStore for MockContentStore {
    async fn exists(&self, url: &str, candidate_id: Option<i64>) -> Result<bool, AppError> {
        let saved = self.saved.lock().unwrap();
        Ok(saved
            .iter()
            .any(|t| t.url == url && t.candidate_id == candidate_id))
    }

    async fn save(&self, text: &NewRawText) -> Result<i64, AppError> {
        let mut saved = self.saved.lock().unwrap();
        saved.push(text.clone());
        Ok(saved.len() as i64)
    }
}

// ---------------------------------------------------------------------------
// MockPageFetcher
// ---------------------------------------------------------------------------

/// Per-URL response queues. A URL with nothing queued answers 404.
#[derive(Clone, Default)]
pub struct MockPageFetcher {
    responses: Arc<Mutex<HashMap<String, VecDeque<Result<PageResponse, AppError>>>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockPageFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, response: PageResponse) -> Self {
        self.push(url, Ok(response));
        self
    }

    pub fn with_error(self, url: &str, error: AppError) -> Self {
        self.push(url, Err(error));
        self
    }

    /// Queue an HTML body with the given status.
    pub fn with_html(self, url: &str, status: u16, body: &str) -> Self {
        self.push(
            url,
            Ok(PageResponse {
                status,
                body: body.to_string(),
                final_url: url.to_string(),
            }),
        );
        self
    }

    pub fn push(&self, url: &str, response: Result<PageResponse, AppError>) {
        self.responses
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl PageFetcher for MockPageFetcher {
    async fn get(&self, url: &str) -> Result<PageResponse, AppError> {
        self.calls.lock().unwrap().push(url.to_string());
        let next = self
            .responses
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|queue| queue.pop_front());
        next.unwrap_or_else(|| {
            Ok(PageResponse {
                status: 404,
                body: String::new(),
                final_url: url.to_string(),
            })
        })
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// Extractor that returns its input, or a fixed error.
#[derive(Clone)]
pub struct MockExtractor {
    error: Arc<Mutex<Option<AppError>>>,
}

impl MockExtractor {
    pub fn passthrough() -> Self {
        Self {
            error: Arc::new(Mutex::new(None)),
        }
    }

    /// Fails once, then passes through.
    pub fn with_error(error: AppError) -> Self {
        Self {
            error: Arc::new(Mutex::new(Some(error))),
        }
    }
}

impl TextExtractor for MockExtractor {
    fn extract(&self, html: &str) -> Result<String, AppError> {
        if let Some(e) = self.error.lock().unwrap().take() {
            return Err(e);
        }
        Ok(html.to_string())
    }
}

// ---------------------------------------------------------------------------
// MockRenderer
// ---------------------------------------------------------------------------

/// Renderer with a single canned response; later calls report the browser
/// as unavailable.
#[derive(Clone)]
pub struct MockRenderer {
    response: Arc<Mutex<Option<Result<RenderedPage, AppError>>>>,
    calls: Arc<AtomicUsize>,
}

impl MockRenderer {
    pub fn new(response: Result<RenderedPage, AppError>) -> Self {
        Self {
            response: Arc::new(Mutex::new(Some(response))),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Renderer for MockRenderer {
    async fn render(&self, _url: &str) -> Result<RenderedPage, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Err(AppError::BrowserUnavailable("already used".into())))
    }
}

// ---------------------------------------------------------------------------
// MockProfileApi
// ---------------------------------------------------------------------------

/// Profile API backed by maps; unknown logins are `NotFound`.
#[derive(Clone, Default)]
pub struct MockProfileApi {
    users: Arc<Mutex<HashMap<String, serde_json::Value>>>,
    repos: Arc<Mutex<HashMap<String, Vec<serde_json::Value>>>>,
    errors: Arc<Mutex<HashMap<String, AppError>>>,
}

impl MockProfileApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(self, login: &str, profile: serde_json::Value) -> Self {
        self.users
            .lock()
            .unwrap()
            .insert(login.to_string(), profile);
        self
    }

    pub fn with_repos(self, login: &str, repos: Vec<serde_json::Value>) -> Self {
        self.repos.lock().unwrap().insert(login.to_string(), repos);
        self
    }

    /// The next `user(login)` call fails with `error`.
    pub fn with_error(self, login: &str, error: AppError) -> Self {
        self.errors.lock().unwrap().insert(login.to_string(), error);
        self
    }
}

impl ProfileApi for MockProfileApi {
    async fn user(&self, login: &str) -> Result<serde_json::Value, AppError> {
        if let Some(e) = self.errors.lock().unwrap().remove(login) {
            return Err(e);
        }
        self.users
            .lock()
            .unwrap()
            .get(login)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("/users/{login}")))
    }

    async fn repos(&self, login: &str, limit: usize) -> Result<Vec<serde_json::Value>, AppError> {
        let repos = self.repos.lock().unwrap();
        Ok(repos
            .get(login)
            .map(|r| r.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Counts runner events.
#[derive(Clone, Default)]
pub struct MockReporter {
    started: Arc<AtomicUsize>,
    finished: Arc<AtomicUsize>,
    rounds: Arc<AtomicUsize>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started_count(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn finished_count(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn rounds_finished(&self) -> usize {
        self.rounds.load(Ordering::SeqCst)
    }
}

impl RunnerReporter for MockReporter {
    fn report(&self, event: RunnerEvent<'_>) {
        match event {
            RunnerEvent::TaskStarted { .. } => {
                self.started.fetch_add(1, Ordering::SeqCst);
            }
            RunnerEvent::TaskFinished { .. } => {
                self.finished.fetch_add(1, Ordering::SeqCst);
            }
            RunnerEvent::RoundFinished { .. } => {
                self.rounds.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
    }
}
