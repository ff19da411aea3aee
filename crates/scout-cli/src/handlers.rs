//! Per-source task handlers that glue the runner to the clients and stores.

use std::collections::HashSet;

use chrono::{TimeDelta, Utc};
use scout_client::discovery::{DiscoveryParams, FollowDiscovery};
use scout_client::openreview::{OpenReviewClient, github_login_from_url, profile_id_from_url};
use scout_core::content::ContentFetcher;
use scout_core::error::AppError;
use scout_core::models::{DiscoveryResult, NewRawText, compute_hash};
use scout_core::runner::TaskHandler;
use scout_core::task::{CrawlTask, NewTask, TaskOutcome, TaskTarget};
use scout_core::traits::{
    ContentStore, LoginStore, OpenReviewStore, PageFetcher, ProfileApi, Renderer, TaskStore,
    TextExtractor,
};
use serde_json::{Value, json};

pub const GITHUB_SOURCE: &str = "github";
pub const HOMEPAGE_SOURCE: &str = "homepage";
pub const OPENREVIEW_SOURCE: &str = "openreview";

/// Stored texts are cut to this many characters.
pub const MAX_TEXT_CHARS: usize = 200_000;
const TRUNCATION_MARKER: &str = "\n\n[truncated]";

/// Repositories listed per profile before selection.
const REPO_FETCH_LIMIT: usize = 100;

/// Most recently pushed `n` plus most-starred `n`, de-duplicated by full
/// name, recent ones first.
pub fn select_repositories(repos: &[Value], n: usize) -> Vec<Value> {
    let mut recent: Vec<&Value> = repos.iter().collect();
    recent.sort_by(|a, b| {
        let pushed = |r: &Value| r["pushed_at"].as_str().unwrap_or_default().to_string();
        pushed(b).cmp(&pushed(a))
    });

    let mut starred: Vec<&Value> = repos.iter().collect();
    starred.sort_by_key(|r| std::cmp::Reverse(r["stargazers_count"].as_u64().unwrap_or(0)));

    let mut seen = HashSet::new();
    recent
        .into_iter()
        .take(n)
        .chain(starred.into_iter().take(n))
        .filter(|r| {
            let name = r["full_name"].as_str().unwrap_or_default().to_string();
            seen.insert(name)
        })
        .cloned()
        .collect()
}

/// `https://` is assumed when the profile omits a scheme.
fn homepage_url(blog: &str) -> Option<String> {
    let blog = blog.trim();
    if blog.is_empty() {
        return None;
    }
    let candidate = if blog.contains("://") {
        blog.to_string()
    } else {
        format!("https://{blog}")
    };
    match url::Url::parse(&candidate) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Some(url.to_string()),
        _ => None,
    }
}

/// Upserts every discovered login. Returns `(inserted, duplicate)`.
pub async fn persist_logins<L: LoginStore>(
    store: &L,
    result: &DiscoveryResult,
) -> Result<(usize, usize), AppError> {
    let mut inserted = 0;
    let mut duplicate = 0;
    for login in result.all_logins() {
        if store.upsert_login(&login).await?.inserted {
            inserted += 1;
        } else {
            duplicate += 1;
        }
    }
    Ok((inserted, duplicate))
}

pub fn discovery_summary(result: &DiscoveryResult, inserted: usize, duplicate: usize) -> String {
    format!(
        "d1_followers={}; d1_following={}; d2_total={}; inserted={inserted}; dup={duplicate}",
        result.d1_followers.len(),
        result.d1_following.len(),
        result.d2.len(),
    )
}

fn expect_login(task: &CrawlTask) -> Result<&str, TaskOutcome> {
    match &task.target {
        TaskTarget::Login(login) => Ok(login),
        other => Err(TaskOutcome::fail(
            format!("expected a login target, got {}", other.kind()),
            None,
        )),
    }
}

/// Handles `github` tasks: `profile` and `follow_scan`.
pub struct GithubHandler<A, L, T, F> {
    api: A,
    logins: L,
    tasks: T,
    discovery: FollowDiscovery<F>,
    params: DiscoveryParams,
    repos_per_kind: usize,
}

impl<A, L, T, F> GithubHandler<A, L, T, F>
where
    A: ProfileApi,
    L: LoginStore,
    T: TaskStore,
    F: PageFetcher,
{
    pub fn new(
        api: A,
        logins: L,
        tasks: T,
        discovery: FollowDiscovery<F>,
        params: DiscoveryParams,
    ) -> Self {
        Self {
            api,
            logins,
            tasks,
            discovery,
            params,
            repos_per_kind: 5,
        }
    }

    async fn profile(&self, task: &CrawlTask, login: &str) -> Result<TaskOutcome, AppError> {
        let user = match self.api.user(login).await {
            Ok(user) => user,
            Err(AppError::NotFound(_)) => {
                return Ok(TaskOutcome::skip(format!("user {login} not found")));
            }
            Err(e) => return Err(e),
        };

        let repos = self.api.repos(login, REPO_FETCH_LIMIT).await?;
        let selected = select_repositories(&repos, self.repos_per_kind);
        let document = json!({ "user": user, "repos": selected });
        let entity_id = self.logins.save_profile(login, &document).await?;

        let mut message = format!("repos={}/{}", selected.len(), repos.len());
        if let Some(url) = user["blog"].as_str().and_then(homepage_url) {
            let mut next = NewTask::new(HOMEPAGE_SOURCE, "fetch", TaskTarget::Url(url))
                .with_depth(task.depth + 1)
                .with_candidate_id(entity_id);
            if let Some(batch) = &task.batch_id {
                next = next.with_batch_id(batch.clone());
            }
            let id = self.tasks.create_task(&next).await?;
            tracing::debug!(%login, homepage_task = id, "Homepage task enqueued");
            message.push_str("; homepage_enqueued=true");
        }

        Ok(TaskOutcome::success(message))
    }

    async fn follow_scan(&self, login: &str) -> Result<TaskOutcome, AppError> {
        let result = self.discovery.discover_logins(login, &self.params).await;
        if !result.seed_processed {
            return Ok(TaskOutcome::skip(format!("discovery skipped for {login}")));
        }
        let (inserted, duplicate) = persist_logins(&self.logins, &result).await?;
        let summary = discovery_summary(&result, inserted, duplicate);
        tracing::info!(%login, %summary, "Follow scan finished");
        Ok(TaskOutcome::success(summary))
    }
}

impl<A, L, T, F> TaskHandler for GithubHandler<A, L, T, F>
where
    A: ProfileApi,
    L: LoginStore,
    T: TaskStore,
    F: PageFetcher,
{
    async fn handle(&self, task: &CrawlTask) -> Result<TaskOutcome, AppError> {
        let login = match expect_login(task) {
            Ok(login) => login,
            Err(outcome) => return Ok(outcome),
        };
        match task.task_type.as_str() {
            "profile" => self.profile(task, login).await,
            "follow_scan" => self.follow_scan(login).await,
            other => Ok(TaskOutcome::skip(format!("unsupported task type {other}"))),
        }
    }
}

/// Cuts `text` to [`MAX_TEXT_CHARS`] characters, appending a marker.
pub fn truncate_text(text: &str) -> String {
    match text.char_indices().nth(MAX_TEXT_CHARS) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &text[..cut]),
        None => text.to_string(),
    }
}

/// Handles `homepage` tasks: fetches the URL and stores its text once per
/// candidate.
pub struct HomepageHandler<P, X, R, C>
where
    P: PageFetcher,
    X: TextExtractor,
    R: Renderer,
{
    fetcher: ContentFetcher<P, X, R>,
    store: C,
}

impl<P, X, R, C> HomepageHandler<P, X, R, C>
where
    P: PageFetcher,
    X: TextExtractor,
    R: Renderer,
    C: ContentStore,
{
    pub fn new(fetcher: ContentFetcher<P, X, R>, store: C) -> Self {
        Self { fetcher, store }
    }
}

impl<P, X, R, C> TaskHandler for HomepageHandler<P, X, R, C>
where
    P: PageFetcher,
    X: TextExtractor,
    R: Renderer,
    C: ContentStore,
{
    async fn handle(&self, task: &CrawlTask) -> Result<TaskOutcome, AppError> {
        let TaskTarget::Url(url) = &task.target else {
            return Ok(TaskOutcome::fail(
                format!("expected a url target, got {}", task.target.kind()),
                None,
            ));
        };

        if self.store.exists(url, task.candidate_id).await? {
            return Ok(TaskOutcome::skip(format!("{url} already stored")));
        }

        let result = self.fetcher.fetch(url).await;
        if !result.success {
            return Ok(match result.error {
                Some(error) => TaskOutcome::fail(format!("fetch of {url} failed"), Some(error)),
                None => {
                    let mut message = format!("no content at {url}");
                    if let Some(reason) = &result.fallback_reason {
                        message.push_str(&format!("; fallback_reason={reason}"));
                    }
                    TaskOutcome::skip(message)
                }
            });
        }

        let text = truncate_text(&result.text);
        let source_tag = if result.used_fallback {
            "homepage_rendered"
        } else {
            "homepage"
        };
        let id = self
            .store
            .save(&NewRawText {
                candidate_id: task.candidate_id,
                url: url.clone(),
                content_hash: compute_hash(&text),
                text,
                source_tag: source_tag.to_string(),
            })
            .await?;

        let mut message = format!(
            "raw_text={id}; chars={}; tag={source_tag}",
            result.text.chars().count()
        );
        if let Some(reason) = &result.fallback_reason {
            message.push_str(&format!("; fallback_reason={reason}"));
        }
        Ok(TaskOutcome::success(message))
    }
}

/// Handles `openreview` tasks.
///
/// A `forum` task fans out into one `profile` task per linked author. A
/// `profile` task stores the researcher and enqueues their GitHub account
/// and homepage when the profile links them. Profiles crawled within
/// `recrawl_after` are skipped.
pub struct OpenReviewHandler<P, T, S> {
    client: OpenReviewClient<P>,
    tasks: T,
    store: S,
    recrawl_after: TimeDelta,
}

impl<P, T, S> OpenReviewHandler<P, T, S>
where
    P: PageFetcher,
    T: TaskStore,
    S: OpenReviewStore,
{
    pub fn new(client: OpenReviewClient<P>, tasks: T, store: S) -> Self {
        Self {
            client,
            tasks,
            store,
            recrawl_after: TimeDelta::days(7),
        }
    }

    pub fn with_recrawl_after(mut self, recrawl_after: TimeDelta) -> Self {
        self.recrawl_after = recrawl_after;
        self
    }

    async fn forum(&self, task: &CrawlTask, url: &str) -> Result<TaskOutcome, AppError> {
        let Some(forum) = self.client.forum(url).await? else {
            return Ok(TaskOutcome::fail(format!("forum {url} not found"), None));
        };
        if forum.title.is_empty() {
            return Ok(TaskOutcome::fail(format!("no title at {url}"), None));
        }
        if forum.authors.is_empty() {
            return Ok(TaskOutcome::skip(format!("no authors at {url}")));
        }

        let mut seen = HashSet::new();
        for profile_id in forum
            .authors
            .iter()
            .filter_map(|author| author.profile_url.as_deref().and_then(profile_id_from_url))
        {
            if !seen.insert(profile_id.clone()) {
                continue;
            }
            let next = follow_up(
                task,
                NewTask::new(OPENREVIEW_SOURCE, "profile", TaskTarget::ProfileId(profile_id)),
            )
            .with_priority(2);
            self.tasks.create_task(&next).await?;
        }

        tracing::info!(%url, title = %forum.title, profiles = seen.len(), "Forum parsed");
        Ok(TaskOutcome::success(format!(
            "title={}; authors={}; profile_tasks={}",
            forum.title,
            forum.authors.len(),
            seen.len()
        )))
    }

    async fn profile(&self, task: &CrawlTask, profile_id: &str) -> Result<TaskOutcome, AppError> {
        if let Some(crawled_at) = self.store.last_crawled(profile_id).await?
            && Utc::now() - crawled_at < self.recrawl_after
        {
            return Ok(TaskOutcome::skip(format!(
                "profile {profile_id} crawled at {crawled_at}"
            )));
        }

        let Some(profile) = self.client.profile(profile_id).await? else {
            return Ok(TaskOutcome::fail(format!("profile {profile_id} not found"), None));
        };
        let record = self.store.save_profile(&profile, task.candidate_id).await?;

        let mut derived = Vec::new();
        if let Some(login) = profile.github.as_deref().and_then(github_login_from_url) {
            derived.push(
                follow_up(task, NewTask::new(GITHUB_SOURCE, "profile", TaskTarget::Login(login)))
                    .with_priority(2),
            );
        }
        if let Some(url) = profile.homepage.as_deref().and_then(homepage_url) {
            derived.push(
                follow_up(task, NewTask::new(HOMEPAGE_SOURCE, "fetch", TaskTarget::Url(url)))
                    .with_priority(3),
            );
        }
        for next in &derived {
            self.tasks.create_task(next).await?;
        }

        Ok(TaskOutcome::success(format!(
            "profile={profile_id}; record={record}; derived_tasks={}",
            derived.len()
        )))
    }
}

/// `next` one level deeper than `task`, in the same batch and for the same
/// candidate.
fn follow_up(task: &CrawlTask, next: NewTask) -> NewTask {
    let mut next = next.with_depth(task.depth + 1);
    if let Some(batch) = &task.batch_id {
        next = next.with_batch_id(batch.clone());
    }
    if let Some(candidate_id) = task.candidate_id {
        next = next.with_candidate_id(candidate_id);
    }
    next
}

impl<P, T, S> TaskHandler for OpenReviewHandler<P, T, S>
where
    P: PageFetcher,
    T: TaskStore,
    S: OpenReviewStore,
{
    async fn handle(&self, task: &CrawlTask) -> Result<TaskOutcome, AppError> {
        match (task.task_type.as_str(), &task.target) {
            ("forum", TaskTarget::Url(url)) => self.forum(task, url).await,
            ("profile", TaskTarget::ProfileId(id)) => self.profile(task, id).await,
            ("profile", TaskTarget::Url(url)) => match profile_id_from_url(url) {
                Some(id) => self.profile(task, &id).await,
                None => Ok(TaskOutcome::fail(format!("no profile id in {url}"), None)),
            },
            ("forum" | "profile", other) => Ok(TaskOutcome::fail(
                format!("unexpected {} target for {}", other.kind(), task.task_type),
                None,
            )),
            (other, _) => Ok(TaskOutcome::skip(format!("unsupported task type {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_core::content::FetchSettings;
    use scout_core::models::RenderedPage;
    use scout_core::progress::ProgressTracker;
    use scout_core::runner::{RunnerConfig, TaskRunner};
    use scout_core::task::{LogStatus, TaskStatus};
    use scout_core::testutil::{
        MockContentStore, MockExtractor, MockLoginStore, MockOpenReviewStore, MockPageFetcher,
        MockProfileApi, MockRenderer, MockTaskStore,
    };
    use std::time::Duration;

    const BASE: &str = "https://github.test";

    fn follow_html(logins: &[String]) -> String {
        let rows: String = logins
            .iter()
            .map(|l| format!(r#"<a data-hovercard-type="user" href="/{l}">{l}</a>"#))
            .collect();
        format!("<html><body>{rows}</body></html>")
    }

    fn tab_url(login: &str, tab: &str) -> String {
        format!("{BASE}/{login}?tab={tab}")
    }

    fn quick_params(depth: u8, per_side: usize, d2_cap: usize) -> DiscoveryParams {
        DiscoveryParams {
            depth,
            per_side,
            d2_cap,
            sleep_range: (Duration::ZERO, Duration::ZERO),
        }
    }

    type TestHandler = GithubHandler<MockProfileApi, MockLoginStore, MockTaskStore, MockPageFetcher>;

    fn github_handler_with(
        api: MockProfileApi,
        logins: MockLoginStore,
        tasks: MockTaskStore,
        pages: MockPageFetcher,
        params: DiscoveryParams,
    ) -> TestHandler {
        let discovery = FollowDiscovery::new(pages)
            .with_base_url(BASE)
            .with_backoff(Duration::ZERO, Duration::ZERO);
        GithubHandler::new(api, logins, tasks, discovery, params)
    }

    fn github_handler(
        api: MockProfileApi,
        logins: MockLoginStore,
        tasks: MockTaskStore,
        pages: MockPageFetcher,
    ) -> TestHandler {
        github_handler_with(api, logins, tasks, pages, quick_params(1, 10, 200))
    }

    fn runner(store: MockTaskStore) -> TaskRunner<MockTaskStore> {
        TaskRunner::new(
            store,
            ProgressTracker::new(),
            RunnerConfig {
                task_delay: Duration::ZERO,
                ..Default::default()
            },
        )
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    #[test]
    fn test_select_repositories() {
        let repos = vec![
            json!({"full_name": "a/old-popular", "pushed_at": "2019-01-01T00:00:00Z", "stargazers_count": 900}),
            json!({"full_name": "a/new", "pushed_at": "2024-05-01T00:00:00Z", "stargazers_count": 1}),
            json!({"full_name": "a/mid", "pushed_at": "2023-01-01T00:00:00Z", "stargazers_count": 50}),
            json!({"full_name": "a/stale", "pushed_at": "2015-01-01T00:00:00Z", "stargazers_count": 0}),
        ];

        let selected = select_repositories(&repos, 2);
        let names: Vec<&str> = selected
            .iter()
            .map(|r| r["full_name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a/new", "a/mid", "a/old-popular"]);
    }

    #[test]
    fn test_homepage_url() {
        assert_eq!(
            homepage_url("ada.example.edu").as_deref(),
            Some("https://ada.example.edu/")
        );
        assert_eq!(
            homepage_url(" http://x.test/~ada ").as_deref(),
            Some("http://x.test/~ada")
        );
        assert_eq!(homepage_url(""), None);
        assert_eq!(homepage_url("ftp://x.test"), None);
    }

    #[test]
    fn test_truncate_text() {
        let short = "abc";
        assert_eq!(truncate_text(short), "abc");

        let long = "é".repeat(MAX_TEXT_CHARS + 5);
        let cut = truncate_text(&long);
        assert!(cut.ends_with(TRUNCATION_MARKER));
        assert_eq!(
            cut.chars().count(),
            MAX_TEXT_CHARS + TRUNCATION_MARKER.chars().count()
        );
    }

    // -----------------------------------------------------------------------
    // GitHub profile tasks
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn profile_saves_document_and_enqueues_homepage() {
        let api = MockProfileApi::new()
            .with_user("ada", json!({"login": "ada", "blog": "ada.example.edu"}))
            .with_repos(
                "ada",
                vec![json!({"full_name": "ada/engine", "pushed_at": "2024-01-01T00:00:00Z", "stargazers_count": 3})],
            );
        let logins = MockLoginStore::new();
        let tasks = MockTaskStore::new();
        let task_id = tasks.add(
            NewTask::new(GITHUB_SOURCE, "profile", TaskTarget::Login("ada".into()))
                .with_batch_id("b-7"),
        );

        let handler = github_handler(api, logins.clone(), tasks.clone(), MockPageFetcher::new());
        let task = tasks.task(task_id).unwrap();
        let outcome = handler.handle(&task).await.unwrap();

        assert_eq!(
            outcome,
            TaskOutcome::success("repos=1/1; homepage_enqueued=true")
        );
        let profiles = logins.profiles.lock().unwrap().clone();
        assert_eq!(profiles[0].1["repos"][0]["full_name"], "ada/engine");

        let homepage = tasks
            .tasks()
            .into_iter()
            .find(|t| t.source == HOMEPAGE_SOURCE)
            .unwrap();
        assert_eq!(homepage.target, TaskTarget::Url("https://ada.example.edu/".into()));
        assert_eq!(homepage.depth, 1);
        assert_eq!(homepage.batch_id.as_deref(), Some("b-7"));
        assert!(homepage.candidate_id.is_some());
    }

    #[tokio::test]
    async fn missing_user_is_skipped() {
        let tasks = MockTaskStore::new();
        let id = tasks.add(NewTask::new(GITHUB_SOURCE, "profile", TaskTarget::Login("ghost".into())));
        let handler = github_handler(
            MockProfileApi::new(),
            MockLoginStore::new(),
            tasks.clone(),
            MockPageFetcher::new(),
        );

        let outcome = handler.handle(&tasks.task(id).unwrap()).await.unwrap();
        assert_eq!(outcome, TaskOutcome::skip("user ghost not found"));
    }

    #[tokio::test]
    async fn exhausted_tokens_abort_the_round() {
        let tasks = MockTaskStore::new();
        let id = tasks.add(NewTask::new(GITHUB_SOURCE, "profile", TaskTarget::Login("ada".into())));
        let api = MockProfileApi::new().with_error(
            "ada",
            AppError::ExhaustedTokens {
                disabled: 2,
                total: 2,
            },
        );
        let handler = github_handler(api, MockLoginStore::new(), tasks.clone(), MockPageFetcher::new());

        let err = runner(tasks.clone())
            .run_until_empty(GITHUB_SOURCE, &handler, None)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::ExhaustedTokens { .. }));
        assert_eq!(tasks.task(id).unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn wrong_target_kind_fails() {
        let tasks = MockTaskStore::new();
        let id = tasks.add(NewTask::new(
            GITHUB_SOURCE,
            "profile",
            TaskTarget::Url("https://x.test".into()),
        ));
        let handler = github_handler(
            MockProfileApi::new(),
            MockLoginStore::new(),
            tasks.clone(),
            MockPageFetcher::new(),
        );

        let outcome = handler.handle(&tasks.task(id).unwrap()).await.unwrap();
        assert!(matches!(outcome, TaskOutcome::Fail { .. }));
    }

    // -----------------------------------------------------------------------
    // Follow scan
    // -----------------------------------------------------------------------

    /// Seed with 10 followers and 10 following; every depth-1 user has 30
    /// followers of their own, overlapping the seed's circle.
    fn octocat_graph() -> MockPageFetcher {
        let followers: Vec<String> = (0..10).map(|i| format!("fan{i}")).collect();
        let following: Vec<String> = (0..10).map(|i| format!("idol{i}")).collect();
        let pages = MockPageFetcher::new()
            .with_html(&tab_url("octocat", "followers"), 200, &follow_html(&followers))
            .with_html(&tab_url("octocat", "following"), 200, &follow_html(&following));

        for (n, d1) in followers.iter().chain(following.iter()).enumerate() {
            let mut theirs: Vec<String> = (0..28).map(|i| format!("u{n}x{i}")).collect();
            theirs.push("octocat".into());
            theirs.push("fan0".into());
            pages.push(
                &tab_url(d1, "followers"),
                Ok(scout_core::models::PageResponse {
                    status: 200,
                    body: follow_html(&theirs),
                    final_url: tab_url(d1, "followers"),
                }),
            );
        }
        pages
    }

    #[tokio::test]
    async fn octocat_follow_scan_end_to_end() {
        let tasks = MockTaskStore::new();
        tasks.add(NewTask::new(
            GITHUB_SOURCE,
            "follow_scan",
            TaskTarget::Login("octocat".into()),
        ));
        let logins = MockLoginStore::new();
        // Already known before the scan.
        logins.upsert_login("fan3").await.unwrap();

        let handler = github_handler_with(
            MockProfileApi::new(),
            logins.clone(),
            tasks.clone(),
            octocat_graph(),
            quick_params(2, 10, 200),
        );

        let outcome = runner(tasks.clone())
            .run_until_empty(GITHUB_SOURCE, &handler, None)
            .await
            .unwrap();
        assert_eq!(outcome.stats().unwrap().success_count, 1);

        let logs = tasks.logs();
        assert_eq!(logs.len(), 1);
        let log = &logs[0];
        assert_eq!(log.status, LogStatus::Success);

        let field = |name: &str| -> usize {
            log.message
                .split("; ")
                .find_map(|kv| kv.strip_prefix(&format!("{name}=")))
                .unwrap()
                .parse()
                .unwrap()
        };
        assert_eq!(field("d1_followers"), 10);
        assert_eq!(field("d1_following"), 10);
        let d2 = field("d2_total");
        assert!(d2 > 0 && d2 <= 200);
        assert_eq!(field("inserted") + field("dup"), 20 + d2);
        assert_eq!(field("dup"), 1);
        assert_eq!(logins.len(), 20 + d2);
        assert!(!logins.contains("octocat"));
    }

    #[tokio::test]
    async fn follow_scan_depth_one() {
        let pages = MockPageFetcher::new().with_html(
            &tab_url("octocat", "followers"),
            200,
            &follow_html(&["fan0".to_string(), "fan1".to_string()]),
        );
        let logins = MockLoginStore::new();
        let handler = github_handler(
            MockProfileApi::new(),
            logins.clone(),
            MockTaskStore::new(),
            pages.clone(),
        );

        let outcome = handler.follow_scan("octocat").await.unwrap();

        assert_eq!(
            outcome,
            TaskOutcome::success("d1_followers=2; d1_following=0; d2_total=0; inserted=2; dup=0")
        );
        assert!(pages.calls().iter().all(|u| u.contains("/octocat?")));
    }

    // -----------------------------------------------------------------------
    // Homepage tasks
    // -----------------------------------------------------------------------

    fn homepage_task(tasks: &MockTaskStore, url: &str) -> CrawlTask {
        let id = tasks.add(
            NewTask::new(HOMEPAGE_SOURCE, "fetch", TaskTarget::Url(url.into())).with_candidate_id(9),
        );
        tasks.task(id).unwrap()
    }

    fn settings() -> FetchSettings {
        FetchSettings {
            min_content_length: 20,
            render_enabled: true,
        }
    }

    #[tokio::test]
    async fn homepage_static_text_is_stored() {
        let url = "https://ada.example.edu/";
        let pages = MockPageFetcher::new().with_html(url, 200, "Ada studies consensus protocols.");
        let store = MockContentStore::new();
        let handler = HomepageHandler::new(
            ContentFetcher::new(pages, MockExtractor::passthrough(), settings()),
            store.clone(),
        );

        let tasks = MockTaskStore::new();
        let outcome = handler.handle(&homepage_task(&tasks, url)).await.unwrap();

        assert!(matches!(outcome, TaskOutcome::Success { .. }));
        let saved = store.saved.lock().unwrap().clone();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].source_tag, "homepage");
        assert_eq!(saved[0].candidate_id, Some(9));
        assert_eq!(saved[0].content_hash, compute_hash("Ada studies consensus protocols."));
    }

    #[tokio::test]
    async fn homepage_rendered_text_is_tagged() {
        let url = "https://spa.example.edu/";
        let pages = MockPageFetcher::new().with_html(url, 200, "<div id=app></div>");
        let renderer = MockRenderer::new(Ok(RenderedPage {
            html: "Rendered biography of a researcher.".into(),
            container_text: None,
            status: Some(200),
            final_url: url.into(),
        }));
        let store = MockContentStore::new();
        let handler = HomepageHandler::new(
            ContentFetcher::with_renderer(pages, MockExtractor::passthrough(), Some(renderer), settings()),
            store.clone(),
        );

        let tasks = MockTaskStore::new();
        let outcome = handler.handle(&homepage_task(&tasks, url)).await.unwrap();

        assert!(outcome.message().contains("tag=homepage_rendered"));
        assert!(outcome.message().contains("fallback_reason=content too short"));
        assert_eq!(store.saved.lock().unwrap()[0].source_tag, "homepage_rendered");
    }

    #[tokio::test]
    async fn homepage_already_stored_is_skipped() {
        let url = "https://ada.example.edu/";
        let pages = MockPageFetcher::new();
        let handler = HomepageHandler::new(
            ContentFetcher::new(pages.clone(), MockExtractor::passthrough(), settings()),
            MockContentStore::with_existing(url, Some(9)),
        );

        let tasks = MockTaskStore::new();
        let outcome = handler.handle(&homepage_task(&tasks, url)).await.unwrap();

        assert!(matches!(outcome, TaskOutcome::Skip { .. }));
        assert_eq!(pages.call_count(), 0);
    }

    #[tokio::test]
    async fn homepage_fetch_failure_fails_task() {
        let url = "https://down.example.edu/";
        let pages = MockPageFetcher::new().with_html(url, 503, "");
        let store = MockContentStore::new();
        let handler = HomepageHandler::new(
            ContentFetcher::new(pages, MockExtractor::passthrough(), settings()),
            store.clone(),
        );

        let tasks = MockTaskStore::new();
        let outcome = handler.handle(&homepage_task(&tasks, url)).await.unwrap();

        match outcome {
            TaskOutcome::Fail { error, .. } => {
                assert!(error.unwrap().contains("HTTP 503"));
            }
            other => panic!("expected Fail, got {other:?}"),
        }
        assert!(store.saved.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn homepage_without_text_is_skipped() {
        let url = "https://blank.example.edu/";
        let pages = MockPageFetcher::new().with_html(url, 200, "   ");
        let store = MockContentStore::new();
        let handler = HomepageHandler::new(
            ContentFetcher::new(pages, MockExtractor::passthrough(), settings()),
            store.clone(),
        );

        let tasks = MockTaskStore::new();
        let outcome = handler.handle(&homepage_task(&tasks, url)).await.unwrap();

        match outcome {
            TaskOutcome::Skip { message } => {
                assert!(message.starts_with("no content at https://blank.example.edu/"));
                assert!(message.contains("fallback skipped"));
            }
            other => panic!("expected Skip, got {other:?}"),
        }
        assert!(store.saved.lock().unwrap().is_empty());
    }

    // -----------------------------------------------------------------------
    // OpenReview tasks
    // -----------------------------------------------------------------------

    const OPENREVIEW: &str = "https://openreview.test";

    type ReviewHandler = OpenReviewHandler<MockPageFetcher, MockTaskStore, MockOpenReviewStore>;

    fn openreview_handler(
        pages: MockPageFetcher,
        tasks: MockTaskStore,
        store: MockOpenReviewStore,
    ) -> ReviewHandler {
        let client = OpenReviewClient::new(pages)
            .with_base_url(OPENREVIEW)
            .with_pacing(Duration::ZERO, Duration::ZERO);
        OpenReviewHandler::new(client, tasks, store)
    }

    fn profile_page_url(id: &str) -> String {
        format!("{OPENREVIEW}/profile?id={id}")
    }

    const ADA_PROFILE: &str = r#"
        <h1>Ada Lovelace</h1>
        <div class="affiliation">Analytical Engine Society</div>
        <a href="https://github.com/AdaLovelace">GitHub</a>
        <a href="https://ada.example.edu/">Homepage</a>
    "#;

    #[tokio::test]
    async fn forum_enqueues_one_profile_task_per_author() {
        let forum_url = format!("{OPENREVIEW}/forum?id=abc");
        let pages = MockPageFetcher::new().with_html(
            &forum_url,
            200,
            r#"<h2 class="citation_title">Consensus at Scale</h2>
               <div class="authors">
                 <a href="/profile?id=~Ada_Lovelace1">Ada Lovelace</a>
                 <a href="/profile?id=~Alan_Turing1">Alan Turing</a>
                 <a href="/profile?id=~Ada_Lovelace1">A. Lovelace</a>
               </div>"#,
        );
        let tasks = MockTaskStore::new();
        let id = tasks.add(
            NewTask::new(OPENREVIEW_SOURCE, "forum", TaskTarget::Url(forum_url))
                .with_batch_id("iclr"),
        );
        let handler = openreview_handler(pages, tasks.clone(), MockOpenReviewStore::new());

        let outcome = handler.handle(&tasks.task(id).unwrap()).await.unwrap();

        assert_eq!(
            outcome,
            TaskOutcome::success("title=Consensus at Scale; authors=3; profile_tasks=2")
        );
        let created: Vec<CrawlTask> = tasks.tasks().into_iter().filter(|t| t.id != id).collect();
        assert_eq!(created.len(), 2);
        assert_eq!(created[0].target, TaskTarget::ProfileId("~Ada_Lovelace1".into()));
        assert!(created.iter().all(|t| t.task_type == "profile"
            && t.priority == 2
            && t.depth == 1
            && t.batch_id.as_deref() == Some("iclr")));
    }

    #[tokio::test]
    async fn forum_without_authors_is_skipped() {
        let forum_url = format!("{OPENREVIEW}/forum?id=anon");
        let pages = MockPageFetcher::new().with_html(&forum_url, 200, "<h1>Anonymous submission</h1>");
        let tasks = MockTaskStore::new();
        let id = tasks.add(NewTask::new(OPENREVIEW_SOURCE, "forum", TaskTarget::Url(forum_url)));
        let handler = openreview_handler(pages, tasks.clone(), MockOpenReviewStore::new());

        let outcome = handler.handle(&tasks.task(id).unwrap()).await.unwrap();

        assert!(matches!(outcome, TaskOutcome::Skip { .. }));
        assert_eq!(tasks.tasks().len(), 1);
    }

    #[tokio::test]
    async fn missing_forum_fails() {
        let tasks = MockTaskStore::new();
        let id = tasks.add(NewTask::new(
            OPENREVIEW_SOURCE,
            "forum",
            TaskTarget::Url(format!("{OPENREVIEW}/forum?id=gone")),
        ));
        let handler = openreview_handler(MockPageFetcher::new(), tasks.clone(), MockOpenReviewStore::new());

        let outcome = handler.handle(&tasks.task(id).unwrap()).await.unwrap();
        assert!(matches!(outcome, TaskOutcome::Fail { .. }));
    }

    #[tokio::test]
    async fn profile_is_saved_and_derives_github_and_homepage() {
        let pages = MockPageFetcher::new().with_html(&profile_page_url("~Ada_Lovelace1"), 200, ADA_PROFILE);
        let tasks = MockTaskStore::new();
        let store = MockOpenReviewStore::new();
        let id = tasks.add(
            NewTask::new(
                OPENREVIEW_SOURCE,
                "profile",
                TaskTarget::ProfileId("~Ada_Lovelace1".into()),
            )
            .with_candidate_id(4),
        );
        let handler = openreview_handler(pages, tasks.clone(), store.clone());

        let outcome = handler.handle(&tasks.task(id).unwrap()).await.unwrap();

        assert_eq!(
            outcome,
            TaskOutcome::success("profile=~Ada_Lovelace1; record=1; derived_tasks=2")
        );
        let saved = store.saved();
        assert_eq!(saved[0].0.affiliation.as_deref(), Some("Analytical Engine Society"));
        assert_eq!(saved[0].1, Some(4));

        let github = tasks.tasks().into_iter().find(|t| t.source == GITHUB_SOURCE).unwrap();
        assert_eq!(github.target, TaskTarget::Login("adalovelace".into()));
        assert_eq!(github.priority, 2);
        assert_eq!(github.candidate_id, Some(4));
        let homepage = tasks.tasks().into_iter().find(|t| t.source == HOMEPAGE_SOURCE).unwrap();
        assert_eq!(homepage.target, TaskTarget::Url("https://ada.example.edu/".into()));
        assert_eq!(homepage.priority, 3);
    }

    #[tokio::test]
    async fn recently_crawled_profile_is_skipped() {
        let pages = MockPageFetcher::new();
        let store = MockOpenReviewStore::with_crawled("~Ada_Lovelace1", chrono::Utc::now());
        let tasks = MockTaskStore::new();
        let id = tasks.add(NewTask::new(
            OPENREVIEW_SOURCE,
            "profile",
            TaskTarget::Url(profile_page_url("~Ada_Lovelace1")),
        ));
        let handler = openreview_handler(pages.clone(), tasks.clone(), store);

        let outcome = handler.handle(&tasks.task(id).unwrap()).await.unwrap();

        assert!(matches!(outcome, TaskOutcome::Skip { .. }));
        assert_eq!(pages.call_count(), 0);
    }

    #[tokio::test]
    async fn stale_profile_is_crawled_again() {
        let pages = MockPageFetcher::new().with_html(&profile_page_url("~Ada_Lovelace1"), 200, ADA_PROFILE);
        let store = MockOpenReviewStore::with_crawled(
            "~Ada_Lovelace1",
            chrono::Utc::now() - chrono::TimeDelta::days(30),
        );
        let tasks = MockTaskStore::new();
        let id = tasks.add(NewTask::new(
            OPENREVIEW_SOURCE,
            "profile",
            TaskTarget::ProfileId("~Ada_Lovelace1".into()),
        ));
        let handler = openreview_handler(pages, tasks.clone(), store.clone());

        let outcome = handler.handle(&tasks.task(id).unwrap()).await.unwrap();

        assert!(matches!(outcome, TaskOutcome::Success { .. }));
        assert_eq!(store.saved().len(), 1);
    }

    #[tokio::test]
    async fn openreview_round_runs_forum_then_profiles() {
        let forum_url = format!("{OPENREVIEW}/forum?id=abc");
        let pages = MockPageFetcher::new()
            .with_html(
                &forum_url,
                200,
                r#"<h1>Consensus at Scale</h1><a href="/profile?id=~Ada_Lovelace1">Ada Lovelace</a>"#,
            )
            .with_html(&profile_page_url("~Ada_Lovelace1"), 200, ADA_PROFILE);
        let tasks = MockTaskStore::new();
        tasks.add(NewTask::new(OPENREVIEW_SOURCE, "forum", TaskTarget::Url(forum_url)));
        let store = MockOpenReviewStore::new();
        let handler = openreview_handler(pages, tasks.clone(), store.clone());

        let outcome = runner(tasks.clone())
            .run_until_empty(OPENREVIEW_SOURCE, &handler, None)
            .await
            .unwrap();

        assert_eq!(outcome.stats().unwrap().success_count, 2);
        assert_eq!(store.saved().len(), 1);
        assert!(tasks
            .tasks()
            .iter()
            .filter(|t| t.source == OPENREVIEW_SOURCE)
            .all(|t| t.status == TaskStatus::Done));
    }
}
