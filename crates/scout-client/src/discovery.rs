//! Bounded follow-graph traversal over public GitHub profile pages.
//!
//! ```text
//!   seed ──followers──▶ d1_followers ─┐
//!        ──following──▶ d1_following ─┴─▶ d1 ──followers/following──▶ d2
//! ```
//!
//! Depth 1 walks the seed's two follow tabs; depth 2 walks the tabs of every
//! depth-1 login with a per-user limit that shrinks as the global cap
//! fills up. The HTML pages are scraped through a plain [`PageFetcher`], so
//! no API tokens are spent here.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use rand::Rng;
use scout_core::models::DiscoveryResult;
use scout_core::traits::PageFetcher;
use scraper::{Html, Selector};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_PROFILE_BASE: &str = "https://github.com";

/// First path segments that are site sections, never accounts.
const RESERVED_PATHS: &[&str] = &[
    "orgs",
    "organizations",
    "settings",
    "notifications",
    "explore",
    "marketplace",
    "pricing",
    "team",
    "login",
    "join",
    "about",
    "contact",
    "security",
    "terms",
    "privacy",
];

/// Link selectors, most reliable first. The last one is the generic
/// catch-all and only accepts single-segment hrefs.
static LINK_SELECTORS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    [
        r#"a[data-hovercard-type="user"]"#,
        r#".follow-list-item a[href^="/"]"#,
        r#".d-table-cell a[href^="/"]"#,
        r#".Box-row a[href^="/"]"#,
        r#"a[href^="/"]"#,
    ]
    .iter()
    .filter_map(|s| Selector::parse(s).ok())
    .collect()
});

/// GitHub username grammar: 1-39 alphanumerics or hyphens, no leading,
/// trailing or doubled hyphen.
pub fn is_valid_login(login: &str) -> bool {
    !login.is_empty()
        && login.len() <= 39
        && login.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        && !login.starts_with('-')
        && !login.ends_with('-')
        && !login.contains("--")
}

fn login_from_href(href: &str, single_segment: bool) -> Option<String> {
    let path = href.split(['?', '#']).next()?.trim_matches('/');
    let mut segments = path.split('/');
    let first = segments.next()?;
    if single_segment && segments.next().is_some() {
        return None;
    }
    let lower = first.to_ascii_lowercase();
    if RESERVED_PATHS.contains(&lower.as_str()) || !is_valid_login(first) {
        return None;
    }
    Some(lower)
}

/// Extracts lower-cased logins from a followers/following page of `owner`.
///
/// Selectors are tried in order and the first one yielding any login wins.
pub fn parse_follow_page(html: &str, owner: &str) -> BTreeSet<String> {
    let document = Html::parse_document(html);
    let owner = owner.to_ascii_lowercase();
    let last = LINK_SELECTORS.len().saturating_sub(1);

    for (i, selector) in LINK_SELECTORS.iter().enumerate() {
        let logins: BTreeSet<String> = document
            .select(selector)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| login_from_href(href, i == last))
            .filter(|login| *login != owner)
            .collect();
        if !logins.is_empty() {
            return logins;
        }
    }
    BTreeSet::new()
}

/// Which follow tab of a profile to walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowTab {
    Followers,
    Following,
}

impl FollowTab {
    pub fn as_str(&self) -> &'static str {
        match self {
            FollowTab::Followers => "followers",
            FollowTab::Following => "following",
        }
    }
}

impl fmt::Display for FollowTab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of one [`FollowDiscovery::discover_logins`] call.
#[derive(Debug, Clone)]
pub struct DiscoveryParams {
    /// 0, 1 or 2. Anything above 2 is treated as 2.
    pub depth: u8,
    /// Logins taken from each tab of a user.
    pub per_side: usize,
    /// Upper bound on the depth-2 set.
    pub d2_cap: usize,
    /// Jitter slept before every page request.
    pub sleep_range: (Duration, Duration),
}

impl Default for DiscoveryParams {
    fn default() -> Self {
        Self {
            depth: 2,
            per_side: 10,
            d2_cap: 200,
            sleep_range: (Duration::from_millis(300), Duration::from_millis(800)),
        }
    }
}

fn jitter((low, high): (Duration, Duration)) -> Duration {
    if high <= low {
        return low;
    }
    rand::thread_rng().gen_range(low..=high)
}

/// Follow-graph walker.
#[derive(Clone)]
pub struct FollowDiscovery<P> {
    fetcher: P,
    base_url: String,
    backoff_range: (Duration, Duration),
    max_pages: u32,
    max_rate_limit_retries: u32,
    cancel: Option<CancellationToken>,
}

impl<P: PageFetcher> FollowDiscovery<P> {
    pub fn new(fetcher: P) -> Self {
        Self {
            fetcher,
            base_url: DEFAULT_PROFILE_BASE.to_string(),
            backoff_range: (Duration::from_secs(2), Duration::from_secs(5)),
            max_pages: 10,
            max_rate_limit_retries: 5,
            cancel: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Randomized wait after a 429 or 5xx.
    pub fn with_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.backoff_range = (min, max);
        self
    }

    /// Stops the walk at the next page boundary once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.is_cancelled())
    }

    fn page_url(&self, login: &str, tab: FollowTab, page: u32) -> String {
        if page > 1 {
            format!("{}/{login}?tab={tab}&page={page}", self.base_url)
        } else {
            format!("{}/{login}?tab={tab}", self.base_url)
        }
    }

    /// Up to `limit` logins from one tab of `login`.
    ///
    /// Never fails: a missing user, a failing server or an exhausted 429
    /// budget just ends the walk with what was collected so far.
    pub async fn fetch_follow_list(
        &self,
        login: &str,
        tab: FollowTab,
        limit: usize,
        sleep_range: (Duration, Duration),
    ) -> BTreeSet<String> {
        let mut logins = BTreeSet::new();
        let mut page = 1;
        let mut rate_limit_retries = 0;

        while logins.len() < limit && page <= self.max_pages {
            if self.cancelled() {
                tracing::debug!(%login, %tab, "Discovery stopped");
                break;
            }
            tokio::time::sleep(jitter(sleep_range)).await;

            let url = self.page_url(login, tab, page);
            let mut response = match self.fetcher.get(&url).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(%login, %tab, page, error = %e, "Follow page fetch failed");
                    break;
                }
            };

            match response.status {
                429 => {
                    rate_limit_retries += 1;
                    if rate_limit_retries > self.max_rate_limit_retries {
                        tracing::warn!(%login, %tab, page, "Rate limited too often, giving up");
                        break;
                    }
                    let wait = jitter(self.backoff_range);
                    tracing::warn!(%login, %tab, page, ?wait, "Rate limited, backing off");
                    tokio::time::sleep(wait).await;
                    continue;
                }
                500..=599 => {
                    tracing::warn!(%login, %tab, page, status = response.status, "Server error, retrying once");
                    tokio::time::sleep(jitter(self.backoff_range)).await;
                    response = match self.fetcher.get(&url).await {
                        Ok(retry) if retry.is_success() => retry,
                        _ => {
                            tracing::warn!(%login, %tab, page, "Retry failed, skipping direction");
                            break;
                        }
                    };
                }
                404 => {
                    tracing::debug!(%login, %tab, "User not found");
                    break;
                }
                _ if !response.is_success() => {
                    tracing::warn!(%login, %tab, page, status = response.status, "Unexpected status");
                    break;
                }
                _ => {}
            }

            let found = parse_follow_page(&response.body, login);
            if found.is_empty() {
                break;
            }
            logins.extend(found);
            page += 1;
        }

        let logins: BTreeSet<String> = logins.into_iter().take(limit).collect();
        tracing::debug!(%login, %tab, count = logins.len(), "Follow list collected");
        logins
    }

    /// Walks the follow graph of `seed` up to `params.depth`.
    pub async fn discover_logins(&self, seed: &str, params: &DiscoveryParams) -> DiscoveryResult {
        let mut result = DiscoveryResult::empty(seed);
        if params.depth == 0 {
            return result;
        }
        if !is_valid_login(seed) {
            tracing::warn!(%seed, "Invalid seed login, skipping discovery");
            return result;
        }

        tracing::info!(
            %seed,
            depth = params.depth,
            per_side = params.per_side,
            d2_cap = params.d2_cap,
            "Starting follow discovery"
        );

        result.d1_followers = self
            .fetch_follow_list(seed, FollowTab::Followers, params.per_side, params.sleep_range)
            .await;
        result.d1_following = self
            .fetch_follow_list(seed, FollowTab::Following, params.per_side, params.sleep_range)
            .await;
        result.seed_processed = true;

        let d1 = result.d1_all();
        result.d1_total = d1.len();
        if params.depth < 2 {
            return result;
        }

        let mut d2 = BTreeSet::new();
        for (i, login) in d1.iter().enumerate() {
            if self.cancelled() || d2.len() >= params.d2_cap {
                break;
            }
            let remaining_cap = params.d2_cap - d2.len();
            let remaining_users = (d1.len() - i).max(1);
            let per_user = params.per_side.min((remaining_cap / remaining_users).max(10));

            let followers = self
                .fetch_follow_list(login, FollowTab::Followers, per_user, params.sleep_range)
                .await;
            let following = self
                .fetch_follow_list(login, FollowTab::Following, per_user, params.sleep_range)
                .await;
            d2.extend(followers);
            d2.extend(following);
            result.d1_processed += 1;

            if (i + 1) % 10 == 0 {
                tracing::info!(done = i + 1, total = d1.len(), collected = d2.len(), "Depth-2 progress");
            }
        }

        let seed_lower = seed.to_ascii_lowercase();
        result.d2 = d2
            .into_iter()
            .filter(|l| !d1.contains(l) && *l != seed_lower)
            .take(params.d2_cap)
            .collect();

        tracing::info!(
            %seed,
            d1_followers = result.d1_followers.len(),
            d1_following = result.d1_following.len(),
            d1_processed = result.d1_processed,
            d2 = result.d2.len(),
            "Follow discovery finished"
        );
        result
    }
}
