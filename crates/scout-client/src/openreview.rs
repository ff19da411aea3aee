//! OpenReview forum and profile pages.
//!
//! A forum page lists a paper's authors with links to their profiles; a
//! profile page carries the researcher's affiliation, contact links and a
//! short bio. Both are scraped from HTML through a [`PageFetcher`].

use std::sync::LazyLock;
use std::time::Duration;

use scout_core::error::AppError;
use scout_core::models::OpenReviewProfile;
use scout_core::traits::PageFetcher;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use url::Url;

use crate::discovery::is_valid_login;

pub const OPENREVIEW_BASE: &str = "https://openreview.net";

const MAX_AUTHORS: usize = 10;
const MAX_BIO_CHARS: usize = 500;

/// Author names containing one of these are affiliations, not people.
const NOT_A_NAME: &[&str] = &["university", "institute", "lab", "department", "email"];
const NAME_SEPARATORS: &[&str] = &[",", ";", "·", "、", " and ", " & "];
const HOMEPAGE_HINTS: &[&str] = &["homepage", "personal page", "website", "blog"];
const HOMEPAGE_TLDS: &[&str] = &[".edu", ".io", ".me"];

fn selectors(list: &[&str]) -> Vec<Selector> {
    list.iter().filter_map(|s| Selector::parse(s).ok()).collect()
}

static TITLE: LazyLock<Vec<Selector>> =
    LazyLock::new(|| selectors(&["h2.citation_title", "h1", "title"]));
static AUTHOR_LINKS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&[r#"a[href*="/profile"]"#, ".authors a", ".author-list a"])
});
static AUTHOR_TEXT: LazyLock<Vec<Selector>> =
    LazyLock::new(|| selectors(&[".authors", ".author-list"]));
static VENUE: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&[
        ".venue",
        ".conference",
        ".journal",
        r#"[class*="venue"]"#,
        r#"[class*="conference"]"#,
    ])
});
static NAME: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&["h1", "h2.profile-name", ".profile-header h1", ".name"])
});
static AFFILIATION: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&[
        ".affiliation",
        ".institution",
        ".organization",
        r#"[class*="affiliation"]"#,
        r#"[class*="institution"]"#,
    ])
});
static BIO: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&[
        ".bio",
        ".biography",
        ".about",
        ".description",
        r#"[class*="bio"]"#,
        r#"[class*="about"]"#,
    ])
});
static MAILTO: LazyLock<Vec<Selector>> = LazyLock::new(|| selectors(&[r#"a[href^="mailto:"]"#]));
static LINKS: LazyLock<Vec<Selector>> = LazyLock::new(|| selectors(&["a[href]"]));

/// One author as listed on a forum page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForumAuthor {
    pub name: String,
    pub profile_url: Option<String>,
}

/// Paper metadata from a forum page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ForumInfo {
    pub url: String,
    pub title: String,
    pub venue: Option<String>,
    pub authors: Vec<ForumAuthor>,
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text of the first element, per selector in order, that `accept` likes.
fn first_text(
    document: &Html,
    selectors: &[Selector],
    accept: impl Fn(&str) -> bool,
) -> Option<String> {
    selectors.iter().find_map(|selector| {
        let text = element_text(document.select(selector).next()?);
        accept(&text).then_some(text)
    })
}

fn char_count_within(text: &str, min: usize, max: usize) -> bool {
    (min..=max).contains(&text.chars().count())
}

fn absolute_url(href: &str, base: &str) -> Option<String> {
    if href.starts_with('/') {
        Some(format!("{}{href}", base.trim_end_matches('/')))
    } else if href.starts_with("http") {
        Some(href.to_string())
    } else {
        None
    }
}

/// Splits a free-text author line into plausible person names.
pub fn split_author_names(text: &str) -> Vec<String> {
    let mut names = vec![text.split_whitespace().collect::<Vec<_>>().join(" ")];
    for separator in NAME_SEPARATORS {
        let split: Vec<String> = names
            .iter()
            .flat_map(|n| n.split(separator))
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();
        names = split;
    }
    names
        .into_iter()
        .filter(|n| n.chars().any(|c| c.is_ascii_alphabetic()) && char_count_within(n, 2, 50))
        .filter(|n| {
            let lower = n.to_lowercase();
            !NOT_A_NAME.iter().any(|word| lower.contains(word))
        })
        .collect()
}

fn parse_authors(document: &Html, base: &str) -> Vec<ForumAuthor> {
    for selector in AUTHOR_LINKS.iter() {
        let mut authors: Vec<ForumAuthor> = Vec::new();
        for link in document.select(selector) {
            let name = element_text(link);
            if name.chars().count() < 2 {
                continue;
            }
            let author = ForumAuthor {
                name,
                profile_url: link
                    .value()
                    .attr("href")
                    .and_then(|href| absolute_url(href, base)),
            };
            if !authors.contains(&author) {
                authors.push(author);
            }
        }
        if !authors.is_empty() {
            authors.truncate(MAX_AUTHORS);
            return authors;
        }
    }

    for selector in AUTHOR_TEXT.iter() {
        let authors: Vec<ForumAuthor> = document
            .select(selector)
            .flat_map(|element| split_author_names(&element_text(element)))
            .map(|name| ForumAuthor {
                name,
                profile_url: None,
            })
            .take(MAX_AUTHORS)
            .collect();
        if !authors.is_empty() {
            return authors;
        }
    }
    Vec::new()
}

/// Title, venue and authors of a forum page. Profile links are made
/// absolute against `base`.
pub fn parse_forum(html: &str, forum_url: &str, base: &str) -> ForumInfo {
    let document = Html::parse_document(html);
    let title = first_text(&document, &TITLE, |t| !t.is_empty())
        .map(|t| {
            t.replace("OpenReview", "")
                .trim_matches(|c: char| c.is_whitespace() || c == '|')
                .to_string()
        })
        .unwrap_or_default();

    ForumInfo {
        url: forum_url.to_string(),
        title,
        venue: first_text(&document, &VENUE, |t| char_count_within(t, 1, 99)),
        authors: parse_authors(&document, base),
    }
}

fn find_email(text: &str) -> Option<String> {
    text.split_whitespace()
        .map(|word| word.trim_matches(|c: char| !c.is_ascii_alphanumeric()))
        .find(|word| {
            word.split_once('@').is_some_and(|(local, domain)| {
                !local.is_empty() && domain.contains('.') && !domain.ends_with('.')
            })
        })
        .map(str::to_string)
}

fn profile_email(document: &Html) -> Option<String> {
    let from_link = MAILTO.iter().find_map(|selector| {
        document
            .select(selector)
            .filter_map(|a| a.value().attr("href"))
            .map(|href| href.trim_start_matches("mailto:").trim().to_string())
            .find(|email| email.contains('@') && email.contains('.'))
    });
    from_link.or_else(|| {
        let text = document.root_element().text().collect::<Vec<_>>().join(" ");
        find_email(&text)
    })
}

fn looks_like_homepage(href: &str, text: &str) -> bool {
    let Ok(url) = Url::parse(href) else {
        return false;
    };
    let host = url.host_str().unwrap_or_default();
    if host.ends_with("openreview.net") || host.ends_with("github.com") {
        return false;
    }
    let text = text.to_lowercase();
    HOMEPAGE_HINTS.iter().any(|hint| text.contains(hint) || href.contains(hint))
        || host.starts_with("www.")
        || HOMEPAGE_TLDS.iter().any(|tld| host.ends_with(tld))
}

fn profile_links(document: &Html) -> Vec<(String, String)> {
    LINKS
        .iter()
        .flat_map(|selector| document.select(selector))
        .filter_map(|a| {
            let href = a.value().attr("href")?;
            Some((href.to_string(), element_text(a)))
        })
        .filter(|(href, _)| href.starts_with("http") && href.len() < 200)
        .collect()
}

/// Researcher fields of a profile page.
pub fn parse_profile(html: &str, profile_id: &str, profile_url: &str) -> OpenReviewProfile {
    let document = Html::parse_document(html);
    let links = profile_links(&document);

    OpenReviewProfile {
        profile_id: profile_id.to_string(),
        profile_url: profile_url.to_string(),
        name: first_text(&document, &NAME, |t| char_count_within(t, 2, 50)),
        affiliation: first_text(&document, &AFFILIATION, |t| char_count_within(t, 1, 200)),
        email: profile_email(&document),
        homepage: links
            .iter()
            .find(|(href, text)| looks_like_homepage(href, text))
            .map(|(href, _)| href.clone()),
        github: links
            .iter()
            .find(|(href, _)| href.contains("github.com"))
            .map(|(href, _)| href.clone()),
        bio: first_text(&document, &BIO, |t| t.chars().count() > 20).map(|bio| {
            match bio.char_indices().nth(MAX_BIO_CHARS) {
                Some((cut, _)) => format!("{}...", &bio[..cut]),
                None => bio,
            }
        }),
    }
}

/// Profile id from `/profile?id=~X`, `/profile/~X` or, failing those, the
/// last path segment.
pub fn profile_id_from_url(profile_url: &str) -> Option<String> {
    let url = Url::parse(profile_url).ok()?;
    if let Some((_, id)) = url.query_pairs().find(|(key, _)| key == "id") {
        return (!id.is_empty()).then(|| id.into_owned());
    }
    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    match segments.iter().position(|s| *s == "profile") {
        Some(i) => segments.get(i + 1).map(|s| s.to_string()),
        None => segments.last().map(|s| s.to_string()),
    }
}

/// GitHub login of a `https://github.com/<login>[/...]` link.
pub fn github_login_from_url(github_url: &str) -> Option<String> {
    let url = Url::parse(github_url).ok()?;
    if !matches!(url.host_str(), Some("github.com" | "www.github.com")) {
        return None;
    }
    let login = url.path_segments()?.find(|s| !s.is_empty())?;
    is_valid_login(login).then(|| login.to_ascii_lowercase())
}

/// Forum and profile scraper with polite pacing.
///
/// Every request waits `request_delay`, doubled on each retry. A 429 adds
/// `rate_limit_wait` before the next attempt; 5xx and transport errors are
/// retried; a 404 means the page does not exist.
#[derive(Clone)]
pub struct OpenReviewClient<P> {
    fetcher: P,
    base_url: String,
    request_delay: Duration,
    rate_limit_wait: Duration,
    max_attempts: u32,
}

impl<P: PageFetcher> OpenReviewClient<P> {
    pub fn new(fetcher: P) -> Self {
        Self {
            fetcher,
            base_url: OPENREVIEW_BASE.to_string(),
            request_delay: Duration::from_secs(1),
            rate_limit_wait: Duration::from_secs(5),
            max_attempts: 3,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_pacing(mut self, request_delay: Duration, rate_limit_wait: Duration) -> Self {
        self.request_delay = request_delay;
        self.rate_limit_wait = rate_limit_wait;
        self
    }

    pub fn profile_url(&self, profile_id: &str) -> String {
        format!("{}/profile?id={profile_id}", self.base_url)
    }

    /// Body of `url`, or `None` on 404.
    async fn fetch_html(&self, url: &str) -> Result<Option<String>, AppError> {
        let mut last_error = AppError::Generic("no attempt made".into());

        for attempt in 1..=self.max_attempts {
            let factor = 2u32.saturating_pow(attempt - 1);
            tokio::time::sleep(self.request_delay.saturating_mul(factor)).await;

            let error = match self.fetcher.get(url).await {
                Ok(page) if page.is_success() => return Ok(Some(page.body)),
                Ok(page) if page.status == 404 => {
                    tracing::debug!(%url, "OpenReview page not found");
                    return Ok(None);
                }
                Ok(page) if page.status == 429 => {
                    tracing::warn!(%url, attempt, "OpenReview rate limit, waiting");
                    tokio::time::sleep(self.rate_limit_wait).await;
                    AppError::RateLimited { status: 429 }
                }
                Ok(page) if page.status >= 500 => AppError::ServerError {
                    status: page.status,
                },
                Ok(page) => {
                    return Err(AppError::HttpError(format!("HTTP {} for {url}", page.status)));
                }
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };
            tracing::warn!(%url, attempt, error = %error, "OpenReview request failed");
            last_error = error;
        }

        Err(AppError::ExhaustedRetries {
            attempts: self.max_attempts,
            last: Box::new(last_error),
        })
    }

    /// Forum page metadata; `None` if the forum does not exist.
    pub async fn forum(&self, forum_url: &str) -> Result<Option<ForumInfo>, AppError> {
        let html = self.fetch_html(forum_url).await?;
        Ok(html.map(|html| parse_forum(&html, forum_url, &self.base_url)))
    }

    /// Profile page fields; `None` if the profile does not exist.
    pub async fn profile(&self, profile_id: &str) -> Result<Option<OpenReviewProfile>, AppError> {
        let url = self.profile_url(profile_id);
        let html = self.fetch_html(&url).await?;
        Ok(html.map(|html| parse_profile(&html, profile_id, &url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::ReqwestFetcher;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FORUM_HTML: &str = r#"
        <html><head><title>Consensus at Scale | OpenReview</title></head>
        <body>
          <h2 class="citation_title">Consensus at Scale</h2>
          <div class="venue">ICLR 2024 Poster</div>
          <div class="authors">
            <a href="/profile?id=~Ada_Lovelace1">Ada Lovelace</a>,
            <a href="/profile?id=~Alan_Turing1">Alan Turing</a>,
            <a href="/profile?id=~Ada_Lovelace1">Ada Lovelace</a>
          </div>
        </body></html>
    "#;

    const PROFILE_HTML: &str = r#"
        <html><body>
          <div class="profile-header"><h1>Ada Lovelace</h1></div>
          <div class="institution">Analytical Engine Society</div>
          <div class="bio">Works on distributed consensus and the theory of computing machines.</div>
          <a href="https://openreview.net/group?id=ICLR.cc">ICLR</a>
          <a href="https://github.com/adalovelace/engine">Code</a>
          <a href="https://ada.example.edu/~ada">Homepage</a>
          <a href="mailto:ada@example.edu">Email</a>
        </body></html>
    "#;

    fn client(server: &MockServer) -> OpenReviewClient<ReqwestFetcher> {
        let fetcher = ReqwestFetcher::new()
            .unwrap()
            .with_retries(1, Duration::ZERO);
        OpenReviewClient::new(fetcher)
            .with_base_url(server.uri())
            .with_pacing(Duration::ZERO, Duration::ZERO)
    }

    #[test]
    fn test_parse_forum_links() {
        let forum = parse_forum(FORUM_HTML, "https://openreview.net/forum?id=abc", OPENREVIEW_BASE);

        assert_eq!(forum.title, "Consensus at Scale");
        assert_eq!(forum.venue.as_deref(), Some("ICLR 2024 Poster"));
        assert_eq!(forum.authors.len(), 2);
        assert_eq!(forum.authors[0].name, "Ada Lovelace");
        assert_eq!(
            forum.authors[1].profile_url.as_deref(),
            Some("https://openreview.net/profile?id=~Alan_Turing1")
        );
    }

    #[test]
    fn test_parse_forum_text_authors() {
        let html = r#"<h1>Paper</h1><p class="author-list">Grace Hopper, Edsger Dijkstra and MIT Lab</p>"#;
        let forum = parse_forum(html, "u", OPENREVIEW_BASE);

        let names: Vec<&str> = forum.authors.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Grace Hopper", "Edsger Dijkstra"]);
        assert!(forum.authors.iter().all(|a| a.profile_url.is_none()));
    }

    #[test]
    fn test_split_author_names() {
        assert_eq!(
            split_author_names("A. Smith; Bo Li & Chen Wu · University of X"),
            vec!["A. Smith", "Bo Li", "Chen Wu"]
        );
        assert!(split_author_names("42").is_empty());
    }

    #[test]
    fn test_parse_profile() {
        let profile = parse_profile(
            PROFILE_HTML,
            "~Ada_Lovelace1",
            "https://openreview.net/profile?id=~Ada_Lovelace1",
        );

        assert_eq!(profile.name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(profile.affiliation.as_deref(), Some("Analytical Engine Society"));
        assert_eq!(profile.email.as_deref(), Some("ada@example.edu"));
        assert_eq!(profile.homepage.as_deref(), Some("https://ada.example.edu/~ada"));
        assert_eq!(
            profile.github.as_deref(),
            Some("https://github.com/adalovelace/engine")
        );
        assert!(profile.bio.unwrap().starts_with("Works on distributed"));
    }

    #[test]
    fn test_profile_email_from_text() {
        let profile = parse_profile("<p>Contact: grace (at) navy, or grace@navy.mil.</p>", "~G1", "u");
        assert_eq!(profile.email.as_deref(), Some("grace@navy.mil"));
    }

    #[test]
    fn test_long_bio_is_cut() {
        let html = format!(r#"<div class="bio">{}</div>"#, "x".repeat(800));
        let bio = parse_profile(&html, "~X1", "u").bio.unwrap();
        assert_eq!(bio.chars().count(), MAX_BIO_CHARS + 3);
        assert!(bio.ends_with("..."));
    }

    #[test]
    fn test_profile_id_from_url() {
        assert_eq!(
            profile_id_from_url("https://openreview.net/profile?id=~Ada_Lovelace1").as_deref(),
            Some("~Ada_Lovelace1")
        );
        assert_eq!(
            profile_id_from_url("https://openreview.net/profile/~Alan_Turing1?tab=x").as_deref(),
            Some("~Alan_Turing1")
        );
        assert_eq!(
            profile_id_from_url("https://example.org/people/grace").as_deref(),
            Some("grace")
        );
        assert_eq!(profile_id_from_url("not a url"), None);
    }

    #[test]
    fn test_github_login_from_url() {
        assert_eq!(
            github_login_from_url("https://github.com/AdaLovelace/engine").as_deref(),
            Some("adalovelace")
        );
        assert_eq!(github_login_from_url("https://gitlab.com/ada"), None);
        assert_eq!(github_login_from_url("https://github.com/"), None);
    }

    #[tokio::test]
    async fn forum_is_fetched_and_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/forum"))
            .and(query_param("id", "abc"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FORUM_HTML))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        let url = format!("{}/forum?id=abc", server.uri());
        let forum = client.forum(&url).await.unwrap().unwrap();

        assert_eq!(forum.authors.len(), 2);
        assert_eq!(
            forum.authors[0].profile_url,
            Some(format!("{}/profile?id=~Ada_Lovelace1", server.uri()))
        );
    }

    #[tokio::test]
    async fn missing_profile_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/profile"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        assert!(client.profile("~Nobody1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rate_limited_profile_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/profile"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/profile"))
            .and(query_param("id", "~Ada_Lovelace1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PROFILE_HTML))
            .mount(&server)
            .await;

        let client = client(&server);
        let profile = client.profile("~Ada_Lovelace1").await.unwrap().unwrap();

        assert_eq!(profile.profile_id, "~Ada_Lovelace1");
        assert_eq!(
            profile.profile_url,
            format!("{}/profile?id=~Ada_Lovelace1", server.uri())
        );
        assert_eq!(profile.name.as_deref(), Some("Ada Lovelace"));
    }

    #[tokio::test]
    async fn persistent_server_errors_exhaust_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let client = client(&server);
        let err = client.profile("~Ada_Lovelace1").await.unwrap_err();
        assert!(matches!(err, AppError::ExhaustedRetries { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn forbidden_fails_fast() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        let err = client.forum(&format!("{}/forum?id=x", server.uri())).await.unwrap_err();
        assert!(matches!(err, AppError::HttpError(ref m) if m.contains("403")));
    }
}
