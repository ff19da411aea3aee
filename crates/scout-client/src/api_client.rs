use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Client, Method};
use scout_core::error::AppError;
use scout_core::token_pool::{TokenLease, TokenPool};
use scout_core::traits::ProfileApi;
use serde_json::Value;
use url::Url;

use crate::config::ClientConfig;

const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";
const USER_AGENT: &str = "scout-crawler/0.1";
const PAGE_SIZE: usize = 100;

/// Retry schedule of [`GithubClient::request`].
///
/// Backoff doubles from `base_delay` up to `max_delay`:
/// 1s, 2s, 4s, 8s, ... 60s.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Cooldown put on a token that got a 5xx.
    pub server_error_cooldown: Duration,
    /// Upper bound on a server-supplied `Retry-After`.
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            server_error_cooldown: Duration::from_secs(30),
            max_retry_after: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-indexed).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Rate-limit related response headers.
#[derive(Debug, Default, Clone, Copy)]
struct RateHeaders {
    remaining: Option<i64>,
    reset: Option<DateTime<Utc>>,
    retry_after: Option<Duration>,
}

impl RateHeaders {
    fn parse(headers: &HeaderMap) -> Self {
        let number = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<i64>().ok())
        };
        Self {
            remaining: number("x-ratelimit-remaining"),
            reset: number("x-ratelimit-reset").and_then(|secs| DateTime::from_timestamp(secs, 0)),
            retry_after: number(RETRY_AFTER.as_str())
                .filter(|s| *s >= 0)
                .map(|s| Duration::from_secs(s as u64)),
        }
    }
}

fn after(delay: Duration) -> DateTime<Utc> {
    Utc::now() + TimeDelta::from_std(delay).unwrap_or(TimeDelta::seconds(60))
}

/// Rate-limit aware GitHub REST client over a rotating [`TokenPool`].
///
/// Every attempt takes the next usable token. Rate-limited tokens are put
/// on cooldown and the request moves on to another token; rejected tokens
/// are disabled for good.
#[derive(Clone)]
pub struct GithubClient {
    http: Client,
    pool: TokenPool,
    api_base: String,
    pacing: Duration,
    rate_limit_backoff: Duration,
    timeout_secs: u64,
    retry: RetryPolicy,
}

impl GithubClient {
    pub fn new(pool: TokenPool, config: &ClientConfig) -> Result<Self, AppError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(GITHUB_ACCEPT));

        let http = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            http,
            pool,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            pacing: config.request_pacing,
            rate_limit_backoff: config.rate_limit_backoff,
            timeout_secs: config.http_timeout.as_secs(),
            retry: RetryPolicy::default(),
        })
    }

    /// Builds the pool from the configured credential records.
    pub fn from_config(config: &ClientConfig) -> Result<Self, AppError> {
        if config.tokens.is_empty() {
            return Err(AppError::ConfigError(
                "no GitHub tokens configured (SCOUT_TOKENS_FILE or GITHUB_TOKENS)".into(),
            ));
        }
        Self::new(TokenPool::from_records(config.tokens.clone()), config)
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn pool(&self) -> &TokenPool {
        &self.pool
    }

    /// Issues `method path?params` and returns the decoded JSON body.
    ///
    /// Fails fast on 404, other 4xx and malformed bodies. Rate limits,
    /// rejected tokens, 5xx and transport errors are retried up to the
    /// policy's attempt count, then reported as
    /// [`AppError::ExhaustedRetries`]. [`AppError::ExhaustedTokens`] is
    /// returned as soon as no token can ever be used again.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Value, AppError> {
        let url = self.endpoint(path, params)?;
        let mut last_error = AppError::Generic("no attempt made".into());

        for attempt in 1..=self.retry.max_attempts {
            let lease = self.pool.acquire().await?;
            if !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }

            let error = match self.attempt(&lease, method.clone(), &url, path).await {
                Ok(body) => return Ok(body),
                Err(error) if !error.is_retryable() => return Err(error),
                Err(error) => error,
            };
            tracing::warn!(%path, attempt, error = %error, "Request attempt failed");

            // Rate limits and rejected tokens move on to the next token;
            // only upstream trouble waits out the backoff.
            if matches!(
                error,
                AppError::NetworkError(_) | AppError::Timeout(_) | AppError::ServerError { .. }
            ) {
                self.sleep_before_retry(attempt).await;
            }
            last_error = error;
        }

        Err(AppError::ExhaustedRetries {
            attempts: self.retry.max_attempts,
            last: Box::new(last_error),
        })
    }

    fn endpoint(&self, path: &str, params: &[(&str, String)]) -> Result<Url, AppError> {
        let mut url = Url::parse(&format!("{}{}", self.api_base, path))
            .map_err(|e| AppError::ConfigError(format!("invalid GitHub API URL: {e}")))?;
        if !params.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(params.iter().map(|(key, value)| (*key, value.as_str())));
        }
        Ok(url)
    }

    /// One request with one token; the token's state is updated from the
    /// response before the outcome is classified.
    async fn attempt(
        &self,
        lease: &TokenLease,
        method: Method,
        url: &Url,
        path: &str,
    ) -> Result<Value, AppError> {
        let response = self
            .http
            .request(method, url.clone())
            .header(AUTHORIZATION, format!("token {}", lease.value))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status().as_u16();
        let rate = RateHeaders::parse(response.headers());
        self.pool
            .update_limits(&lease.value, rate.remaining, rate.reset);

        match status {
            200..=299 => {
                let body = response
                    .text()
                    .await
                    .map_err(|e| AppError::NetworkError(format!("body read failed: {e}")))?;
                serde_json::from_str(&body)
                    .map_err(|e| AppError::ParseError(format!("invalid JSON from {path}: {e}")))
            }
            401 => {
                let body = response.text().await.unwrap_or_default();
                Err(self.on_unauthorized(lease, rate, &body))
            }
            403 | 429 => {
                self.on_rate_limited(lease, status, rate);
                Err(AppError::RateLimited { status })
            }
            404 => Err(AppError::NotFound(path.to_string())),
            500..=599 => {
                self.pool
                    .cooldown(&lease.value, after(self.retry.server_error_cooldown));
                Err(AppError::ServerError { status })
            }
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(AppError::HttpError(format!(
                    "HTTP {status} for {path}: {}",
                    body.chars().take(200).collect::<String>()
                )))
            }
        }
    }

    fn map_send_error(&self, e: reqwest::Error) -> AppError {
        if e.is_timeout() {
            AppError::Timeout(self.timeout_secs)
        } else if e.is_connect() {
            AppError::NetworkError(format!("Connection failed: {e}"))
        } else {
            AppError::NetworkError(e.to_string())
        }
    }

    async fn sleep_before_retry(&self, attempt: u32) {
        if attempt < self.retry.max_attempts {
            tokio::time::sleep(self.retry.backoff(attempt)).await;
        }
    }

    /// 401 is a rate limit when the quota is spent or the body says so;
    /// otherwise the token itself is bad.
    fn on_unauthorized(&self, lease: &TokenLease, rate: RateHeaders, body: &str) -> AppError {
        let limited = rate.remaining == Some(0) || body.to_lowercase().contains("rate limit");
        if limited {
            let until = match rate.reset.or_else(|| self.pool.reset_time(&lease.value)) {
                Some(reset) => reset + TimeDelta::seconds(1),
                None => after(self.rate_limit_backoff),
            };
            self.pool.cooldown(&lease.value, until);
            AppError::RateLimited { status: 401 }
        } else {
            self.pool.disable(&lease.value);
            AppError::AuthError {
                token: lease.masked.clone(),
            }
        }
    }

    fn on_rate_limited(&self, lease: &TokenLease, status: u16, rate: RateHeaders) {
        let until = if let Some(wait) = rate.retry_after {
            after(wait.min(self.retry.max_retry_after))
        } else if let Some(reset) = rate.reset {
            reset + TimeDelta::seconds(1)
        } else {
            after(self.rate_limit_backoff)
        };
        tracing::warn!(token = %lease.masked, status, "Rate limited");
        self.pool.cooldown(&lease.value, until);
    }

    async fn get(&self, path: &str, params: &[(&str, String)]) -> Result<Value, AppError> {
        self.request(Method::GET, path, params).await
    }

    pub async fn user(&self, login: &str) -> Result<Value, AppError> {
        self.get(&format!("/users/{login}"), &[]).await
    }

    /// Repositories of `login`, most recently updated first, paginating
    /// until `limit` are collected or a short page ends the listing.
    pub async fn repos(&self, login: &str, limit: usize) -> Result<Vec<Value>, AppError> {
        let path = format!("/users/{login}/repos");
        let mut repos = Vec::new();
        let mut page = 1u32;

        while repos.len() < limit {
            let params = [
                ("per_page", PAGE_SIZE.to_string()),
                ("page", page.to_string()),
                ("sort", "updated".to_string()),
                ("type", "all".to_string()),
            ];
            let batch = expect_array(self.get(&path, &params).await?, &path)?;
            let count = batch.len();
            repos.extend(batch);
            if count < PAGE_SIZE {
                break;
            }
            page += 1;
        }

        repos.truncate(limit);
        Ok(repos)
    }

    /// First page of followers of `login`.
    pub async fn followers(&self, login: &str, per_page: usize) -> Result<Vec<Value>, AppError> {
        let path = format!("/users/{login}/followers");
        let params = [("per_page", per_page.min(PAGE_SIZE).to_string())];
        expect_array(self.get(&path, &params).await?, &path)
    }

    /// First page of accounts `login` follows.
    pub async fn following(&self, login: &str, per_page: usize) -> Result<Vec<Value>, AppError> {
        let path = format!("/users/{login}/following");
        let params = [("per_page", per_page.min(PAGE_SIZE).to_string())];
        expect_array(self.get(&path, &params).await?, &path)
    }

    pub async fn rate_limit(&self) -> Result<Value, AppError> {
        self.get("/rate_limit", &[]).await
    }
}

fn expect_array(value: Value, path: &str) -> Result<Vec<Value>, AppError> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(AppError::ParseError(format!(
            "expected array from {path}, got {}",
            match other {
                Value::Object(_) => "object",
                Value::String(_) => "string",
                _ => "scalar",
            }
        ))),
    }
}

impl ProfileApi for GithubClient {
    async fn user(&self, login: &str) -> Result<Value, AppError> {
        GithubClient::user(self, login).await
    }

    async fn repos(&self, login: &str, limit: usize) -> Result<Vec<Value>, AppError> {
        GithubClient::repos(self, login, limit).await
    }
}
