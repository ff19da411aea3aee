use std::time::Duration;

use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use scout_core::error::AppError;
use scout_core::models::PageResponse;
use scout_core::traits::PageFetcher;
use url::Url;

pub(crate) const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Plain HTTP page fetcher using reqwest.
///
/// Sends browser-like headers and retries timeouts and connection failures
/// with a linearly growing delay. Any HTTP status, including 4xx/5xx, is
/// returned as a [`PageResponse`]; deciding what a status means is up to
/// the caller.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    timeout_secs: u64,
    max_attempts: u32,
    retry_delay: Duration,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let client = Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            timeout_secs: timeout.as_secs(),
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
        })
    }

    /// Attempts per request and the base of the linear backoff
    /// (`delay * attempt`).
    pub fn with_retries(mut self, max_attempts: u32, retry_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    fn map_send_error(&self, e: reqwest::Error) -> AppError {
        if e.is_timeout() {
            AppError::Timeout(self.timeout_secs)
        } else if e.is_connect() {
            AppError::NetworkError(format!("Connection failed: {e}"))
        } else {
            AppError::HttpError(e.to_string())
        }
    }
}

fn check_scheme(url: &str) -> Result<(), AppError> {
    let parsed = Url::parse(url).map_err(|e| AppError::HttpError(format!("Invalid URL: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(AppError::HttpError(format!(
            "URL scheme '{scheme}' is not allowed (only http/https)"
        ))),
    }
}

impl PageFetcher for ReqwestFetcher {
    async fn get(&self, url: &str) -> Result<PageResponse, AppError> {
        check_scheme(url)?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let final_url = response.url().to_string();
                    let body = response.text().await.map_err(|e| {
                        AppError::HttpError(format!("Failed to read response body: {e}"))
                    })?;
                    tracing::debug!(%url, status, bytes = body.len(), "Fetched page");
                    return Ok(PageResponse {
                        status,
                        body,
                        final_url,
                    });
                }
                Err(e) if (e.is_timeout() || e.is_connect()) && attempt < self.max_attempts => {
                    let delay = self.retry_delay * attempt;
                    tracing::warn!(%url, attempt, error = %e, ?delay, "Fetch failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(self.map_send_error(e)),
            }
        }
    }
}
