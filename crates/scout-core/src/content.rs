use crate::models::FetchResult;
use crate::traits::{NoRenderer, PageFetcher, Renderer, TextExtractor};

/// Tuning of the tiered fetch.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// Trimmed characters below which static text counts as insufficient.
    pub min_content_length: usize,
    pub render_enabled: bool,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            min_content_length: 200,
            render_enabled: true,
        }
    }
}

/// What the static path produced before any fallback decision.
struct Primary {
    html: String,
    status: Option<u16>,
    final_url: String,
    text: Result<String, String>,
}

impl Primary {
    fn into_result(self, fallback_reason: Option<String>) -> FetchResult {
        let (text, error) = match self.text {
            Ok(text) => (text, None),
            Err(e) => (String::new(), Some(e)),
        };
        FetchResult {
            success: !text.is_empty(),
            text,
            html: self.html,
            status_code: self.status,
            used_fallback: false,
            fallback_reason,
            final_url: self.final_url,
            error,
        }
    }
}

fn char_len(text: &str) -> usize {
    text.trim().chars().count()
}

/// Static fetch first, headless render only when the static text is
/// missing or too short.
pub struct ContentFetcher<P, X, R = NoRenderer>
where
    P: PageFetcher,
    X: TextExtractor,
    R: Renderer,
{
    fetcher: P,
    extractor: X,
    renderer: Option<R>,
    settings: FetchSettings,
}

impl<P, X> ContentFetcher<P, X, NoRenderer>
where
    P: PageFetcher,
    X: TextExtractor,
{
    /// A fetcher that never renders; fallbacks are reported as skipped.
    pub fn new(fetcher: P, extractor: X, settings: FetchSettings) -> Self {
        Self {
            fetcher,
            extractor,
            renderer: None,
            settings,
        }
    }
}

impl<P, X, R> ContentFetcher<P, X, R>
where
    P: PageFetcher,
    X: TextExtractor,
    R: Renderer,
{
    pub fn with_renderer(fetcher: P, extractor: X, renderer: Option<R>, settings: FetchSettings) -> Self {
        Self {
            fetcher,
            extractor,
            renderer,
            settings,
        }
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    /// Fetch `url` and extract its readable text. Never fails: problems are
    /// reported through `success`, `error` and `fallback_reason`.
    pub async fn fetch(&self, url: &str) -> FetchResult {
        let primary = self.fetch_static(url).await;

        let reason = match &primary.text {
            Err(e) => format!("primary fetch failed: {e}"),
            Ok(text) => {
                let len = char_len(text);
                if len >= self.settings.min_content_length {
                    tracing::info!(%url, chars = len, "Static fetch sufficient");
                    return primary.into_result(None);
                }
                format!(
                    "content too short: {} < {}",
                    len, self.settings.min_content_length
                )
            }
        };

        let renderer = match &self.renderer {
            Some(renderer) if self.settings.render_enabled => renderer,
            _ => {
                tracing::info!(%url, %reason, "Fallback skipped, no renderer");
                return primary.into_result(Some(format!(
                    "{reason}; fallback skipped: renderer unavailable"
                )));
            }
        };

        tracing::info!(%url, %reason, "Falling back to headless render");
        let page = match renderer.render(url).await {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(%url, error = %e, "Render failed, keeping static result");
                return primary.into_result(Some(format!("{reason}; fallback failed: {e}")));
            }
        };

        let mut text = self
            .extractor
            .extract(&page.html)
            .map(|t| t.trim().to_string())
            .unwrap_or_default();
        if char_len(&text) < self.settings.min_content_length
            && let Some(container) = &page.container_text
            && char_len(container) > char_len(&text)
        {
            text = container.trim().to_string();
        }

        if text.is_empty() {
            tracing::warn!(%url, "Render produced no text, keeping static result");
            return primary.into_result(Some(format!("{reason}; fallback produced no text")));
        }

        tracing::info!(%url, chars = char_len(&text), "Rendered fetch complete");
        FetchResult {
            success: true,
            text,
            html: page.html,
            status_code: page.status.or(primary.status),
            used_fallback: true,
            fallback_reason: Some(reason),
            final_url: if page.final_url.is_empty() {
                primary.final_url
            } else {
                page.final_url
            },
            error: None,
        }
    }

    async fn fetch_static(&self, url: &str) -> Primary {
        let response = match self.fetcher.get(url).await {
            Ok(response) => response,
            Err(e) => {
                return Primary {
                    html: String::new(),
                    status: None,
                    final_url: url.to_string(),
                    text: Err(e.to_string()),
                };
            }
        };

        let text = if response.is_success() {
            self.extractor
                .extract(&response.body)
                .map(|t| t.trim().to_string())
                .map_err(|e| e.to_string())
        } else {
            Err(format!("HTTP {}", response.status))
        };

        Primary {
            html: response.body,
            status: Some(response.status),
            final_url: response.final_url,
            text,
        }
    }
}
