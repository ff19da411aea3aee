use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::network::{EnableParams, SetBlockedUrLsParams};
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use scout_core::error::AppError;
use scout_core::models::RenderedPage;
use scout_core::traits::Renderer;

/// URL patterns blocked while rendering: images, media, fonts, stylesheets.
const BLOCKED_PATTERNS: &[&str] = &[
    "*.png", "*.jpg", "*.jpeg", "*.gif", "*.webp", "*.svg", "*.ico", "*.mp4", "*.webm", "*.mp3",
    "*.woff", "*.woff2", "*.ttf", "*.otf", "*.css",
];

/// Strips page chrome, then returns the innerText of the first content
/// container holding more than 100 characters, else the whole body.
const CONTAINER_TEXT_JS: &str = r#"
(() => {
  document.querySelectorAll('script, style, nav, header, footer, .sidebar, .menu')
    .forEach(el => el.remove());
  const selectors = ['main', 'article', '.content', '.main-content', '.post-content', '.entry-content', 'body'];
  for (const sel of selectors) {
    const el = document.querySelector(sel);
    if (el && el.innerText && el.innerText.trim().length > 100) {
      return el.innerText.trim();
    }
  }
  return document.body ? document.body.innerText.trim() : '';
})()
"#;

/// Headless-Chromium renderer for pages whose content only appears after
/// JavaScript runs.
///
/// One browser process is shared by every clone; each render opens a tab
/// and closes it afterwards.
#[derive(Clone)]
pub struct ChromiumRenderer {
    browser: Arc<Browser>,
    timeout: Duration,
    settle: Duration,
    idle_timeout: Duration,
}

impl ChromiumRenderer {
    /// Launches Chromium with a 30 s navigation timeout.
    pub async fn launch() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(30)).await
    }

    pub async fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let mut builder = BrowserConfig::builder().no_sandbox().disable_default_args();

        // Snap wrappers drop unknown flags and break headless mode, so
        // prefer a real binary when one is installed.
        if let Some(bin) = find_chrome_binary() {
            tracing::info!(binary = %bin.display(), "Using Chrome binary");
            builder = builder.chrome_executable(bin);
        }

        let config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--no-first-run")
            .arg("--mute-audio")
            .build()
            .map_err(|e| AppError::BrowserUnavailable(format!("config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::BrowserUnavailable(format!("launch failed: {e}")))?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
            timeout,
            settle: Duration::from_secs(2),
            idle_timeout: Duration::from_secs(5),
        })
    }

    async fn render_page(&self, page: &Page, url: &str) -> Result<RenderedPage, AppError> {
        page.execute(EnableParams::default())
            .await
            .map_err(|e| AppError::ExtractionError(format!("network enable failed: {e}")))?;
        let blocked = SetBlockedUrLsParams::new(
            BLOCKED_PATTERNS.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
        );
        if let Err(e) = page.execute(blocked).await {
            tracing::debug!(error = %e, "Resource blocking unavailable");
        }

        page.goto(url)
            .await
            .map_err(|e| AppError::NetworkError(format!("navigation to {url} failed: {e}")))?;

        tokio::time::sleep(self.settle).await;
        // Late XHR-driven navigations; not finishing in time is fine.
        let _ = tokio::time::timeout(self.idle_timeout, page.wait_for_navigation()).await;

        let html = page
            .content()
            .await
            .map_err(|e| AppError::ExtractionError(format!("failed to read content: {e}")))?;

        let container_text = match page.evaluate(CONTAINER_TEXT_JS).await {
            Ok(result) => result
                .into_value::<String>()
                .ok()
                .filter(|t| !t.trim().is_empty()),
            Err(e) => {
                tracing::debug!(error = %e, "Container text evaluation failed");
                None
            }
        };

        let final_url = page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| url.to_string());

        Ok(RenderedPage {
            html,
            container_text,
            status: None,
            final_url,
        })
    }
}

fn find_chrome_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    [
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ]
    .iter()
    .map(PathBuf::from)
    .find(|p| p.exists())
}

impl Renderer for ChromiumRenderer {
    async fn render(&self, url: &str) -> Result<RenderedPage, AppError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| AppError::BrowserUnavailable(format!("failed to open tab: {e}")))?;

        let result = tokio::time::timeout(self.timeout, self.render_page(&page, url)).await;
        let _ = page.close().await;

        match result {
            Ok(inner) => inner,
            Err(_) => Err(AppError::Timeout(self.timeout.as_secs())),
        }
    }
}
