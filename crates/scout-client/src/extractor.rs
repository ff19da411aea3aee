use std::sync::Arc;

use htmd::HtmlToMarkdown;
use scout_core::error::AppError;
use scout_core::traits::TextExtractor;
use scraper::{Html, Selector};

/// Containers that usually hold the main content, most specific first.
const CONTENT_SELECTORS: &[&str] = &[
    "main",
    "article",
    "[role=main]",
    ".post-content",
    ".entry-content",
    ".main-content",
    ".content",
    "#content",
];

/// Minimum text a container must hold before it is preferred over `<body>`.
const MIN_CONTAINER_CHARS: usize = 100;

/// Boilerplate-stripping text extractor built on scraper and htmd.
///
/// Picks the main content container when one stands out, then converts it
/// to Markdown with navigation, scripts and chrome removed.
pub struct HtmdExtractor {
    converter: Arc<HtmlToMarkdown>,
    selectors: Arc<Vec<Selector>>,
}

impl Clone for HtmdExtractor {
    fn clone(&self) -> Self {
        Self {
            converter: Arc::clone(&self.converter),
            selectors: Arc::clone(&self.selectors),
        }
    }
}

impl HtmdExtractor {
    pub fn new() -> Self {
        let converter = HtmlToMarkdown::builder()
            .skip_tags(vec![
                "script", "style", "nav", "footer", "header", "aside", "noscript", "iframe", "svg",
                "form", "button",
            ])
            .build();

        let selectors = CONTENT_SELECTORS
            .iter()
            .filter_map(|s| Selector::parse(s).ok())
            .collect();

        Self {
            converter: Arc::new(converter),
            selectors: Arc::new(selectors),
        }
    }

    /// Inner HTML of the first content container with real text, if any.
    fn main_container(&self, html: &str) -> Option<String> {
        let document = Html::parse_document(html);
        self.selectors.iter().find_map(|selector| {
            document.select(selector).find_map(|element| {
                let chars: usize = element
                    .text()
                    .map(|t| t.trim().chars().count())
                    .sum();
                (chars >= MIN_CONTAINER_CHARS).then(|| element.html())
            })
        })
    }
}

impl Default for HtmdExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Trims every line and collapses runs of blank lines to one.
fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if blank_run > 0 { "\n\n" } else { "\n" });
        }
        out.push_str(line);
        blank_run = 0;
    }
    out
}

impl TextExtractor for HtmdExtractor {
    fn extract(&self, html: &str) -> Result<String, AppError> {
        let source = self
            .main_container(html)
            .unwrap_or_else(|| html.to_string());
        let markdown = self
            .converter
            .convert(&source)
            .map_err(|e| AppError::ExtractionError(e.to_string()))?;
        Ok(normalize_whitespace(&markdown))
    }
}
