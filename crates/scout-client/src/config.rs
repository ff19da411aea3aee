use std::path::Path;
use std::time::Duration;

use scout_core::content::FetchSettings;
use scout_core::error::AppError;
use scout_core::token_pool::TokenRecord;
use serde::Deserialize;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Configuration of the GitHub API client and its credentials.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base: String,
    pub tokens: Vec<TokenRecord>,
    /// Fixed sleep before every request.
    pub request_pacing: Duration,
    /// Cooldown applied on 403/429 when the response carries no reset hint.
    pub rate_limit_backoff: Duration,
    pub http_timeout: Duration,
}

impl ClientConfig {
    /// Reads `GITHUB_API_BASE`, `SCOUT_TOKENS_FILE` or `GITHUB_TOKENS`,
    /// `SCOUT_REQUEST_PACING_MS`, `SCOUT_RATE_LIMIT_BACKOFF_SECS` and
    /// `SCOUT_HTTP_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, AppError> {
        let api_base = std::env::var("GITHUB_API_BASE")
            .unwrap_or_else(|_| DEFAULT_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        let tokens = match std::env::var("SCOUT_TOKENS_FILE") {
            Ok(path) => load_token_file(Path::new(&path))?,
            Err(_) => std::env::var("GITHUB_TOKENS")
                .map(|list| parse_token_list(&list))
                .unwrap_or_default(),
        };

        Ok(Self {
            api_base,
            tokens,
            request_pacing: Duration::from_millis(env_u64("SCOUT_REQUEST_PACING_MS", 100)?),
            rate_limit_backoff: Duration::from_secs(env_u64("SCOUT_RATE_LIMIT_BACKOFF_SECS", 60)?),
            http_timeout: Duration::from_secs(env_u64("SCOUT_HTTP_TIMEOUT_SECS", 30)?),
        })
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            tokens: Vec::new(),
            request_pacing: Duration::from_millis(100),
            rate_limit_backoff: Duration::from_secs(60),
            http_timeout: Duration::from_secs(30),
        }
    }
}

/// Tuning of the homepage fetch.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub min_content_length: usize,
    pub browser_enabled: bool,
    pub browser_timeout: Duration,
}

impl FetchConfig {
    /// Reads `SCOUT_MIN_CONTENT_LENGTH`, `SCOUT_BROWSER_ENABLED` and
    /// `SCOUT_BROWSER_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, AppError> {
        let browser_enabled = match std::env::var("SCOUT_BROWSER_ENABLED") {
            Ok(v) => parse_bool("SCOUT_BROWSER_ENABLED", &v)?,
            Err(_) => true,
        };
        Ok(Self {
            min_content_length: env_u64("SCOUT_MIN_CONTENT_LENGTH", 200)? as usize,
            browser_enabled,
            browser_timeout: Duration::from_secs(env_u64("SCOUT_BROWSER_TIMEOUT_SECS", 30)?),
        })
    }

    pub fn settings(&self) -> FetchSettings {
        FetchSettings {
            min_content_length: self.min_content_length,
            render_enabled: self.browser_enabled,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            min_content_length: 200,
            browser_enabled: true,
            browser_timeout: Duration::from_secs(30),
        }
    }
}

fn env_u64(name: &str, default: u64) -> Result<u64, AppError> {
    match std::env::var(name) {
        Ok(v) => v
            .trim()
            .parse()
            .map_err(|_| AppError::ConfigError(format!("{name} must be a non-negative integer, got '{v}'"))),
        Err(_) => Ok(default),
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, AppError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AppError::ConfigError(format!(
            "{name} must be a boolean, got '{value}'"
        ))),
    }
}

/// Comma-separated token values.
pub fn parse_token_list(list: &str) -> Vec<TokenRecord> {
    list.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(TokenRecord::new)
        .collect()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TokenFile {
    Bare(Vec<TokenRecord>),
    Wrapped { tokens: Vec<TokenRecord> },
}

/// Loads credential records from a JSON file: either an array of records
/// or `{"tokens": [...]}`.
pub fn load_token_file(path: &Path) -> Result<Vec<TokenRecord>, AppError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        AppError::ConfigError(format!("cannot read token file {}: {e}", path.display()))
    })?;
    let file: TokenFile = serde_json::from_str(&raw).map_err(|e| {
        AppError::ConfigError(format!("invalid token file {}: {e}", path.display()))
    })?;
    Ok(match file {
        TokenFile::Bare(tokens) | TokenFile::Wrapped { tokens } => tokens,
    })
}
