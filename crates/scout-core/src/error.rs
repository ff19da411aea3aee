use thiserror::Error;

/// Application-wide error types for Scout.
#[derive(Error, Debug)]
pub enum AppError {
    /// Timeout or connection failure talking to an upstream.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Upstream refused the request because a rate limit was hit
    /// (429, or 401/403 carrying rate-limit indicators).
    #[error("Rate limited (HTTP {status})")]
    RateLimited { status: u16 },

    /// Credential rejected for a reason other than rate limiting.
    #[error("Authentication failed for token {token}")]
    AuthError { token: String },

    /// Response body could not be decoded.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Upstream answered 404.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Upstream answered 5xx.
    #[error("Upstream server error (HTTP {status})")]
    ServerError { status: u16 },

    /// Any other non-success HTTP status that is not worth retrying.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Every attempt of a retried request failed.
    #[error("Exhausted {attempts} attempts, last error: {last}")]
    ExhaustedRetries { attempts: u32, last: Box<AppError> },

    /// No credential can ever become available again.
    #[error("No usable token: {disabled} of {total} tokens disabled")]
    ExhaustedTokens { disabled: usize, total: usize },

    /// Static or rendered text extraction failed.
    #[error("Extraction error: {0}")]
    ExtractionError(String),

    /// Headless browser missing or failed to start.
    #[error("Browser unavailable: {0}")]
    BrowserUnavailable(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Missing or malformed configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_)
            | AppError::Timeout(_)
            | AppError::RateLimited { .. }
            | AppError::ServerError { .. }
            | AppError::AuthError { .. } => true,
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            _ => false,
        }
    }

    /// Returns true when no task can make progress until an operator
    /// intervenes; such an error aborts a whole runner round instead of
    /// failing a single task.
    pub fn is_operator_error(&self) -> bool {
        matches!(self, AppError::ExhaustedTokens { .. })
    }
}
