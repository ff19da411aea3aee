use scout_core::error::AppError;

/// Connection settings of the PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    /// Reads `DATABASE_URL` (required) and `DATABASE_MAX_CONNECTIONS`
    /// (default 5, at least 1).
    pub fn from_env() -> Result<Self, AppError> {
        let url = std::env::var("DATABASE_URL")
            .map_err(|_| AppError::ConfigError("DATABASE_URL not set".into()))?;

        let max_connections = match std::env::var("DATABASE_MAX_CONNECTIONS") {
            Err(_) => 5,
            Ok(raw) => parse_max_connections(&raw)?,
        };

        Ok(Self {
            url,
            max_connections,
        })
    }
}

fn parse_max_connections(raw: &str) -> Result<u32, AppError> {
    let parsed: u32 = raw.trim().parse().map_err(|_| {
        AppError::ConfigError(format!(
            "DATABASE_MAX_CONNECTIONS must be a positive integer, got '{raw}'"
        ))
    })?;
    if parsed == 0 {
        return Err(AppError::ConfigError(
            "DATABASE_MAX_CONNECTIONS must be at least 1".into(),
        ));
    }
    Ok(parsed)
}
