//! Rotating pool of API credentials.
//!
//! Every token carries its own cooldown and disabled flag. Acquisition is
//! round-robin over the tokens that are currently usable:
//!
//! ```text
//! [a, b, c]  --acquire-->  a   [b, c, a]
//!            --acquire-->  b   [c, a, b]
//! ```
//!
//! All bookkeeping happens under one lock; callers make their network
//! calls after the lock is released.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Credential record as read from configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRecord {
    #[serde(alias = "token")]
    pub value: String,
    /// `"disabled"` loads the token disabled; anything else is active.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub remaining: Option<i64>,
    /// Unix seconds.
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub reset_time: Option<DateTime<Utc>>,
    /// Unix seconds.
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl TokenRecord {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            status: None,
            remaining: None,
            reset_time: None,
            cooldown_until: None,
        }
    }
}

/// Live state of one credential.
#[derive(Clone)]
pub struct TokenState {
    pub value: String,
    pub remaining: i64,
    pub reset_time: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
    /// Terminal until restart.
    pub disabled: bool,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl TokenState {
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        !self.disabled && self.cooldown_until.is_none_or(|until| now >= until)
    }

    pub fn masked(&self) -> String {
        mask_token(&self.value)
    }
}

impl fmt::Debug for TokenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenState")
            .field("value", &self.masked())
            .field("remaining", &self.remaining)
            .field("reset_time", &self.reset_time)
            .field("cooldown_until", &self.cooldown_until)
            .field("disabled", &self.disabled)
            .field("last_used_at", &self.last_used_at)
            .finish()
    }
}

impl From<TokenRecord> for TokenState {
    fn from(record: TokenRecord) -> Self {
        let disabled = record
            .status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("disabled"));
        Self {
            value: record.value,
            remaining: record.remaining.unwrap_or(-1),
            reset_time: record.reset_time,
            cooldown_until: record.cooldown_until,
            disabled,
            last_used_at: None,
        }
    }
}

/// Renders a token as `****` plus its last four characters.
pub fn mask_token(value: &str) -> String {
    let count = value.chars().count();
    if count <= 4 {
        return "****".to_string();
    }
    let tail: String = value.chars().skip(count - 4).collect();
    format!("****{tail}")
}

/// A token handed out by [`TokenPool::acquire`].
#[derive(Clone)]
pub struct TokenLease {
    pub value: String,
    pub masked: String,
}

impl fmt::Debug for TokenLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenLease")
            .field("masked", &self.masked)
            .finish()
    }
}

/// Serializable view of a token for status output.
#[derive(Debug, Clone, Serialize)]
pub struct TokenSnapshot {
    pub token: String,
    pub remaining: i64,
    pub reset_time: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub disabled: bool,
    pub available: bool,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Thread-safe rotating credential pool.
#[derive(Clone)]
pub struct TokenPool {
    inner: Arc<Mutex<VecDeque<TokenState>>>,
}

impl TokenPool {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_records(values.into_iter().map(TokenRecord::new))
    }

    pub fn from_records(records: impl IntoIterator<Item = TokenRecord>) -> Self {
        let tokens: VecDeque<TokenState> = records
            .into_iter()
            .filter(|r| !r.value.trim().is_empty())
            .map(TokenState::from)
            .collect();
        Self {
            inner: Arc::new(Mutex::new(tokens)),
        }
    }

    /// Acquires the inner mutex lock, recovering from poison if necessary.
    fn lock_inner(&self) -> std::sync::MutexGuard<'_, VecDeque<TokenState>> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned token pool mutex");
            poisoned.into_inner()
        })
    }

    pub fn len(&self) -> usize {
        self.lock_inner().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_inner().is_empty()
    }

    pub fn available_count(&self) -> usize {
        let now = Utc::now();
        self.lock_inner()
            .iter()
            .filter(|t| t.is_available(now))
            .count()
    }

    /// Returns the next usable token in rotation order and moves it to the
    /// tail. Sleeps until the earliest cooldown ends when nothing is usable.
    ///
    /// Fails with [`AppError::ExhaustedTokens`] once every token is disabled.
    pub async fn acquire(&self) -> Result<TokenLease, AppError> {
        loop {
            let wait = match self.try_acquire(Utc::now()) {
                Ok(lease) => return Ok(lease),
                Err(wait) => wait?,
            };

            tracing::info!(
                event = "waiting_for_token",
                wait_ms = wait.as_millis() as u64,
                "All tokens cooling down"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// One scan of the pool. `Err(Ok(wait))` means retry after `wait`.
    fn try_acquire(&self, now: DateTime<Utc>) -> Result<TokenLease, Result<Duration, AppError>> {
        let mut tokens = self.lock_inner();

        if let Some(pos) = tokens.iter().position(|t| t.is_available(now))
            && let Some(mut token) = tokens.remove(pos)
        {
            token.last_used_at = Some(now);
            let lease = TokenLease {
                value: token.value.clone(),
                masked: token.masked(),
            };
            tracing::debug!(
                event = "rotate_token",
                token = %lease.masked,
                remaining = token.remaining,
                "Token acquired"
            );
            tokens.push_back(token);
            return Ok(lease);
        }

        let earliest = tokens
            .iter()
            .filter(|t| !t.disabled)
            .filter_map(|t| t.cooldown_until)
            .min();

        match earliest {
            Some(until) => {
                let wait = (until - now).to_std().unwrap_or(Duration::ZERO);
                // Round up so the token is usable when we wake.
                Err(Ok(wait + Duration::from_millis(1)))
            }
            None => {
                let total = tokens.len();
                let disabled = tokens.iter().filter(|t| t.disabled).count();
                Err(Err(AppError::ExhaustedTokens { disabled, total }))
            }
        }
    }

    /// Excludes a token from selection until `until`.
    pub fn cooldown(&self, value: &str, until: DateTime<Utc>) {
        let mut tokens = self.lock_inner();
        if let Some(token) = tokens.iter_mut().find(|t| t.value == value) {
            token.cooldown_until = Some(until);
            tracing::warn!(
                event = "rate_limit_hit",
                token = %token.masked(),
                cooldown_until = %until,
                "Token cooling down"
            );
        }
    }

    /// Permanently removes a token from rotation.
    pub fn disable(&self, value: &str) {
        let mut tokens = self.lock_inner();
        if let Some(token) = tokens.iter_mut().find(|t| t.value == value) {
            token.disabled = true;
            tracing::error!(
                event = "token_disabled",
                token = %token.masked(),
                "Token rejected, disabled"
            );
        }
    }

    /// Records the rate-limit headers of a response. When the upstream
    /// reports zero remaining calls the token cools down until the reset
    /// instant plus one second. Returns true if that cooldown was applied.
    pub fn update_limits(
        &self,
        value: &str,
        remaining: Option<i64>,
        reset_time: Option<DateTime<Utc>>,
    ) -> bool {
        let mut tokens = self.lock_inner();
        let Some(token) = tokens.iter_mut().find(|t| t.value == value) else {
            return false;
        };

        if let Some(remaining) = remaining {
            token.remaining = remaining;
        }
        if reset_time.is_some() {
            token.reset_time = reset_time;
        }

        match (remaining, token.reset_time) {
            (Some(0), Some(reset)) => {
                let until = reset + TimeDelta::seconds(1);
                token.cooldown_until = Some(until);
                tracing::warn!(
                    event = "rate_limit_hit",
                    token = %token.masked(),
                    cooldown_until = %until,
                    "Token quota exhausted"
                );
                true
            }
            _ => false,
        }
    }

    /// Reset instant last reported for a token, if any.
    pub fn reset_time(&self, value: &str) -> Option<DateTime<Utc>> {
        self.lock_inner()
            .iter()
            .find(|t| t.value == value)
            .and_then(|t| t.reset_time)
    }

    /// Masked copy of every token in rotation order.
    pub fn snapshot(&self) -> Vec<TokenSnapshot> {
        let now = Utc::now();
        self.lock_inner()
            .iter()
            .map(|t| TokenSnapshot {
                token: t.masked(),
                remaining: t.remaining,
                reset_time: t.reset_time,
                cooldown_until: t.cooldown_until,
                disabled: t.disabled,
                available: t.is_available(now),
                last_used_at: t.last_used_at,
            })
            .collect()
    }
}

impl fmt::Debug for TokenPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPool")
            .field("tokens", &self.len())
            .finish()
    }
}
