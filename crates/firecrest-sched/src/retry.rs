//! Rate-limit retry policy and `Retry-After` parsing.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::http::Headers;

/// Wait used when a 429 carries no usable reset header.
pub const DEFAULT_RESET: Duration = Duration::from_secs(10);

/// Longest wait a reset header is allowed to impose.
pub const MAX_RESET: Duration = Duration::from_secs(86_400);

/// How many times a 429 response is retried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` retries until the service answers with something else.
    pub max_retries: Option<u32>,
}

impl RetryPolicy {
    /// Retry until a non-429 status is observed.
    pub fn unbounded() -> Self {
        Self { max_retries: None }
    }

    /// Retry at most `max_retries` times, then return the 429 as is.
    pub fn bounded(max_retries: u32) -> Self {
        Self {
            max_retries: Some(max_retries),
        }
    }

    /// Whether another attempt is allowed after `retries` resends.
    pub fn allows(&self, retries: u32) -> bool {
        self.max_retries.is_none_or(|max| retries < max)
    }
}

/// Parse a `Retry-After` style value.
///
/// Accepts delta-seconds or an HTTP-date. Negative deltas and dates in the
/// past resolve to zero; anything beyond [`MAX_RESET`] is capped.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    let wait = if let Ok(seconds) = value.parse::<i64>() {
        Duration::from_secs(seconds.max(0).unsigned_abs())
    } else {
        let date = DateTime::parse_from_rfc2822(value).ok()?;
        let delta = date.with_timezone(&Utc) - Utc::now();
        delta.to_std().unwrap_or(Duration::ZERO)
    };
    Some(wait.min(MAX_RESET))
}

/// Resolve how long to back off after a 429.
///
/// `Retry-After` wins over `RateLimit-Reset`; a missing or unparsable value
/// falls back to [`DEFAULT_RESET`].
pub fn resolve_backoff(headers: &Headers) -> Duration {
    let Some(raw) = headers
        .get("Retry-After")
        .or_else(|| headers.get("RateLimit-Reset"))
    else {
        return DEFAULT_RESET;
    };

    parse_retry_after(raw).unwrap_or_else(|| {
        warn!(
            "Could not parse rate limit reset value {raw:?}, waiting {}s",
            DEFAULT_RESET.as_secs()
        );
        DEFAULT_RESET
    })
}
