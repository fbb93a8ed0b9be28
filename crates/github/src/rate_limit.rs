//! Rate-limit detection for GitHub responses.
//!
//! GitHub signals two kinds of limit, both as `403` or `429`:
//!
//! - **primary**: the hourly quota is spent; `x-ratelimit-remaining` is `0`
//!   and `x-ratelimit-reset` carries the epoch second the quota refills.
//! - **secondary**: abuse protection; a `retry-after` header gives the wait
//!   in seconds, or only the body mentions the secondary rate limit.
//!
//! Anything else with those statuses (e.g. missing permissions) is a plain
//! API error and is never retried.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;

/// Wait used for a secondary limit that names no retry time.
pub const DEFAULT_SECONDARY_WAIT: Duration = Duration::from_secs(60);

/// Retry behaviour for rate-limited requests.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    /// Additional attempts after the first rate-limited response.
    pub max_retries: u32,
    /// Upper bound on any single wait.
    pub max_wait: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            max_wait: Duration::from_secs(3600),
        }
    }
}

/// A detected rate limit and how long the host asked us to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimit {
    Primary(Duration),
    Secondary(Duration),
}

impl RateLimit {
    pub fn wait(&self) -> Duration {
        match self {
            Self::Primary(d) | Self::Secondary(d) => *d,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Primary(_) => "primary",
            Self::Secondary(_) => "secondary",
        }
    }
}

/// Classify a response as rate limited, or `None` if it is not.
pub fn classify(
    status: u16,
    headers: &HeaderMap,
    body: &str,
    now: DateTime<Utc>,
) -> Option<RateLimit> {
    if status != 403 && status != 429 {
        return None;
    }

    if let Some(secs) = header_u64(headers, "retry-after") {
        return Some(RateLimit::Secondary(Duration::from_secs(secs)));
    }

    if headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        == Some("0")
    {
        let wait = header_u64(headers, "x-ratelimit-reset")
            .map(|reset| {
                let secs = reset as i64 - now.timestamp();
                Duration::from_secs(secs.max(0) as u64)
            })
            .unwrap_or(DEFAULT_SECONDARY_WAIT);
        return Some(RateLimit::Primary(wait));
    }

    if body.to_ascii_lowercase().contains("secondary rate limit") {
        return Some(RateLimit::Secondary(DEFAULT_SECONDARY_WAIT));
    }

    None
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use reqwest::header::HeaderValue;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn primary_limit_waits_until_reset() {
        let h = headers(&[
            ("x-ratelimit-remaining", "0"),
            ("x-ratelimit-reset", "1700000042"),
        ]);
        assert_eq!(
            classify(403, &h, "", now()),
            Some(RateLimit::Primary(Duration::from_secs(42)))
        );
    }

    #[test]
    fn reset_in_the_past_waits_zero() {
        let h = headers(&[("x-ratelimit-remaining", "0"), ("x-ratelimit-reset", "1")]);
        assert_eq!(classify(429, &h, "", now()).map(|l| l.wait()), Some(Duration::ZERO));
    }

    #[test]
    fn retry_after_header_is_secondary() {
        let h = headers(&[("retry-after", "7")]);
        assert_eq!(
            classify(403, &h, "", now()),
            Some(RateLimit::Secondary(Duration::from_secs(7)))
        );
    }

    #[test]
    fn secondary_body_without_header_uses_default() {
        let body = r#"{"message":"You have exceeded a secondary rate limit."}"#;
        assert_eq!(
            classify(403, &HeaderMap::new(), body, now()),
            Some(RateLimit::Secondary(DEFAULT_SECONDARY_WAIT))
        );
    }

    #[test]
    fn permission_errors_are_not_rate_limits() {
        let h = headers(&[("x-ratelimit-remaining", "4999")]);
        assert_eq!(classify(403, &h, r#"{"message":"Forbidden"}"#, now()), None);
    }

    #[test]
    fn other_statuses_are_ignored() {
        let h = headers(&[("retry-after", "1")]);
        assert_eq!(classify(500, &h, "", now()), None);
        assert_eq!(classify(200, &h, "", now()), None);
    }
}
