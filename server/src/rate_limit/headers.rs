use axum::http::{HeaderMap, HeaderName, HeaderValue};

use super::RateLimitDecision;

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";
pub const X_RATELIMIT_RESET_TIME: &str = "x-ratelimit-reset-time";
pub const RETRY_AFTER: &str = "retry-after";

/// Quota headers for HTTP callers. `Retry-After` is present only on denial.
pub fn rate_limit_headers(decision: &RateLimitDecision) -> HeaderMap {
    let mut headers = HeaderMap::new();
    insert(&mut headers, X_RATELIMIT_LIMIT, decision.limit.to_string());
    insert(
        &mut headers,
        X_RATELIMIT_REMAINING,
        decision.remaining.to_string(),
    );
    insert(
        &mut headers,
        X_RATELIMIT_RESET,
        decision.reset_at.timestamp().to_string(),
    );
    insert(
        &mut headers,
        X_RATELIMIT_RESET_TIME,
        decision.reset_at.to_rfc3339(),
    );
    if let Some(secs) = decision.retry_after_secs {
        insert(&mut headers, RETRY_AFTER, secs.to_string());
    }
    headers
}

fn insert(headers: &mut HeaderMap, name: &'static str, value: String) {
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn denial_carries_retry_after() {
        let decision = RateLimitDecision {
            allowed: false,
            limit: 10,
            remaining: 0,
            reset_at: Utc::now(),
            retry_after_secs: Some(42),
            message: "slow down".to_string(),
        };
        let headers = rate_limit_headers(&decision);
        assert_eq!(headers.get(X_RATELIMIT_LIMIT).unwrap(), "10");
        assert_eq!(headers.get(X_RATELIMIT_REMAINING).unwrap(), "0");
        assert_eq!(headers.get(RETRY_AFTER).unwrap(), "42");
        assert!(headers.contains_key(X_RATELIMIT_RESET));
        assert!(headers.contains_key(X_RATELIMIT_RESET_TIME));
    }

    #[test]
    fn allowed_has_no_retry_after() {
        let decision = RateLimitDecision {
            allowed: true,
            limit: 10,
            remaining: 9,
            reset_at: Utc::now(),
            retry_after_secs: None,
            message: String::new(),
        };
        let headers = rate_limit_headers(&decision);
        assert!(!headers.contains_key(RETRY_AFTER));
        assert_eq!(headers.get(X_RATELIMIT_REMAINING).unwrap(), "9");
    }
}
