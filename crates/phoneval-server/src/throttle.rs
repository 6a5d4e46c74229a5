//! Per-IP throttling for the public demo endpoint

use axum::http::HeaderMap;
use governor::{clock::DefaultClock, DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Requests per minute per client IP
pub const DEMO_REQUESTS_PER_MINUTE: u32 = 5;

/// Drop idle keys every N checks
const SHRINK_INTERVAL: u64 = 1000;

/// Client IP from proxy headers: first `x-forwarded-for` hop, then
/// `x-real-ip`, else `unknown`
pub fn client_ip(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
    };

    forwarded.or_else(real_ip).unwrap_or("unknown").to_string()
}

/// Keyed in-process limiter
#[derive(Clone)]
pub struct DemoRateLimiter {
    limiter: Arc<DefaultKeyedRateLimiter<String>>,
    checks: Arc<AtomicU64>,
}

impl Default for DemoRateLimiter {
    fn default() -> Self {
        Self::per_minute(DEMO_REQUESTS_PER_MINUTE)
    }
}

impl DemoRateLimiter {
    pub fn per_minute(max: u32) -> Self {
        let max = NonZeroU32::new(max).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(max))),
            checks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// `Err(retry_after_secs)` when `ip` is over its quota
    pub fn check(&self, ip: &str) -> Result<(), u64> {
        let count = self.checks.fetch_add(1, Ordering::Relaxed);
        if count > 0 && count % SHRINK_INTERVAL == 0 {
            self.limiter.retain_recent();
        }

        self.limiter.check_key(&ip.to_string()).map_err(|not_until| {
            let now = governor::clock::Clock::now(&DefaultClock::default());
            not_until.wait_time_from(now).as_secs().max(1)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_client_ip_precedence() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), "unknown");

        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(client_ip(&headers), "10.0.0.2");

        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        assert_eq!(client_ip(&headers), "203.0.113.7");
    }

    #[test]
    fn test_sixth_request_in_minute_is_throttled() {
        let limiter = DemoRateLimiter::default();
        for _ in 0..5 {
            assert!(limiter.check("203.0.113.7").is_ok());
        }
        let retry = limiter.check("203.0.113.7").unwrap_err();
        assert!(retry >= 1);

        // Other clients are unaffected
        assert!(limiter.check("198.51.100.1").is_ok());
    }
}
