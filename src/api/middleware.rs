//! Request tagging and per-client rate limiting

use crate::auth::API_KEY_HEADER;
use crate::config::RateLimitConfig;
use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::{HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

const WINDOW: Duration = Duration::from_secs(60);

/// Checks between sweeps of idle client windows
const SWEEP_EVERY: u64 = 1024;

/// Id assigned to the current request, available as an extension
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Tag every request with a fresh UUID and echo it in `X-Request-Id`
pub async fn request_id(mut request: Request, next: Next) -> Response {
    let id = uuid::Uuid::new_v4().to_string();
    request.extensions_mut().insert(RequestId(id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Sliding one-minute window per API key, or per client address without one
pub struct RateLimiter {
    enabled: bool,
    requests_per_minute: usize,
    buckets: DashMap<String, VecDeque<Instant>>,
    checks: AtomicU64,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            requests_per_minute: config.requests_per_minute,
            buckets: DashMap::new(),
            checks: AtomicU64::new(0),
        }
    }

    /// Count a request against `key`; `false` once the window is full
    pub fn check(&self, key: &str, now: Instant) -> bool {
        if !self.enabled {
            return true;
        }

        if self.checks.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.sweep(now);
        }

        let mut bucket = self.buckets.entry(key.to_string()).or_default();
        while let Some(oldest) = bucket.front() {
            if now.duration_since(*oldest) > WINDOW {
                bucket.pop_front();
            } else {
                break;
            }
        }

        if bucket.len() >= self.requests_per_minute {
            return false;
        }
        bucket.push_back(now);
        true
    }

    /// Forget clients whose whole window has expired
    pub fn sweep(&self, now: Instant) {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| {
            bucket
                .back()
                .is_some_and(|latest| now.duration_since(*latest) <= WINDOW)
        });

        let dropped = before.saturating_sub(self.buckets.len());
        if dropped > 0 {
            tracing::debug!(dropped = dropped, "Dropped idle rate limit windows");
        }
    }

    /// Number of clients currently holding a window
    pub fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }
}

pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let key = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string());

    if !limiter.check(&key, Instant::now()) {
        tracing::warn!(path = %request.uri().path(), "Rate limit exceeded");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({"detail": "Rate limit exceeded"})),
        )
            .into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(enabled: bool, rpm: usize) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            enabled,
            requests_per_minute: rpm,
        })
    }

    #[test]
    fn test_window_fills_up() {
        let limiter = limiter(true, 3);
        let now = Instant::now();

        for _ in 0..3 {
            assert!(limiter.check("key", now));
        }
        assert!(!limiter.check("key", now));
        // Other clients have their own window
        assert!(limiter.check("other", now));
    }

    #[test]
    fn test_window_slides() {
        let limiter = limiter(true, 1);
        let start = Instant::now();

        assert!(limiter.check("key", start));
        assert!(!limiter.check("key", start + Duration::from_secs(30)));
        assert!(limiter.check("key", start + Duration::from_secs(61)));
    }

    #[test]
    fn test_sweep_forgets_idle_clients() {
        let limiter = limiter(true, 5);
        let start = Instant::now();

        for index in 0..100 {
            assert!(limiter.check(&format!("client-{index}"), start));
        }
        assert!(limiter.check("recent", start + Duration::from_secs(50)));
        assert_eq!(limiter.tracked_clients(), 101);

        limiter.sweep(start + Duration::from_secs(61));
        assert_eq!(limiter.tracked_clients(), 1);

        limiter.sweep(start + Duration::from_secs(111));
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[test]
    fn test_checks_sweep_periodically() {
        let limiter = limiter(true, 1);
        let start = Instant::now();
        let later = start + Duration::from_secs(120);

        assert!(limiter.check("stale", start));
        for index in 0..SWEEP_EVERY {
            limiter.check(&format!("fresh-{index}"), later);
        }

        assert!(limiter.tracked_clients() <= SWEEP_EVERY as usize);
        assert!(!limiter.buckets.contains_key("stale"));
    }

    #[test]
    fn test_disabled_limiter_admits_everything() {
        let limiter = limiter(false, 1);
        let now = Instant::now();
        for _ in 0..10 {
            assert!(limiter.check("key", now));
        }
    }
}
