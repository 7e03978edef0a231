//! Rate limiting middleware.
//!
//! In-memory fixed-window limiting per client IP, applied to the auth endpoints.

use super::client_ip;
use crate::config::AppConfig;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Configuration for rate limiting.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    /// Maximum requests per window.
    pub max_requests: u32,
    /// Window duration.
    pub window: Duration,
    /// Burst allowance (extra requests above limit before hard reject).
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window: Duration::from_secs(60),
            burst: 20,
        }
    }
}

impl From<&AppConfig> for RateLimitConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_requests: config.rate_limit_per_minute,
            window: Duration::from_secs(60),
            burst: config.rate_limit_burst,
        }
    }
}

/// Rate limiter state tracking requests per IP.
#[derive(Clone)]
pub struct RateLimitLayer {
    config: RateLimitConfig,
    state: Arc<Mutex<HashMap<IpAddr, RateLimitEntry>>>,
}

struct RateLimitEntry {
    count: u32,
    window_start: Instant,
}

#[derive(Debug, PartialEq, Eq)]
enum RateLimitResult {
    Allowed { remaining: u32 },
    BurstUsed { remaining: u32 },
    Exceeded { retry_after: Duration },
}

impl RateLimitLayer {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn check(&self, ip: IpAddr) -> RateLimitResult {
        self.check_at(ip, Instant::now())
    }

    fn check_at(&self, ip: IpAddr, now: Instant) -> RateLimitResult {
        let mut state = self.state.lock();
        let entry = state.entry(ip).or_insert(RateLimitEntry {
            count: 0,
            window_start: now,
        });

        if now.duration_since(entry.window_start) >= self.config.window {
            entry.count = 0;
            entry.window_start = now;
        }

        entry.count += 1;

        let limit = self.config.max_requests + self.config.burst;
        let remaining = limit.saturating_sub(entry.count);
        let reset_at = entry.window_start + self.config.window;

        if entry.count > limit {
            RateLimitResult::Exceeded {
                retry_after: reset_at.duration_since(now),
            }
        } else if entry.count > self.config.max_requests {
            RateLimitResult::BurstUsed { remaining }
        } else {
            RateLimitResult::Allowed { remaining }
        }
    }

    /// Periodic cleanup of old entries (call from a background task).
    pub fn cleanup(&self) -> usize {
        let mut state = self.state.lock();
        let now = Instant::now();
        let window = self.config.window;
        let before = state.len();
        state.retain(|_, entry| now.duration_since(entry.window_start) < window * 2);
        before - state.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.state.lock().len()
    }
}

/// Rejects with 429 once a client exceeds `max_requests + burst` in a window.
pub async fn rate_limit_middleware(
    connect_info: Option<ConnectInfo<SocketAddr>>,
    State(limiter): State<RateLimitLayer>,
    request: Request<Body>,
    next: Next,
) -> Response {
    // Without a known address every caller shares one bucket
    let ip = client_ip(request.headers(), connect_info.map(|ConnectInfo(addr)| addr))
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    match limiter.check(ip) {
        RateLimitResult::Allowed { .. } | RateLimitResult::BurstUsed { .. } => {
            next.run(request).await
        }
        RateLimitResult::Exceeded { retry_after } => {
            let retry_secs = retry_after.as_secs().max(1);
            warn!(
                ip = %ip,
                path = %request.uri().path(),
                retry_after_secs = retry_secs,
                "Rate limit exceeded"
            );

            let body = serde_json::json!({
                "error": "Too many requests. Please slow down.",
                "retryAfterSeconds": retry_secs,
            });
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, retry_secs.to_string())],
                axum::Json(body),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{middleware, routing::post, Router};
    use tower::ServiceExt;

    fn limiter(max_requests: u32, burst: u32) -> RateLimitLayer {
        RateLimitLayer::new(RateLimitConfig {
            max_requests,
            window: Duration::from_secs(60),
            burst,
        })
    }

    #[test]
    fn test_rate_limit_allows_burst_then_rejects() {
        let limiter = limiter(5, 3);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();

        for _ in 0..5 {
            assert!(matches!(limiter.check(ip), RateLimitResult::Allowed { .. }));
        }
        for _ in 0..3 {
            assert!(matches!(limiter.check(ip), RateLimitResult::BurstUsed { .. }));
        }
        assert!(matches!(limiter.check(ip), RateLimitResult::Exceeded { .. }));

        // Other clients have their own budget
        let other: IpAddr = "10.0.0.2".parse().unwrap();
        assert!(matches!(limiter.check(other), RateLimitResult::Allowed { .. }));
    }

    #[test]
    fn test_window_resets() {
        let limiter = limiter(1, 0);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        let t0 = Instant::now();

        assert!(matches!(limiter.check_at(ip, t0), RateLimitResult::Allowed { .. }));
        assert!(matches!(
            limiter.check_at(ip, t0 + Duration::from_secs(1)),
            RateLimitResult::Exceeded { .. }
        ));
        assert_eq!(
            limiter.check_at(ip, t0 + Duration::from_secs(61)),
            RateLimitResult::Allowed { remaining: 0 }
        );
    }

    #[tokio::test]
    async fn test_middleware_returns_429_json() {
        let app = Router::new()
            .route("/login", post(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(
                limiter(1, 0),
                rate_limit_middleware,
            ));

        let req = || {
            Request::builder()
                .method("POST")
                .uri("/login")
                .body(Body::empty())
                .unwrap()
        };
        assert_eq!(app.clone().oneshot(req()).await.unwrap().status(), StatusCode::OK);

        let res = app.oneshot(req()).await.unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(res.headers().contains_key(header::RETRY_AFTER));
        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["error"].as_str().unwrap().contains("Too many requests"));
    }
}
