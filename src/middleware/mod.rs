//! Middleware for observability and rate limiting.
//!
//! This module provides:
//! - Request logging with latency tracking
//! - Rate limiting per IP address

pub mod logging;
pub mod rate_limit;

pub use logging::request_logging;
pub use rate_limit::{rate_limit_middleware, RateLimitConfig, RateLimitLayer};

use axum::http::HeaderMap;
use std::net::{IpAddr, SocketAddr};

/// Client address for logging and rate limiting.
///
/// `X-Forwarded-For` is only honoured when the peer is a local reverse proxy or
/// the peer address is unknown.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
    let forwarded = || {
        headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|ip| ip.trim().parse::<IpAddr>().ok())
    };

    match peer {
        Some(addr) if addr.ip().is_loopback() => forwarded().or(Some(addr.ip())),
        Some(addr) => Some(addr.ip()),
        None => forwarded(),
    }
}
