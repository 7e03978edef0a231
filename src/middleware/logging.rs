//! Request logging middleware.
//!
//! Logs every HTTP request with method, path, status code, and latency.

use super::client_ip;
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::Request,
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{info, warn, Instrument};

/// Logs at INFO for completed requests and WARN for 5xx.
///
/// Works with or without `ConnectInfo`; the client address is left out when the
/// server was not started with connect info (router tests).
pub async fn request_logging(
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    // Health checks hit this constantly
    if path == "/health" {
        return next.run(request).await;
    }

    let ip = client_ip(request.headers(), connect_info.map(|ConnectInfo(addr)| addr));
    let client_ip = ip.map(|ip| ip.to_string()).unwrap_or_else(|| "-".to_string());
    let start = Instant::now();

    let span = tracing::info_span!(
        "http_request",
        method = %method,
        path = %path,
        client_ip = %client_ip,
        status = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
    );
    let response = next.run(request).instrument(span.clone()).await;

    let latency = start.elapsed();
    let status = response.status().as_u16();
    span.record("status", status);
    span.record("latency_ms", latency.as_millis() as u64);
    let _guard = span.enter();

    if status >= 500 {
        warn!(
            method = %method,
            path = %path,
            status = status,
            latency_ms = latency.as_millis(),
            client_ip = %client_ip,
            "Request failed (5xx)"
        );
    } else if status >= 400 {
        info!(
            method = %method,
            path = %path,
            status = status,
            latency_ms = latency.as_millis(),
            client_ip = %client_ip,
            "Request completed (4xx)"
        );
    } else {
        info!(
            method = %method,
            path = %path,
            status = status,
            latency_ms = latency.as_millis(),
            "Request completed"
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, middleware, routing::get, Router};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_logging_passes_response_through() {
        let app = Router::new()
            .route("/ok", get(|| async { "fine" }))
            .route("/health", get(|| async { "up" }))
            .layer(middleware::from_fn(request_logging));

        for path in ["/ok", "/health"] {
            let res = app
                .clone()
                .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        }
    }
}
