//! Authentication Middleware
//! Mission: Protect API endpoints with JWT validation

use crate::auth::{jwt::JwtHandler, models::Claims, user_store::UserStore};
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use axum_extra::extract::cookie::CookieJar;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "session";

/// What the auth middleware needs: the token signer and the account table.
#[derive(Clone)]
pub struct SessionAuth {
    pub jwt: Arc<JwtHandler>,
    pub users: Arc<UserStore>,
}

/// Auth middleware that validates JWT tokens.
///
/// A valid signature is not enough: the account must still exist with the role
/// and company the token was issued for, so deleted or re-scoped users lose
/// access immediately.
pub async fn auth_middleware(
    State(session): State<SessionAuth>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = find_token(&req).ok_or(AuthError::MissingToken)?;

    let claims = session
        .jwt
        .validate_token(&token)
        .map_err(|_| AuthError::InvalidToken)?;

    let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;
    let user = session
        .users
        .get_user(&user_id)
        .map_err(|e| {
            error!("Session lookup failed: {:#}", e);
            AuthError::Unavailable
        })?
        .ok_or(AuthError::InvalidToken)?;
    if user.role != claims.role || user.company_id != claims.company_id {
        debug!(user_id = %user_id, "Session no longer matches the account");
        return Err(AuthError::InvalidToken);
    }

    // Add claims to request extensions so handlers can access them
    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

/// Admin gate. Must run after `auth_middleware`.
pub async fn require_admin(req: Request, next: Next) -> Result<Response, AuthError> {
    let claims = req
        .extensions()
        .get::<Claims>()
        .ok_or(AuthError::MissingToken)?;

    if !claims.is_admin() {
        return Err(AuthError::Forbidden);
    }

    Ok(next.run(req).await)
}

/// Token lookup order: `token` query param (WebSockets), `Authorization: Bearer`,
/// then the session cookie.
fn find_token(req: &Request) -> Option<String> {
    let token_from_query = req.uri().query().and_then(|query| {
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix("token="))
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
    });

    let token_from_header = || {
        req.headers()
            .get("Authorization")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .map(|t| t.trim().to_string())
    };

    let token_from_cookie = || {
        CookieJar::from_headers(req.headers())
            .get(SESSION_COOKIE)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty())
    };

    token_from_query
        .or_else(token_from_header)
        .or_else(token_from_cookie)
}

/// Auth error types
#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
    Forbidden,
    Unavailable,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "Missing authorization token"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid or expired token"),
            AuthError::Forbidden => (StatusCode::FORBIDDEN, "Insufficient permissions"),
            AuthError::Unavailable => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
