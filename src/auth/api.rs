//! Authentication API Endpoints
//! Mission: Provide sign-up, login, password recovery and user management endpoints

use crate::app::AppState;
use crate::auth::{
    middleware::SESSION_COOKIE,
    models::{
        Claims, CreateUserRequest, ForgotPasswordRequest, LoginRequest, LoginResponse, NewUser,
        RegisterRequest, ResetPasswordRequest, User, UserResponse, UserRole,
    },
    user_store::AccountError,
};
use crate::error::{ApiError, ApiResult};
use crate::mailer::{self, password_reset_mail, welcome_mail};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

const RESET_TOKEN_TTL: Duration = Duration::from_secs(3600);

impl From<AccountError> for ApiError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::EmailTaken => ApiError::Conflict(err.to_string()),
            AccountError::Storage(e) => ApiError::Internal(e),
            AccountError::InvalidEmail
            | AccountError::WeakPassword
            | AccountError::MissingCompany
            | AccountError::ResetToken(_) => ApiError::BadRequest(err.to_string()),
        }
    }
}

/// Lives as long as the JWT inside it; `Secure` once the site is served over https.
fn session_cookie(token: String, ttl: Duration, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(cookie::time::Duration::seconds(ttl.as_secs() as i64))
        .build()
}

fn session_cookie_for(state: &AppState, token: String) -> Cookie<'static> {
    let secure = state
        .config
        .public_base_url
        .trim()
        .to_ascii_lowercase()
        .starts_with("https://");
    session_cookie(token, state.config.session_ttl(), secure)
}

fn issue_session(state: &AppState, user: &User) -> ApiResult<LoginResponse> {
    let (token, expires_in) = state.jwt.generate_token(user)?;
    Ok(LoginResponse {
        token,
        expires_in,
        user: UserResponse::from_user(user),
    })
}

/// Company sign-up - POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, CookieJar, Json<LoginResponse>)> {
    if payload.company_name.trim().is_empty() {
        return Err(ApiError::bad_request("Company name is required"));
    }
    if payload.name.trim().is_empty() {
        return Err(ApiError::bad_request("Name is required"));
    }

    let user = state.users.register_company(
        &payload.company_name,
        &payload.name,
        &payload.email,
        &payload.password,
    )?;

    let session = issue_session(&state, &user)?;
    let jar = jar.add(session_cookie_for(&state, session.token.clone()));
    Ok((StatusCode::CREATED, jar, Json(session)))
}

/// Login endpoint - POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<(CookieJar, Json<LoginResponse>)> {
    let Some(user) = state
        .users
        .verify_credentials(&payload.email, &payload.password)?
    else {
        warn!("Failed login attempt: {}", payload.email.trim());
        return Err(ApiError::Unauthorized(
            "Invalid email or password".to_string(),
        ));
    };

    let session = issue_session(&state, &user)?;
    info!("Login successful: {} ({})", user.email, user.role.as_str());

    let jar = jar.add(session_cookie_for(&state, session.token.clone()));
    Ok((jar, Json(session)))
}

/// Logout - POST /api/auth/logout
pub async fn logout(jar: CookieJar) -> (CookieJar, StatusCode) {
    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/").build());
    (jar, StatusCode::NO_CONTENT)
}

/// Current user - GET /api/auth/me
pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<UserResponse>> {
    let id = Uuid::parse_str(&claims.sub)
        .map_err(|_| ApiError::Unauthorized("Invalid session".to_string()))?;
    let user = state
        .users
        .get_user(&id)?
        .ok_or_else(|| ApiError::Unauthorized("Account no longer exists".to_string()))?;
    Ok(Json(UserResponse::from_user(&user)))
}

/// Request a reset link - POST /api/auth/forgot-password
///
/// Always answers 200 so the endpoint cannot be used to enumerate accounts.
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> ApiResult<Json<Value>> {
    if let Some(user) = state.users.get_user_by_email(&payload.email)? {
        let token = state.users.issue_reset_token(&user.id, RESET_TOKEN_TTL)?;
        let reset_url = format!(
            "{}/reset-password?token={}",
            state.config.public_base_url.trim_end_matches('/'),
            token
        );
        mailer::dispatch(
            state.mailer.clone(),
            password_reset_mail(&user.email, &reset_url),
        );
        info!("Password reset requested for {}", user.email);
    }

    Ok(Json(json!({
        "message": "If the account exists, a reset link has been sent"
    })))
}

/// Set a new password - POST /api/auth/reset-password
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> ApiResult<Json<Value>> {
    state
        .users
        .reset_password(&payload.token, &payload.password)?;
    Ok(Json(json!({ "message": "Password updated" })))
}

/// List all users - GET /api/admin/users
pub async fn list_users(State(state): State<AppState>) -> ApiResult<Json<Vec<UserResponse>>> {
    let users = state.users.list_users()?;
    Ok(Json(users.iter().map(UserResponse::from_user).collect()))
}

/// Create user - POST /api/admin/users
///
/// New admins get a welcome mail; a failed send never fails the request.
pub async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<CreateUserRequest>,
) -> ApiResult<(StatusCode, Json<UserResponse>)> {
    let user = state.users.create_user(NewUser {
        email: &payload.email,
        name: &payload.name,
        password: &payload.password,
        role: payload.role,
        company_id: payload.company_id.as_deref(),
    })?;

    if user.role == UserRole::Admin {
        let login_url = format!(
            "{}/login",
            state.config.public_base_url.trim_end_matches('/')
        );
        mailer::dispatch(
            state.mailer.clone(),
            welcome_mail(&user.email, &user.name, &login_url),
        );
    }

    Ok((StatusCode::CREATED, Json(UserResponse::from_user(&user))))
}

/// Delete user - DELETE /api/admin/users/:id
pub async fn delete_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<String>,
) -> ApiResult<StatusCode> {
    let uuid =
        Uuid::parse_str(&user_id).map_err(|_| ApiError::bad_request("Invalid user ID format"))?;

    if uuid.to_string() == claims.sub {
        return Err(ApiError::bad_request("Cannot delete your own account"));
    }

    if !state.users.delete_user(&uuid)? {
        return Err(ApiError::not_found("User not found"));
    }

    Ok(StatusCode::NO_CONTENT)
}
