//! Application State & Router
//! Mission: Wire every store into one shared state and mount the HTTP/WebSocket surface

use crate::auth::{self, auth_middleware, require_admin, JwtHandler, SessionAuth, UserStore};
use crate::config::AppConfig;
use crate::db::Db;
use crate::events::{self, EventStore, QrTokenService};
use crate::mailer::Mailer;
use crate::media::{self, MediaStore, MAX_UPLOAD_BYTES};
use crate::middleware::{rate_limit_middleware, request_logging, RateLimitConfig, RateLimitLayer};
use crate::polls::{self, PollHub, PollStore};
use crate::wellness::{self, WellnessStore};
use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::info;

/// Shared server context handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<UserStore>,
    pub jwt: Arc<JwtHandler>,
    pub wellness: Arc<WellnessStore>,
    pub events: Arc<EventStore>,
    pub polls: Arc<PollStore>,
    pub qr: Arc<QrTokenService>,
    pub hub: Arc<PollHub>,
    pub media: Arc<MediaStore>,
    pub mailer: Arc<dyn Mailer>,
    pub rate_limiter: RateLimitLayer,
}

impl AppState {
    /// Build every store on top of `db` and make sure an admin account exists.
    pub fn new(
        config: AppConfig,
        db: Db,
        mailer: Arc<dyn Mailer>,
        password_cost: u32,
    ) -> Result<Self> {
        let qr = QrTokenService::new(config.qr_secret().as_bytes())
            .context("QR_SECRET (or JWT_SECRET) must be at least 32 bytes")?;
        let media = MediaStore::new(config.resolved_media_dir(), &config.public_base_url)?;
        let users = UserStore::new(db.clone()).with_hash_cost(password_cost);
        let hub = Arc::new(PollHub::default());

        if users.ensure_admin(&config.admin_email, &config.admin_password)? {
            info!("Bootstrap admin created: {}", config.admin_email);
        }

        Ok(Self {
            jwt: Arc::new(JwtHandler::new(
                config.jwt_secret.clone(),
                config.jwt_expiration_hours,
            )),
            users: Arc::new(users),
            wellness: Arc::new(WellnessStore::new(db.clone())),
            events: Arc::new(EventStore::new(db.clone())),
            polls: Arc::new(PollStore::new(db, hub.clone())),
            qr: Arc::new(qr),
            hub,
            media: Arc::new(media),
            mailer,
            rate_limiter: RateLimitLayer::new(RateLimitConfig::from(&config)),
            config: Arc::new(config),
        })
    }
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "wellness-backend" }))
}

pub fn build_router(state: AppState) -> Router {
    let session = SessionAuth {
        jwt: state.jwt.clone(),
        users: state.users.clone(),
    };

    // Unauthenticated auth endpoints sit behind the per-IP limiter
    let auth_routes = Router::new()
        .route("/api/auth/register", post(auth::api::register))
        .route("/api/auth/login", post(auth::api::login))
        .route("/api/auth/logout", post(auth::api::logout))
        .route("/api/auth/forgot-password", post(auth::api::forgot_password))
        .route("/api/auth/reset-password", post(auth::api::reset_password))
        .route_layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .with_state(state.clone());

    let public_routes = Router::new()
        .route("/health", get(health_check))
        .route("/api/companies", get(wellness::api::list_companies))
        .route("/api/companies/:id", get(wellness::api::get_company))
        .route("/api/leaderboard", get(wellness::api::leaderboard))
        .route("/api/events", get(events::api::list_events))
        .route("/api/events/code/:code", get(events::api::get_event_by_code))
        .route("/api/events/:id", get(events::api::get_event))
        .route("/api/events/:id/register", post(events::api::register))
        .route("/api/polls", get(polls::api::list_polls))
        .route("/api/polls/code/:code", get(polls::api::get_poll_by_code))
        .route("/api/polls/:id", get(polls::api::get_poll))
        .route("/api/polls/:id/vote", post(polls::api::vote))
        .route("/ws/polls", get(polls::ws::poll_socket))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/api/auth/me", get(auth::api::me))
        .route("/api/tasks", get(wellness::api::list_tasks))
        .route("/api/tasks/:id", get(wellness::api::get_task))
        .route(
            "/api/proofs",
            get(wellness::api::list_my_proofs).post(wellness::api::submit_proof),
        )
        .route("/api/proofs/:id", get(wellness::api::get_proof))
        .route(
            "/api/uploads",
            post(media::upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route_layer(middleware::from_fn_with_state(
            session.clone(),
            auth_middleware,
        ))
        .with_state(state.clone());

    let admin_routes = Router::new()
        .route(
            "/api/admin/users",
            get(auth::api::list_users).post(auth::api::create_user),
        )
        .route("/api/admin/users/:id", delete(auth::api::delete_user))
        .route("/api/admin/tasks", post(wellness::api::create_task))
        .route(
            "/api/admin/tasks/:id",
            put(wellness::api::update_task).delete(wellness::api::delete_task),
        )
        .route("/api/admin/proofs", get(wellness::api::list_proofs))
        .route(
            "/api/admin/proofs/:id/approve",
            post(wellness::api::approve_proof),
        )
        .route(
            "/api/admin/proofs/:id/reject",
            post(wellness::api::reject_proof),
        )
        .route("/api/admin/events", post(events::api::create_event))
        .route(
            "/api/admin/events/:id",
            put(events::api::update_event).delete(events::api::delete_event),
        )
        .route(
            "/api/admin/events/:id/registrations",
            get(events::api::list_registrations),
        )
        .route("/api/admin/events/:id/stats", get(events::api::event_stats))
        .route(
            "/api/admin/registrations/:id/approve",
            post(events::api::approve_registration),
        )
        .route(
            "/api/admin/registrations/:id/reject",
            post(events::api::reject_registration),
        )
        .route(
            "/api/admin/registrations/:id/ticket",
            get(events::api::get_ticket),
        )
        .route("/api/events/:id/check-in", post(events::api::check_in))
        .route("/api/admin/polls", post(polls::api::create_poll))
        .route("/api/admin/polls/:id", delete(polls::api::delete_poll))
        .route("/api/admin/polls/:id/open", post(polls::api::open_poll))
        .route("/api/admin/polls/:id/close", post(polls::api::close_poll))
        .route_layer(middleware::from_fn(require_admin))
        .route_layer(middleware::from_fn_with_state(
            session.clone(),
            auth_middleware,
        ))
        .with_state(state.clone());

    Router::new()
        .merge(public_routes)
        .merge(auth_routes)
        .merge(protected_routes)
        .merge(admin_routes)
        .nest_service("/media", ServeDir::new(state.media.root()))
        .layer(middleware::from_fn(request_logging))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
