//! Wellness Backend
//! Mission: Serve the company wellness challenge, event check-in and live polls

use anyhow::{Context, Result};
use clap::Parser;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpListener, time::interval};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wellness_backend::{
    build_router,
    config::{load_env, DEV_JWT_SECRET},
    mailer::{LogMailer, Mailer, WebhookMailer},
    AppConfig, AppState, Db,
};

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let config = AppConfig::parse();
    info!("Wellness backend starting");

    if config.jwt_secret == DEV_JWT_SECRET {
        warn!("JWT_SECRET is not set; using the development secret");
    }

    let db_path = config.resolved_db_path();
    let db = Db::open(&db_path)?;

    let mailer: Arc<dyn Mailer> = match config.mail_webhook_url.as_deref() {
        Some(url) if !url.trim().is_empty() => {
            let http_client = reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .context("Failed to build HTTP client")?;
            info!("Outgoing mail relayed to {}", url);
            Arc::new(WebhookMailer::new(
                http_client,
                url.to_string(),
                config.mail_from.clone(),
            ))
        }
        _ => {
            info!("MAIL_WEBHOOK_URL not set; outgoing mail is only logged");
            Arc::new(LogMailer)
        }
    };

    let listen_addr = config.listen_addr();
    let state = AppState::new(config, db, mailer, bcrypt::DEFAULT_COST)?;

    tokio::spawn(housekeeping(state.clone()));

    let app = build_router(state);

    let listener = TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", listen_addr))?;
    info!("API server listening on {}", listen_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wellness_backend=debug,wellness=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Drop idle rate-limit buckets and poll channels nobody listens to.
async fn housekeeping(state: AppState) {
    let mut tick = interval(Duration::from_secs(60));
    loop {
        tick.tick().await;
        let buckets = state.rate_limiter.cleanup();
        let channels = state.hub.prune();
        debug!(
            buckets_removed = buckets,
            rate_limited_clients = state.rate_limiter.tracked_clients(),
            poll_channels_removed = channels,
            poll_channels = state.hub.channel_count(),
            "Housekeeping"
        );
    }
}
