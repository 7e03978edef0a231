//! Runtime Configuration
//! Mission: One place where env vars and CLI flags become typed settings

use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEV_JWT_SECRET: &str = "dev-secret-change-in-production-minimum-32-characters";

/// Server configuration. Every flag can also be supplied through the environment
/// (after `.env` loading).
#[derive(Parser, Debug, Clone)]
#[command(name = "wellness")]
#[command(about = "Corporate wellness and event backend")]
pub struct AppConfig {
    /// Listen host
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0")]
    pub bind_addr: String,

    /// Listen port
    #[arg(long, env = "PORT", default_value_t = 5000)]
    pub port: u16,

    /// SQLite database file (relative paths resolve against the crate directory)
    #[arg(long, env = "DB_PATH", default_value = "wellness.db")]
    pub db_path: String,

    /// HS256 secret for session tokens
    #[arg(long, env = "JWT_SECRET", default_value = DEV_JWT_SECRET, hide_env_values = true)]
    pub jwt_secret: String,

    /// Session lifetime in hours
    #[arg(long, env = "JWT_EXPIRATION_HOURS", default_value_t = 24)]
    pub jwt_expiration_hours: i64,

    /// HMAC secret for check-in tickets; falls back to the JWT secret
    #[arg(long, env = "QR_SECRET", hide_env_values = true)]
    pub qr_secret: Option<String>,

    /// Root directory for uploaded proof media
    #[arg(long, env = "MEDIA_DIR", default_value = "uploads")]
    pub media_dir: String,

    /// Public URL prefix used for media links and check-in links
    #[arg(long, env = "PUBLIC_BASE_URL", default_value = "http://localhost:5000")]
    pub public_base_url: String,

    /// HTTP relay for outgoing mail; when unset mail is only logged
    #[arg(long, env = "MAIL_WEBHOOK_URL")]
    pub mail_webhook_url: Option<String>,

    /// Sender address for outgoing mail
    #[arg(long, env = "MAIL_FROM", default_value = "no-reply@wellness.local")]
    pub mail_from: String,

    /// Bootstrap admin email, used when no admin exists yet
    #[arg(long, env = "ADMIN_EMAIL", default_value = "admin@wellness.local")]
    pub admin_email: String,

    /// Bootstrap admin password
    #[arg(long, env = "ADMIN_PASSWORD", default_value = "admin12345", hide_env_values = true)]
    pub admin_password: String,

    /// Requests per minute per IP on /api/auth/*
    #[arg(long, env = "RATE_LIMIT_PER_MINUTE", default_value_t = 60)]
    pub rate_limit_per_minute: u32,

    /// Extra burst allowance above the per-minute limit
    #[arg(long, env = "RATE_LIMIT_BURST", default_value_t = 20)]
    pub rate_limit_burst: u32,
}

impl AppConfig {
    /// Secret used to sign check-in tickets.
    pub fn qr_secret(&self) -> &str {
        self.qr_secret
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&self.jwt_secret)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.jwt_expiration_hours.max(1) as u64 * 3600)
    }

    pub fn resolved_db_path(&self) -> String {
        resolve_data_path(&self.db_path)
    }

    pub fn resolved_media_dir(&self) -> PathBuf {
        PathBuf::from(resolve_data_path(&self.media_dir))
    }

    /// Config for tests: fixed secrets, no mail relay.
    pub fn for_tests(media_dir: &Path) -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: 0,
            db_path: ":memory:".to_string(),
            jwt_secret: "test-secret-key-with-at-least-32-bytes!!".to_string(),
            jwt_expiration_hours: 24,
            qr_secret: Some("qr-test-secret-with-at-least-32-bytes!!!".to_string()),
            media_dir: media_dir.to_string_lossy().to_string(),
            public_base_url: "http://localhost:5000".to_string(),
            mail_webhook_url: None,
            mail_from: "no-reply@wellness.local".to_string(),
            admin_email: "admin@wellness.local".to_string(),
            admin_password: "admin12345".to_string(),
            rate_limit_per_minute: 1000,
            rate_limit_burst: 100,
        }
    }
}

/// Relative paths are anchored at the crate directory, not the caller's cwd.
pub fn resolve_data_path(raw: &str) -> String {
    if raw == ":memory:" {
        return raw.to_string();
    }
    let p = PathBuf::from(raw);
    if p.is_absolute() {
        return p.to_string_lossy().to_string();
    }
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join(p)
        .to_string_lossy()
        .to_string()
}

/// Load `.env` from the cwd chain, then from the crate directory.
pub fn load_env() {
    let _ = dotenv::dotenv();

    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let candidate = manifest_dir.join(".env");
    if candidate.exists() {
        let _ = dotenv::from_path(&candidate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qr_secret_falls_back_to_jwt_secret() {
        let mut cfg = AppConfig::for_tests(Path::new("/tmp/media"));
        cfg.qr_secret = None;
        assert_eq!(cfg.qr_secret(), cfg.jwt_secret);

        cfg.qr_secret = Some("   ".to_string());
        assert_eq!(cfg.qr_secret(), cfg.jwt_secret);

        cfg.qr_secret = Some("dedicated".to_string());
        assert_eq!(cfg.qr_secret(), "dedicated");
    }

    #[test]
    fn test_resolve_data_path() {
        assert_eq!(resolve_data_path(":memory:"), ":memory:");
        assert_eq!(resolve_data_path("/var/lib/w.db"), "/var/lib/w.db");
        assert!(resolve_data_path("w.db").ends_with("w.db"));
        assert!(Path::new(&resolve_data_path("w.db")).is_absolute());
    }

    #[test]
    fn test_cli_defaults() {
        let cfg = AppConfig::try_parse_from(["wellness", "--port", "8080"]).unwrap();
        assert_eq!(cfg.port, 8080);
        assert!(cfg.listen_addr().ends_with(":8080"));
    }
}
