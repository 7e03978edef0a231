//! Wellness Backend Library
//!
//! Corporate wellness challenges (tasks, proofs, leaderboard) plus event
//! registration, QR check-in and live polls. The binary in `main.rs` and the
//! integration tests both build on these modules.

pub mod app;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod mailer;
pub mod media;
pub mod middleware;
pub mod polls;
pub mod short_code;
pub mod wellness;

pub use app::{build_router, AppState};
pub use config::AppConfig;
pub use db::Db;
