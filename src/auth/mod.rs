//! Authentication Module
//! Mission: Company sign-up, JWT sessions, admin gating and password recovery

pub mod api;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod user_store;

pub use jwt::JwtHandler;
pub use middleware::{auth_middleware, require_admin, SessionAuth};
pub use models::{Claims, User, UserRole};
pub use user_store::UserStore;
