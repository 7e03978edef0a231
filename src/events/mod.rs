//! Events Module
//! Mission: Event registration, admin approval, signed QR tickets and door check-in

pub mod api;
pub mod models;
pub mod qr;
pub mod store;

pub use models::{Event, EventRegistration, RegistrationStatus};
pub use qr::{QrClaims, QrTokenError, QrTokenService};
pub use store::EventStore;
