//! Live Polls Module
//! Mission: Event polls with one vote per voter and results pushed over WebSocket

pub mod api;
pub mod hub;
pub mod models;
pub mod store;
pub mod ws;

pub use hub::PollHub;
pub use models::{PollResults, PollSubject};
pub use store::PollStore;
