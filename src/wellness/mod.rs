//! Wellness Module
//! Mission: Companies complete tasks, admins review proof, points feed the leaderboard

pub mod api;
pub mod models;
pub mod store;

pub use models::{Company, ReviewStatus, Task, TaskProof, MIN_PROOF_ITEMS};
pub use store::WellnessStore;
