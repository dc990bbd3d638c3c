//! Per-table database operations

pub mod attempts;
pub mod preference_logs;
pub mod preserved;
pub mod replies;
pub mod sessions;
