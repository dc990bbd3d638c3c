//! Business logic services

pub mod analytics;
pub mod attribution;
pub mod preference_log;
pub mod scoring;
pub mod session_manager;

pub use analytics::AnalyticsEngine;
pub use preference_log::PreferenceLogWriter;
pub use session_manager::SessionManager;
