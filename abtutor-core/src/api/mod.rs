//! HTTP API handlers

pub mod analytics;
pub mod health;
pub mod sessions;

pub use analytics::compare_models;
pub use health::health_routes;
pub use sessions::{
    active_session, end_session, increment_engagement, record_choice, start_session,
    threshold_status,
};
