//! abtutor-core library - Adaptive tutoring A/B backend
//!
//! Session lifecycle, preference attribution, and comparative analytics for
//! two competing AI tutoring models.

use abtutor_common::TriggerPolicy;
use axum::Router;
use sqlx::SqlitePool;

pub mod api;
pub mod db;
pub mod error;
pub mod services;

use services::{AnalyticsEngine, PreferenceLogWriter, SessionManager};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Engagement thresholds loaded from settings
    pub trigger_policy: TriggerPolicy,
}

impl AppState {
    /// Create new application state
    pub fn new(db: SqlitePool, trigger_policy: TriggerPolicy) -> Self {
        Self { db, trigger_policy }
    }

    pub fn session_manager(&self) -> SessionManager {
        SessionManager::new(self.db.clone(), self.trigger_policy)
    }

    pub fn preference_writer(&self) -> PreferenceLogWriter {
        PreferenceLogWriter::new(self.db.clone())
    }

    pub fn analytics_engine(&self) -> AnalyticsEngine {
        AnalyticsEngine::new(self.db.clone())
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::{get, post};
    use tower_http::cors::CorsLayer;
    use tower_http::trace::TraceLayer;

    Router::new()
        .route("/api/sessions", post(api::start_session))
        .route("/api/sessions/active", get(api::active_session))
        .route("/api/sessions/:id/end", post(api::end_session))
        .route("/api/sessions/:id/engagement", post(api::increment_engagement))
        .route("/api/sessions/:id/threshold-status", get(api::threshold_status))
        .route("/api/sessions/:id/choice", post(api::record_choice))
        .route("/api/analytics/compare", get(api::compare_models))
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
