//! Session lifecycle and preference endpoints

use abtutor_common::db::models::{ChosenModel, InteractionType, PreferenceLog, Session, SessionKind};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::services::preference_log::RecordChoiceParams;
use crate::services::session_manager::{
    EndSessionReport, EngagementUpdate, SessionHandle, StartSessionParams, ThresholdStatus,
};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub user_id: Uuid,
    pub topic_id: Option<Uuid>,
    pub lesson_id: Option<Uuid>,
    pub kind: String,
    pub models: Vec<String>,
}

/// POST /api/sessions
pub async fn start_session(
    State(state): State<AppState>,
    Json(req): Json<StartSessionRequest>,
) -> ApiResult<Json<SessionHandle>> {
    let kind = SessionKind::parse(&req.kind)?;
    if req.models.is_empty() {
        return Err(ApiError::Validation("models must not be empty".to_string()));
    }

    let params = StartSessionParams {
        user_id: req.user_id,
        topic_id: req.topic_id,
        lesson_id: req.lesson_id,
        kind,
        models: req.models,
    };

    let handle = state.session_manager().start(&params).await?;
    Ok(Json(handle))
}

#[derive(Debug, Deserialize)]
pub struct EndSessionRequest {
    pub user_id: Uuid,
}

/// POST /api/sessions/:id/end
pub async fn end_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<EndSessionRequest>,
) -> ApiResult<Json<EndSessionReport>> {
    let report = state.session_manager().end(session_id, req.user_id).await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct IncrementEngagementRequest {
    pub user_id: Uuid,
    pub points: i64,
}

/// POST /api/sessions/:id/engagement
pub async fn increment_engagement(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<IncrementEngagementRequest>,
) -> ApiResult<Json<EngagementUpdate>> {
    let update = state
        .session_manager()
        .increment_engagement(session_id, req.user_id, req.points)
        .await?;
    Ok(Json(update))
}

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub user_id: Uuid,
}

/// GET /api/sessions/:id/threshold-status
pub async fn threshold_status(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Query(query): Query<UserQuery>,
) -> ApiResult<Json<ThresholdStatus>> {
    let status = state
        .session_manager()
        .threshold_status(session_id, query.user_id)
        .await?;
    Ok(Json(status))
}

#[derive(Debug, Serialize)]
pub struct ActiveSessionResponse {
    pub session: Option<Session>,
}

/// GET /api/sessions/active
pub async fn active_session(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> ApiResult<Json<ActiveSessionResponse>> {
    let session = state.session_manager().active_session(query.user_id).await?;
    Ok(Json(ActiveSessionResponse { session }))
}

#[derive(Debug, Deserialize)]
pub struct RecordChoiceRequest {
    pub user_id: Uuid,
    pub choice: String,
    pub reason: Option<String>,
    pub activity_type: Option<String>,
}

/// POST /api/sessions/:id/choice
pub async fn record_choice(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<RecordChoiceRequest>,
) -> ApiResult<Json<PreferenceLog>> {
    let choice = ChosenModel::parse(&req.choice)?;
    let activity_type = req
        .activity_type
        .as_deref()
        .map(InteractionType::parse)
        .transpose()?;

    let params = RecordChoiceParams {
        user_id: req.user_id,
        session_id,
        choice,
        reason: req.reason,
        activity_type,
    };

    let log = state.preference_writer().record_choice(&params).await?;
    Ok(Json(log))
}
