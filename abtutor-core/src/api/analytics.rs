//! Comparative analytics endpoint

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::services::analytics::{
    CompareParams, ComparisonReport, DEFAULT_BASELINE_K, DEFAULT_LOOKAHEAD_MINUTES,
};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CompareQuery {
    pub user_id: Option<Uuid>,
    pub window: Option<String>,
    pub k: Option<usize>,
    pub lookahead_minutes: Option<i64>,
}

/// GET /api/analytics/compare
pub async fn compare_models(
    State(state): State<AppState>,
    Query(query): Query<CompareQuery>,
) -> ApiResult<Json<ComparisonReport>> {
    let lookahead_minutes = query.lookahead_minutes.unwrap_or(DEFAULT_LOOKAHEAD_MINUTES);
    if lookahead_minutes < 1 {
        return Err(ApiError::Validation(
            "lookahead_minutes must be at least 1".to_string(),
        ));
    }

    let params = CompareParams {
        user_id: query.user_id,
        window: query.window,
        baseline_k: query.k.unwrap_or(DEFAULT_BASELINE_K),
        lookahead_minutes,
    };

    let report = state.analytics_engine().compare(&params).await?;
    Ok(Json(report))
}
