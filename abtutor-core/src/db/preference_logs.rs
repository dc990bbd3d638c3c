//! Preference-log table operations
//!
//! Insert-only; rows are never updated after creation.

use abtutor_common::db::models::PreferenceLog;
use abtutor_common::{time, Error, Result};
use sqlx::SqlitePool;

/// Persist one preference observation
pub async fn insert_preference_log(pool: &SqlitePool, log: &PreferenceLog) -> Result<()> {
    let context = serde_json::to_string(&log.context)
        .map_err(|e| Error::Internal(format!("Failed to serialize context: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO preference_logs (
            guid, user_id, session_id, topic_id, interaction_type, chosen_model,
            reason, performance_score, success_rate, time_spent_seconds,
            attempt_count, difficulty, context, caused_by_reply_id,
            attributed_model, attribution_confidence, attribution_delay_seconds,
            created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(log.guid.to_string())
    .bind(log.user_id.to_string())
    .bind(log.session_id.map(|id| id.to_string()))
    .bind(log.topic_id.map(|id| id.to_string()))
    .bind(log.interaction_type.as_str())
    .bind(log.chosen_model.as_str())
    .bind(&log.reason)
    .bind(log.performance_score)
    .bind(log.success_rate)
    .bind(log.time_spent_seconds)
    .bind(log.attempt_count)
    .bind(&log.difficulty)
    .bind(context)
    .bind(log.caused_by_reply_id.map(|id| id.to_string()))
    .bind(&log.attributed_model)
    .bind(log.attribution_confidence)
    .bind(log.attribution_delay_seconds)
    .bind(time::to_db(log.created_at))
    .execute(pool)
    .await?;

    Ok(())
}

/// Count of preference observations for a user (used by integration tests
/// and the choice endpoint's response)
pub async fn count_for_user(pool: &SqlitePool, user_id: uuid::Uuid) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM preference_logs WHERE user_id = ?")
        .bind(user_id.to_string())
        .fetch_one(pool)
        .await?;

    Ok(count)
}
