//! Preference observation assembly
//!
//! One immutable PreferenceLog row per learner choice event: gathers the
//! metrics of the outcome that provoked the choice, normalizes the
//! attribution stamp, and persists the observation.

use abtutor_common::db::models::{ChosenModel, InteractionType, PreferenceLog, Session};
use abtutor_common::{time, Error, Result};
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::db::{preference_logs, sessions};
use crate::services::attribution;

/// Inputs to a choice recording
#[derive(Debug, Clone)]
pub struct RecordChoiceParams {
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub choice: ChosenModel,
    pub reason: Option<String>,
    pub activity_type: Option<InteractionType>,
}

/// Writes preference observations
#[derive(Clone)]
pub struct PreferenceLogWriter {
    pool: SqlitePool,
}

impl PreferenceLogWriter {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record one preference observation for a session the caller owns.
    ///
    /// When the activity type is omitted it is inferred from the session's
    /// trigger state: quiz-triggered beats practice-triggered beats code
    /// execution.
    pub async fn record_choice(&self, params: &RecordChoiceParams) -> Result<PreferenceLog> {
        let session = sessions::get_session_for_user(&self.pool, params.session_id, params.user_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Session {} not found", params.session_id)))?;

        let activity = params
            .activity_type
            .unwrap_or_else(|| default_activity(&session));

        let metrics = attribution::metrics_for_activity(
            &self.pool,
            params.user_id,
            activity,
            session.topic_id,
            Some(session.guid),
        )
        .await?;

        let raw_confidence = metrics.attribution.confidence.clone().map(Value::String);
        let raw_delay = metrics.attribution.delay_seconds.map(Value::from);

        let log = PreferenceLog {
            guid: Uuid::new_v4(),
            user_id: params.user_id,
            session_id: Some(session.guid),
            topic_id: session.topic_id,
            interaction_type: activity,
            chosen_model: params.choice,
            reason: params.reason.clone(),
            performance_score: metrics.performance_score.unwrap_or(0.0),
            success_rate: metrics.success_rate.unwrap_or(0.0),
            time_spent_seconds: metrics.time_spent_seconds.unwrap_or(0),
            attempt_count: metrics.attempt_count.unwrap_or(1),
            difficulty: "medium".to_string(),
            context: metrics.context,
            caused_by_reply_id: metrics.attribution.caused_by_reply_id,
            attributed_model: metrics.attribution.attributed_model,
            attribution_confidence: attribution::resolve_confidence(raw_confidence.as_ref()),
            attribution_delay_seconds: attribution::normalize_delay(raw_delay.as_ref()),
            created_at: time::now(),
        };

        preference_logs::insert_preference_log(&self.pool, &log).await?;

        let now = time::now();
        sessions::set_last_preference(
            &self.pool,
            session.guid,
            params.choice.as_str(),
            params.reason.as_deref(),
            now,
        )
        .await?;

        info!(
            user_id = %params.user_id,
            session_id = %session.guid,
            choice = params.choice.as_str(),
            activity = activity.as_str(),
            "Recorded preference"
        );

        Ok(log)
    }
}

/// Session's default activity type when the caller leaves it out
fn default_activity(session: &Session) -> InteractionType {
    if session.quiz_triggered {
        InteractionType::Quiz
    } else if session.practice_triggered {
        InteractionType::Practice
    } else {
        InteractionType::CodeExecution
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abtutor_common::db::models::SessionKind;
    use serde_json::json;

    fn session_with_triggers(quiz: bool, practice: bool) -> Session {
        Session {
            guid: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            topic_id: None,
            lesson_id: None,
            kind: SessionKind::Comparison,
            models: vec!["model_a".into(), "model_b".into()],
            started_at: time::now(),
            ended_at: None,
            message_count: 0,
            engagement_score: 0,
            quiz_triggered: quiz,
            practice_triggered: practice,
            practice_completed: false,
            last_preference: None,
            preference_reason: None,
            metadata: json!({}),
        }
    }

    #[test]
    fn test_default_activity_prefers_quiz() {
        assert_eq!(
            default_activity(&session_with_triggers(true, true)),
            InteractionType::Quiz
        );
    }

    #[test]
    fn test_default_activity_falls_back_to_practice() {
        assert_eq!(
            default_activity(&session_with_triggers(false, true)),
            InteractionType::Practice
        );
    }

    #[test]
    fn test_default_activity_bottoms_out_at_code_execution() {
        assert_eq!(
            default_activity(&session_with_triggers(false, false)),
            InteractionType::CodeExecution
        );
    }
}
