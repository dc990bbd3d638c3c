//! Shared test fixtures: temp database setup and row seeding

#![allow(dead_code)]

use abtutor_common::db::init_database;
use abtutor_common::db::models::{PracticeAttempt, QuizAttempt, SessionKind, TaggedReply};
use abtutor_common::TriggerPolicy;
use abtutor_core::db::{attempts, replies};
use abtutor_core::services::session_manager::{SessionHandle, StartSessionParams};
use abtutor_core::AppState;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tempfile::TempDir;
use uuid::Uuid;

/// Fresh database plus app state with the default trigger policy
pub async fn setup() -> (AppState, TempDir) {
    setup_with_policy(TriggerPolicy::default()).await
}

/// Fresh database plus app state with explicit thresholds
pub async fn setup_with_policy(policy: TriggerPolicy) -> (AppState, TempDir) {
    let dir = TempDir::new().expect("create temp dir");
    let pool = init_database(&dir.path().join("abtutor.db"))
        .await
        .expect("init database");
    (AppState::new(pool, policy), dir)
}

pub fn start_params(user_id: Uuid, lesson_id: Option<Uuid>) -> StartSessionParams {
    StartSessionParams {
        user_id,
        topic_id: None,
        lesson_id,
        kind: SessionKind::Comparison,
        models: vec!["model_a".to_string(), "model_b".to_string()],
    }
}

pub async fn start_session(state: &AppState, user_id: Uuid, lesson_id: Option<Uuid>) -> SessionHandle {
    state
        .session_manager()
        .start(&start_params(user_id, lesson_id))
        .await
        .expect("start session")
}

pub async fn seed_reply(
    pool: &SqlitePool,
    user_id: Uuid,
    session_id: Option<Uuid>,
    model: &str,
    at: DateTime<Utc>,
) -> TaggedReply {
    let reply = TaggedReply {
        guid: Uuid::new_v4(),
        user_id,
        session_id,
        model_label: model.to_string(),
        message_type: "chat".to_string(),
        rating: None,
        is_fallback: false,
        latency_ms: Some(800),
        created_at: at,
    };
    replies::insert_reply(pool, &reply).await.expect("insert reply");
    reply
}

pub async fn seed_practice_attempt(
    pool: &SqlitePool,
    user_id: Uuid,
    is_correct: bool,
    errors: i64,
    at: DateTime<Utc>,
) -> PracticeAttempt {
    let attempt = PracticeAttempt {
        guid: Uuid::new_v4(),
        user_id,
        problem_id: Uuid::new_v4(),
        topic_id: None,
        is_correct,
        points: abtutor_core::services::scoring::execution_reward(is_correct, 1.5) as f64,
        complexity_score: 1.5,
        compiler_errors: errors,
        runtime_errors: 0,
        time_spent_seconds: 120,
        attempt_number: 1,
        caused_by_reply_id: None,
        attributed_model: None,
        attribution_confidence: None,
        attribution_delay_seconds: None,
        created_at: at,
    };
    attempts::insert_practice_attempt(pool, &attempt)
        .await
        .expect("insert practice attempt");
    attempt
}

pub async fn seed_quiz_attempt(
    pool: &SqlitePool,
    user_id: Uuid,
    percentage: f64,
    at: DateTime<Utc>,
) -> QuizAttempt {
    let attempt = QuizAttempt {
        guid: Uuid::new_v4(),
        user_id,
        quiz_id: Uuid::new_v4(),
        topic_id: None,
        score: percentage,
        max_score: 100.0,
        percentage,
        passed: percentage >= 60.0,
        time_spent_seconds: 300,
        attempt_number: 1,
        caused_by_reply_id: None,
        attributed_model: None,
        attribution_confidence: None,
        attribution_delay_seconds: None,
        created_at: at,
    };
    attempts::insert_quiz_attempt(pool, &attempt)
        .await
        .expect("insert quiz attempt");
    attempt
}

/// Count of active (ended_at IS NULL) sessions for a user
pub async fn active_session_count(pool: &SqlitePool, user_id: Uuid) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE user_id = ? AND ended_at IS NULL")
        .bind(user_id.to_string())
        .fetch_one(pool)
        .await
        .expect("count active sessions")
}
