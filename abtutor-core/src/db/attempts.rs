//! Quiz and practice attempt table operations
//!
//! Attempt rows are owned by the quiz/practice subsystems; this module reads
//! them for metrics gathering and analytics, stores new rows on submission,
//! and stamps attribution fields.

use abtutor_common::db::models::{PracticeAttempt, QuizAttempt};
use abtutor_common::{time, Error, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::services::attribution::AttributionFields;

fn parse_uuid(raw: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

fn parse_uuid_opt(raw: Option<String>, column: &str) -> Result<Option<Uuid>> {
    raw.map(|s| parse_uuid(&s, column)).transpose()
}

fn quiz_from_row(row: &SqliteRow) -> Result<QuizAttempt> {
    let guid: String = row.get("guid");
    let user_id: String = row.get("user_id");
    let quiz_id: String = row.get("quiz_id");
    let created_at: String = row.get("created_at");

    Ok(QuizAttempt {
        guid: parse_uuid(&guid, "guid")?,
        user_id: parse_uuid(&user_id, "user_id")?,
        quiz_id: parse_uuid(&quiz_id, "quiz_id")?,
        topic_id: parse_uuid_opt(row.get("topic_id"), "topic_id")?,
        score: row.get("score"),
        max_score: row.get("max_score"),
        percentage: row.get("percentage"),
        passed: row.get::<i64, _>("passed") != 0,
        time_spent_seconds: row.get("time_spent_seconds"),
        attempt_number: row.get("attempt_number"),
        caused_by_reply_id: parse_uuid_opt(row.get("caused_by_reply_id"), "caused_by_reply_id")?,
        attributed_model: row.get("attributed_model"),
        attribution_confidence: row.get("attribution_confidence"),
        attribution_delay_seconds: row.get("attribution_delay_seconds"),
        created_at: time::from_db(&created_at)?,
    })
}

fn practice_from_row(row: &SqliteRow) -> Result<PracticeAttempt> {
    let guid: String = row.get("guid");
    let user_id: String = row.get("user_id");
    let problem_id: String = row.get("problem_id");
    let created_at: String = row.get("created_at");

    Ok(PracticeAttempt {
        guid: parse_uuid(&guid, "guid")?,
        user_id: parse_uuid(&user_id, "user_id")?,
        problem_id: parse_uuid(&problem_id, "problem_id")?,
        topic_id: parse_uuid_opt(row.get("topic_id"), "topic_id")?,
        is_correct: row.get::<i64, _>("is_correct") != 0,
        points: row.get("points"),
        complexity_score: row.get("complexity_score"),
        compiler_errors: row.get("compiler_errors"),
        runtime_errors: row.get("runtime_errors"),
        time_spent_seconds: row.get("time_spent_seconds"),
        attempt_number: row.get("attempt_number"),
        caused_by_reply_id: parse_uuid_opt(row.get("caused_by_reply_id"), "caused_by_reply_id")?,
        attributed_model: row.get("attributed_model"),
        attribution_confidence: row.get("attribution_confidence"),
        attribution_delay_seconds: row.get("attribution_delay_seconds"),
        created_at: time::from_db(&created_at)?,
    })
}

const QUIZ_COLUMNS: &str = "guid, user_id, quiz_id, topic_id, score, max_score, percentage, passed, \
     time_spent_seconds, attempt_number, caused_by_reply_id, attributed_model, \
     attribution_confidence, attribution_delay_seconds, created_at";

const PRACTICE_COLUMNS: &str = "guid, user_id, problem_id, topic_id, is_correct, points, complexity_score, \
     compiler_errors, runtime_errors, time_spent_seconds, attempt_number, caused_by_reply_id, \
     attributed_model, attribution_confidence, attribution_delay_seconds, created_at";

/// Store a quiz attempt
pub async fn insert_quiz_attempt(pool: &SqlitePool, attempt: &QuizAttempt) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO quiz_attempts (
            guid, user_id, quiz_id, topic_id, score, max_score, percentage, passed,
            time_spent_seconds, attempt_number, caused_by_reply_id, attributed_model,
            attribution_confidence, attribution_delay_seconds, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(attempt.guid.to_string())
    .bind(attempt.user_id.to_string())
    .bind(attempt.quiz_id.to_string())
    .bind(attempt.topic_id.map(|id| id.to_string()))
    .bind(attempt.score)
    .bind(attempt.max_score)
    .bind(attempt.percentage)
    .bind(attempt.passed as i64)
    .bind(attempt.time_spent_seconds)
    .bind(attempt.attempt_number)
    .bind(attempt.caused_by_reply_id.map(|id| id.to_string()))
    .bind(&attempt.attributed_model)
    .bind(&attempt.attribution_confidence)
    .bind(attempt.attribution_delay_seconds)
    .bind(time::to_db(attempt.created_at))
    .execute(pool)
    .await?;

    Ok(())
}

/// Store a practice attempt
pub async fn insert_practice_attempt(pool: &SqlitePool, attempt: &PracticeAttempt) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO practice_attempts (
            guid, user_id, problem_id, topic_id, is_correct, points, complexity_score,
            compiler_errors, runtime_errors, time_spent_seconds, attempt_number,
            caused_by_reply_id, attributed_model, attribution_confidence,
            attribution_delay_seconds, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(attempt.guid.to_string())
    .bind(attempt.user_id.to_string())
    .bind(attempt.problem_id.to_string())
    .bind(attempt.topic_id.map(|id| id.to_string()))
    .bind(attempt.is_correct as i64)
    .bind(attempt.points)
    .bind(attempt.complexity_score)
    .bind(attempt.compiler_errors)
    .bind(attempt.runtime_errors)
    .bind(attempt.time_spent_seconds)
    .bind(attempt.attempt_number)
    .bind(attempt.caused_by_reply_id.map(|id| id.to_string()))
    .bind(&attempt.attributed_model)
    .bind(&attempt.attribution_confidence)
    .bind(attempt.attribution_delay_seconds)
    .bind(time::to_db(attempt.created_at))
    .execute(pool)
    .await?;

    Ok(())
}

/// The user's most recent quiz attempt, optionally scoped to a topic
pub async fn latest_quiz_attempt(
    pool: &SqlitePool,
    user_id: Uuid,
    topic_id: Option<Uuid>,
) -> Result<Option<QuizAttempt>> {
    let row = match topic_id {
        Some(topic) => {
            let sql = format!(
                "SELECT {} FROM quiz_attempts WHERE user_id = ? AND topic_id = ? ORDER BY created_at DESC LIMIT 1",
                QUIZ_COLUMNS
            );
            sqlx::query(&sql)
                .bind(user_id.to_string())
                .bind(topic.to_string())
                .fetch_optional(pool)
                .await?
        }
        None => {
            let sql = format!(
                "SELECT {} FROM quiz_attempts WHERE user_id = ? ORDER BY created_at DESC LIMIT 1",
                QUIZ_COLUMNS
            );
            sqlx::query(&sql)
                .bind(user_id.to_string())
                .fetch_optional(pool)
                .await?
        }
    };

    row.as_ref().map(quiz_from_row).transpose()
}

/// The user's most recent practice attempt, optionally scoped to a topic
pub async fn latest_practice_attempt(
    pool: &SqlitePool,
    user_id: Uuid,
    topic_id: Option<Uuid>,
) -> Result<Option<PracticeAttempt>> {
    let row = match topic_id {
        Some(topic) => {
            let sql = format!(
                "SELECT {} FROM practice_attempts WHERE user_id = ? AND topic_id = ? ORDER BY created_at DESC LIMIT 1",
                PRACTICE_COLUMNS
            );
            sqlx::query(&sql)
                .bind(user_id.to_string())
                .bind(topic.to_string())
                .fetch_optional(pool)
                .await?
        }
        None => {
            let sql = format!(
                "SELECT {} FROM practice_attempts WHERE user_id = ? ORDER BY created_at DESC LIMIT 1",
                PRACTICE_COLUMNS
            );
            sqlx::query(&sql)
                .bind(user_id.to_string())
                .fetch_optional(pool)
                .await?
        }
    };

    row.as_ref().map(practice_from_row).transpose()
}

/// Quiz attempts since `window_start`, optionally scoped to one user, ordered by time
pub async fn quiz_attempts_in_window(
    pool: &SqlitePool,
    user_id: Option<Uuid>,
    window_start: DateTime<Utc>,
) -> Result<Vec<QuizAttempt>> {
    let rows = match user_id {
        Some(user) => {
            let sql = format!(
                "SELECT {} FROM quiz_attempts WHERE user_id = ? AND created_at >= ? ORDER BY created_at ASC",
                QUIZ_COLUMNS
            );
            sqlx::query(&sql)
                .bind(user.to_string())
                .bind(time::to_db(window_start))
                .fetch_all(pool)
                .await?
        }
        None => {
            let sql = format!(
                "SELECT {} FROM quiz_attempts WHERE created_at >= ? ORDER BY created_at ASC",
                QUIZ_COLUMNS
            );
            sqlx::query(&sql)
                .bind(time::to_db(window_start))
                .fetch_all(pool)
                .await?
        }
    };

    rows.iter().map(quiz_from_row).collect()
}

/// Practice attempts since `window_start`, optionally scoped to one user, ordered by time
pub async fn practice_attempts_in_window(
    pool: &SqlitePool,
    user_id: Option<Uuid>,
    window_start: DateTime<Utc>,
) -> Result<Vec<PracticeAttempt>> {
    let rows = match user_id {
        Some(user) => {
            let sql = format!(
                "SELECT {} FROM practice_attempts WHERE user_id = ? AND created_at >= ? ORDER BY created_at ASC",
                PRACTICE_COLUMNS
            );
            sqlx::query(&sql)
                .bind(user.to_string())
                .bind(time::to_db(window_start))
                .fetch_all(pool)
                .await?
        }
        None => {
            let sql = format!(
                "SELECT {} FROM practice_attempts WHERE created_at >= ? ORDER BY created_at ASC",
                PRACTICE_COLUMNS
            );
            sqlx::query(&sql)
                .bind(time::to_db(window_start))
                .fetch_all(pool)
                .await?
        }
    };

    rows.iter().map(practice_from_row).collect()
}

/// Stamp attribution fields onto a quiz attempt
pub async fn stamp_quiz_attribution(
    pool: &SqlitePool,
    attempt_id: Uuid,
    fields: &AttributionFields,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE quiz_attempts
        SET caused_by_reply_id = ?, attributed_model = ?,
            attribution_confidence = ?, attribution_delay_seconds = ?
        WHERE guid = ?
        "#,
    )
    .bind(fields.caused_by_reply_id.map(|id| id.to_string()))
    .bind(&fields.attributed_model)
    .bind(&fields.confidence)
    .bind(fields.delay_seconds)
    .bind(attempt_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Stamp attribution fields onto a practice attempt
pub async fn stamp_practice_attribution(
    pool: &SqlitePool,
    attempt_id: Uuid,
    fields: &AttributionFields,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE practice_attempts
        SET caused_by_reply_id = ?, attributed_model = ?,
            attribution_confidence = ?, attribution_delay_seconds = ?
        WHERE guid = ?
        "#,
    )
    .bind(fields.caused_by_reply_id.map(|id| id.to_string()))
    .bind(&fields.attributed_model)
    .bind(&fields.confidence)
    .bind(fields.delay_seconds)
    .bind(attempt_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}
