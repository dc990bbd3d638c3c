//! Session table operations
//!
//! Reads and writes the `sessions` table. The transactional pieces of the
//! start flow take a `&mut SqliteConnection` so the session manager can hold
//! them inside one write transaction.

use abtutor_common::db::models::{Session, SessionKind};
use abtutor_common::{time, Error, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

fn parse_uuid(raw: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

fn parse_uuid_opt(raw: Option<String>, column: &str) -> Result<Option<Uuid>> {
    raw.map(|s| parse_uuid(&s, column)).transpose()
}

/// Map a sessions row into the domain model
pub fn session_from_row(row: &SqliteRow) -> Result<Session> {
    let guid: String = row.get("guid");
    let user_id: String = row.get("user_id");
    let kind: String = row.get("kind");

    let models: String = row.get("models");
    let models: Vec<String> = serde_json::from_str(&models)
        .map_err(|e| Error::Internal(format!("Failed to deserialize models: {}", e)))?;

    let metadata: String = row.get("metadata");
    let metadata: serde_json::Value = serde_json::from_str(&metadata)
        .map_err(|e| Error::Internal(format!("Failed to deserialize metadata: {}", e)))?;

    let started_at: String = row.get("started_at");
    let ended_at: Option<String> = row.get("ended_at");

    Ok(Session {
        guid: parse_uuid(&guid, "guid")?,
        user_id: parse_uuid(&user_id, "user_id")?,
        topic_id: parse_uuid_opt(row.get("topic_id"), "topic_id")?,
        lesson_id: parse_uuid_opt(row.get("lesson_id"), "lesson_id")?,
        kind: SessionKind::parse(&kind)?,
        models,
        started_at: time::from_db(&started_at)?,
        ended_at: time::from_db_opt(ended_at)?,
        message_count: row.get("message_count"),
        engagement_score: row.get("engagement_score"),
        quiz_triggered: row.get::<i64, _>("quiz_triggered") != 0,
        practice_triggered: row.get::<i64, _>("practice_triggered") != 0,
        practice_completed: row.get::<i64, _>("practice_completed") != 0,
        last_preference: row.get("last_preference"),
        preference_reason: row.get("preference_reason"),
        metadata,
    })
}

const SESSION_COLUMNS: &str = "guid, user_id, topic_id, lesson_id, kind, models, started_at, ended_at, \
     message_count, engagement_score, quiz_triggered, practice_triggered, practice_completed, \
     last_preference, preference_reason, metadata";

/// Insert a new session row
pub async fn insert_session(conn: &mut SqliteConnection, session: &Session) -> Result<()> {
    let models = serde_json::to_string(&session.models)
        .map_err(|e| Error::Internal(format!("Failed to serialize models: {}", e)))?;
    let metadata = serde_json::to_string(&session.metadata)
        .map_err(|e| Error::Internal(format!("Failed to serialize metadata: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO sessions (
            guid, user_id, topic_id, lesson_id, kind, models, started_at, ended_at,
            message_count, engagement_score, quiz_triggered, practice_triggered,
            practice_completed, last_preference, preference_reason, metadata
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(session.guid.to_string())
    .bind(session.user_id.to_string())
    .bind(session.topic_id.map(|id| id.to_string()))
    .bind(session.lesson_id.map(|id| id.to_string()))
    .bind(session.kind.as_str())
    .bind(models)
    .bind(time::to_db(session.started_at))
    .bind(session.ended_at.map(time::to_db))
    .bind(session.message_count)
    .bind(session.engagement_score)
    .bind(session.quiz_triggered as i64)
    .bind(session.practice_triggered as i64)
    .bind(session.practice_completed as i64)
    .bind(&session.last_preference)
    .bind(&session.preference_reason)
    .bind(metadata)
    .execute(conn)
    .await?;

    Ok(())
}

/// Load a session by id, scoped to its owner
pub async fn get_session_for_user(
    pool: &SqlitePool,
    session_id: Uuid,
    user_id: Uuid,
) -> Result<Option<Session>> {
    let sql = format!("SELECT {} FROM sessions WHERE guid = ? AND user_id = ?", SESSION_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(session_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(session_from_row).transpose()
}

/// Load a session by id and owner inside a write transaction, for a
/// read-modify-write cycle on its counters
pub async fn find_session_for_update(
    conn: &mut SqliteConnection,
    session_id: Uuid,
    user_id: Uuid,
) -> Result<Option<Session>> {
    let sql = format!("SELECT {} FROM sessions WHERE guid = ? AND user_id = ?", SESSION_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(session_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(conn)
        .await?;

    row.as_ref().map(session_from_row).transpose()
}

/// Most recently started active session for a user, if any
pub async fn get_active_session(pool: &SqlitePool, user_id: Uuid) -> Result<Option<Session>> {
    let sql = format!(
        "SELECT {} FROM sessions WHERE user_id = ? AND ended_at IS NULL ORDER BY started_at DESC LIMIT 1",
        SESSION_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(user_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(session_from_row).transpose()
}

/// End every active session for this user bound to a different lesson.
///
/// First write statement of the start transaction; acquiring SQLite's write
/// lock here serializes concurrent start calls for the same user before any
/// session state is read. Lesson-less sessions are left running.
pub async fn end_other_lesson_sessions(
    conn: &mut SqliteConnection,
    user_id: Uuid,
    lesson_id: Uuid,
    now: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE sessions
        SET ended_at = ?, updated_at = ?
        WHERE user_id = ? AND ended_at IS NULL
          AND lesson_id IS NOT NULL AND lesson_id != ?
        "#,
    )
    .bind(time::to_db(now))
    .bind(time::to_db(now))
    .bind(user_id.to_string())
    .bind(lesson_id.to_string())
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

/// Active session for (user, lesson), read inside the start transaction
pub async fn find_active_for_lesson(
    conn: &mut SqliteConnection,
    user_id: Uuid,
    lesson_id: Uuid,
) -> Result<Option<Session>> {
    let sql = format!(
        "SELECT {} FROM sessions WHERE user_id = ? AND lesson_id = ? AND ended_at IS NULL LIMIT 1",
        SESSION_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(user_id.to_string())
        .bind(lesson_id.to_string())
        .fetch_optional(conn)
        .await?;

    row.as_ref().map(session_from_row).transpose()
}

/// Most recently ended session for (user, lesson), candidate for reactivation
pub async fn find_most_recent_ended(
    conn: &mut SqliteConnection,
    user_id: Uuid,
    lesson_id: Uuid,
) -> Result<Option<Session>> {
    let sql = format!(
        "SELECT {} FROM sessions WHERE user_id = ? AND lesson_id = ? AND ended_at IS NOT NULL \
         ORDER BY ended_at DESC LIMIT 1",
        SESSION_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(user_id.to_string())
        .bind(lesson_id.to_string())
        .fetch_optional(conn)
        .await?;

    row.as_ref().map(session_from_row).transpose()
}

/// Clear ended_at on a previously-ended session, preserving its history and
/// accumulated engagement score
pub async fn reactivate_session(
    conn: &mut SqliteConnection,
    session_id: Uuid,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE sessions SET ended_at = NULL, updated_at = ? WHERE guid = ?")
        .bind(time::to_db(now))
        .bind(session_id.to_string())
        .execute(conn)
        .await?;

    Ok(())
}

/// Set ended_at on an active session
pub async fn end_session(
    pool: &SqlitePool,
    session_id: Uuid,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE sessions SET ended_at = ?, updated_at = ? WHERE guid = ? AND ended_at IS NULL")
        .bind(time::to_db(now))
        .bind(time::to_db(now))
        .bind(session_id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

/// Add points to the running engagement score.
///
/// First statement of the increment transaction; doubles as the ownership
/// check through its rows-affected count, and acquiring the write lock here
/// avoids a read-then-write snapshot upgrade under concurrent increments.
pub async fn add_engagement_points(
    conn: &mut SqliteConnection,
    session_id: Uuid,
    user_id: Uuid,
    points: i64,
    now: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE sessions SET engagement_score = engagement_score + ?, updated_at = ? WHERE guid = ? AND user_id = ?",
    )
    .bind(points)
    .bind(time::to_db(now))
    .bind(session_id.to_string())
    .bind(user_id.to_string())
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

/// Raise the monotonic trigger flags; already-set flags stay set
pub async fn set_trigger_flags(
    conn: &mut SqliteConnection,
    session_id: Uuid,
    quiz_triggered: bool,
    practice_triggered: bool,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE sessions
        SET quiz_triggered = MAX(quiz_triggered, ?),
            practice_triggered = MAX(practice_triggered, ?),
            updated_at = ?
        WHERE guid = ?
        "#,
    )
    .bind(quiz_triggered as i64)
    .bind(practice_triggered as i64)
    .bind(time::to_db(now))
    .bind(session_id.to_string())
    .execute(conn)
    .await?;

    Ok(())
}

/// Set the monotonic practice_completed flag
pub async fn mark_practice_completed(
    pool: &SqlitePool,
    session_id: Uuid,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE sessions SET practice_completed = 1, updated_at = ? WHERE guid = ?")
        .bind(time::to_db(now))
        .bind(session_id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

/// Record the learner's latest stated preference on the session row
pub async fn set_last_preference(
    pool: &SqlitePool,
    session_id: Uuid,
    preference: &str,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE sessions SET last_preference = ?, preference_reason = ?, updated_at = ? WHERE guid = ?",
    )
    .bind(preference)
    .bind(reason)
    .bind(time::to_db(now))
    .bind(session_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Bump the running message count when a tagged reply is stored
pub async fn increment_message_count(pool: &SqlitePool, session_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE sessions SET message_count = message_count + 1 WHERE guid = ?")
        .bind(session_id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}
