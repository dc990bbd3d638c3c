//! Tagged-reply table operations
//!
//! Replies are written by the chat pipeline when a model response is stored;
//! this module is the read path for attribution and analytics plus the
//! insert used when a reply lands.

use abtutor_common::db::models::TaggedReply;
use abtutor_common::{time, Error, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

fn reply_from_row(row: &SqliteRow) -> Result<TaggedReply> {
    let guid: String = row.get("guid");
    let user_id: String = row.get("user_id");
    let session_id: Option<String> = row.get("session_id");
    let created_at: String = row.get("created_at");

    Ok(TaggedReply {
        guid: Uuid::parse_str(&guid)
            .map_err(|e| Error::Internal(format!("Failed to parse guid: {}", e)))?,
        user_id: Uuid::parse_str(&user_id)
            .map_err(|e| Error::Internal(format!("Failed to parse user_id: {}", e)))?,
        session_id: session_id
            .map(|s| Uuid::parse_str(&s))
            .transpose()
            .map_err(|e| Error::Internal(format!("Failed to parse session_id: {}", e)))?,
        model_label: row.get("model_label"),
        message_type: row.get("message_type"),
        rating: row.get("rating"),
        is_fallback: row.get::<i64, _>("is_fallback") != 0,
        latency_ms: row.get("latency_ms"),
        created_at: time::from_db(&created_at)?,
    })
}

const REPLY_COLUMNS: &str =
    "guid, user_id, session_id, model_label, message_type, rating, is_fallback, latency_ms, created_at";

/// Store a tagged reply and bump the owning session's message count
pub async fn insert_reply(pool: &SqlitePool, reply: &TaggedReply) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO tagged_replies (
            guid, user_id, session_id, model_label, message_type,
            rating, is_fallback, latency_ms, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(reply.guid.to_string())
    .bind(reply.user_id.to_string())
    .bind(reply.session_id.map(|id| id.to_string()))
    .bind(&reply.model_label)
    .bind(&reply.message_type)
    .bind(reply.rating)
    .bind(reply.is_fallback as i64)
    .bind(reply.latency_ms)
    .bind(time::to_db(reply.created_at))
    .execute(pool)
    .await?;

    if let Some(session_id) = reply.session_id {
        super::sessions::increment_message_count(pool, session_id).await?;
    }

    Ok(())
}

/// Load a reply by id, scoped to its owner
pub async fn get_reply_for_user(
    pool: &SqlitePool,
    reply_id: Uuid,
    user_id: Uuid,
) -> Result<Option<TaggedReply>> {
    let sql = format!("SELECT {} FROM tagged_replies WHERE guid = ? AND user_id = ?", REPLY_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(reply_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(reply_from_row).transpose()
}

/// The user's most recent tagged reply
pub async fn latest_reply_for_user(pool: &SqlitePool, user_id: Uuid) -> Result<Option<TaggedReply>> {
    let sql = format!(
        "SELECT {} FROM tagged_replies WHERE user_id = ? ORDER BY created_at DESC LIMIT 1",
        REPLY_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(user_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(reply_from_row).transpose()
}

/// Most recent tagged reply within a session
pub async fn latest_reply_in_session(
    pool: &SqlitePool,
    session_id: Uuid,
) -> Result<Option<TaggedReply>> {
    let sql = format!(
        "SELECT {} FROM tagged_replies WHERE session_id = ? ORDER BY created_at DESC LIMIT 1",
        REPLY_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(session_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(reply_from_row).transpose()
}

/// Tagged replies since `window_start`, optionally scoped to one user,
/// ordered by time
pub async fn replies_in_window(
    pool: &SqlitePool,
    user_id: Option<Uuid>,
    window_start: DateTime<Utc>,
) -> Result<Vec<TaggedReply>> {
    let rows = match user_id {
        Some(user) => {
            let sql = format!(
                "SELECT {} FROM tagged_replies WHERE user_id = ? AND created_at >= ? ORDER BY created_at ASC",
                REPLY_COLUMNS
            );
            sqlx::query(&sql)
                .bind(user.to_string())
                .bind(time::to_db(window_start))
                .fetch_all(pool)
                .await?
        }
        None => {
            let sql = format!(
                "SELECT {} FROM tagged_replies WHERE created_at >= ? ORDER BY created_at ASC",
                REPLY_COLUMNS
            );
            sqlx::query(&sql)
                .bind(time::to_db(window_start))
                .fetch_all(pool)
                .await?
        }
    };

    rows.iter().map(reply_from_row).collect()
}
