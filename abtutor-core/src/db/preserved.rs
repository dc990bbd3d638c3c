//! Preserved-session table operations
//!
//! The continuity record is an opaque keyed store: create, fetch most
//! recent, and touch activity. Its internal structure belongs to the
//! conversation-replay subsystem.

use abtutor_common::db::models::PreservedSession;
use abtutor_common::{time, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

/// Create a new preserved-session record inside the start transaction
pub async fn create(
    conn: &mut SqliteConnection,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<PreservedSession> {
    let preserved = PreservedSession {
        guid: Uuid::new_v4(),
        user_id,
        created_at: now,
        last_activity_at: now,
    };

    sqlx::query(
        "INSERT INTO preserved_sessions (guid, user_id, created_at, last_activity_at) VALUES (?, ?, ?, ?)",
    )
    .bind(preserved.guid.to_string())
    .bind(preserved.user_id.to_string())
    .bind(time::to_db(preserved.created_at))
    .bind(time::to_db(preserved.last_activity_at))
    .execute(conn)
    .await?;

    Ok(preserved)
}

/// Most recently active preserved session for a user
pub async fn fetch_most_recent(pool: &SqlitePool, user_id: Uuid) -> Result<Option<PreservedSession>> {
    let row = sqlx::query(
        r#"
        SELECT guid, user_id, created_at, last_activity_at
        FROM preserved_sessions
        WHERE user_id = ?
        ORDER BY last_activity_at DESC
        LIMIT 1
        "#,
    )
    .bind(user_id.to_string())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let guid: String = row.get("guid");
            let user: String = row.get("user_id");
            let created_at: String = row.get("created_at");
            let last_activity_at: String = row.get("last_activity_at");

            Ok(Some(PreservedSession {
                guid: Uuid::parse_str(&guid)
                    .map_err(|e| abtutor_common::Error::Internal(format!("Failed to parse guid: {}", e)))?,
                user_id: Uuid::parse_str(&user)
                    .map_err(|e| abtutor_common::Error::Internal(format!("Failed to parse user_id: {}", e)))?,
                created_at: time::from_db(&created_at)?,
                last_activity_at: time::from_db(&last_activity_at)?,
            }))
        }
        None => Ok(None),
    }
}

/// Update the activity timestamp on a preserved session
pub async fn touch(pool: &SqlitePool, preserved_id: Uuid, now: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE preserved_sessions SET last_activity_at = ? WHERE guid = ?")
        .bind(time::to_db(now))
        .bind(preserved_id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}
