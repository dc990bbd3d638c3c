//! Database initialization
//!
//! Creates the schema idempotently on startup and seeds default settings.
//! Every `CREATE TABLE IF NOT EXISTS` is safe to run against an existing
//! database; new columns require a migration, not an edit here.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// How long a connection waits on the write lock before reporting busy
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // WAL allows concurrent readers with one writer; the analytics engine
    // reads while session writes are in flight. These options apply to every
    // pooled connection, unlike a PRAGMA executed through the pool.
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    init_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables and seed default settings.
///
/// Split out from [`init_database`] so tests can run it against an
/// already-connected pool.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    create_settings_table(pool).await?;
    create_sessions_table(pool).await?;
    create_preserved_sessions_table(pool).await?;
    create_preference_logs_table(pool).await?;
    create_quiz_attempts_table(pool).await?;
    create_practice_attempts_table(pool).await?;
    create_tagged_replies_table(pool).await?;

    init_default_settings(pool).await?;

    Ok(())
}

/// Create the settings table
///
/// Stores application configuration key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the sessions table
///
/// One row per tutoring engagement window. `ended_at` is NULL while active;
/// at most one active row per (user_id, lesson_id) when lesson_id is set.
pub async fn create_sessions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            guid TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            topic_id TEXT,
            lesson_id TEXT,
            kind TEXT NOT NULL CHECK (kind IN ('comparison', 'single')),
            models TEXT NOT NULL,
            started_at TEXT NOT NULL,
            ended_at TEXT,
            message_count INTEGER NOT NULL DEFAULT 0,
            engagement_score INTEGER NOT NULL DEFAULT 0,
            quiz_triggered INTEGER NOT NULL DEFAULT 0,
            practice_triggered INTEGER NOT NULL DEFAULT 0,
            practice_completed INTEGER NOT NULL DEFAULT 0,
            last_preference TEXT,
            preference_reason TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            CHECK (engagement_score >= 0),
            CHECK (message_count >= 0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_user_lesson ON sessions(user_id, lesson_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_user_active ON sessions(user_id, ended_at)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the preserved_sessions table
///
/// Conversation-continuity records paired 1:1 with sessions. The session
/// references the preserved record through its metadata, never the reverse.
pub async fn create_preserved_sessions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS preserved_sessions (
            guid TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            last_activity_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_preserved_sessions_user ON preserved_sessions(user_id, last_activity_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the preference_logs table
///
/// Insert-only; one row per learner choice event.
pub async fn create_preference_logs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS preference_logs (
            guid TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            session_id TEXT,
            topic_id TEXT,
            interaction_type TEXT NOT NULL CHECK (interaction_type IN ('quiz', 'practice', 'code_execution')),
            chosen_model TEXT NOT NULL CHECK (chosen_model IN ('model_a', 'model_b', 'both', 'neither')),
            reason TEXT,
            performance_score REAL NOT NULL DEFAULT 0,
            success_rate REAL NOT NULL DEFAULT 0,
            time_spent_seconds INTEGER NOT NULL DEFAULT 0,
            attempt_count INTEGER NOT NULL DEFAULT 1,
            difficulty TEXT NOT NULL DEFAULT 'medium',
            context TEXT NOT NULL DEFAULT '{}',
            caused_by_reply_id TEXT,
            attributed_model TEXT,
            attribution_confidence REAL,
            attribution_delay_seconds INTEGER,
            created_at TEXT NOT NULL,
            CHECK (performance_score >= 0 AND performance_score <= 100),
            CHECK (success_rate >= 0 AND success_rate <= 100),
            CHECK (attempt_count >= 1),
            CHECK (attribution_confidence IS NULL OR (attribution_confidence >= 0 AND attribution_confidence <= 1)),
            CHECK (attribution_delay_seconds IS NULL OR attribution_delay_seconds >= 0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_preference_logs_user ON preference_logs(user_id, created_at)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the quiz_attempts table
pub async fn create_quiz_attempts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS quiz_attempts (
            guid TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            quiz_id TEXT NOT NULL,
            topic_id TEXT,
            score REAL NOT NULL DEFAULT 0,
            max_score REAL NOT NULL DEFAULT 0,
            percentage REAL NOT NULL DEFAULT 0,
            passed INTEGER NOT NULL DEFAULT 0,
            time_spent_seconds INTEGER NOT NULL DEFAULT 0,
            attempt_number INTEGER NOT NULL DEFAULT 1,
            caused_by_reply_id TEXT,
            attributed_model TEXT,
            attribution_confidence TEXT,
            attribution_delay_seconds INTEGER,
            created_at TEXT NOT NULL,
            CHECK (attempt_number >= 1)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_quiz_attempts_user ON quiz_attempts(user_id, created_at)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the practice_attempts table
pub async fn create_practice_attempts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS practice_attempts (
            guid TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            problem_id TEXT NOT NULL,
            topic_id TEXT,
            is_correct INTEGER NOT NULL DEFAULT 0,
            points REAL NOT NULL DEFAULT 0,
            complexity_score REAL NOT NULL DEFAULT 0,
            compiler_errors INTEGER NOT NULL DEFAULT 0,
            runtime_errors INTEGER NOT NULL DEFAULT 0,
            time_spent_seconds INTEGER NOT NULL DEFAULT 0,
            attempt_number INTEGER NOT NULL DEFAULT 1,
            caused_by_reply_id TEXT,
            attributed_model TEXT,
            attribution_confidence TEXT,
            attribution_delay_seconds INTEGER,
            created_at TEXT NOT NULL,
            CHECK (attempt_number >= 1),
            CHECK (compiler_errors >= 0),
            CHECK (runtime_errors >= 0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_practice_attempts_user ON practice_attempts(user_id, created_at)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the tagged_replies table
///
/// Chat responses labeled with the model that produced them. Written by the
/// chat pipeline; read by attribution and the analytics engine.
pub async fn create_tagged_replies_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tagged_replies (
            guid TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            session_id TEXT,
            model_label TEXT NOT NULL,
            message_type TEXT NOT NULL DEFAULT 'chat',
            rating INTEGER,
            is_fallback INTEGER NOT NULL DEFAULT 0,
            latency_ms INTEGER,
            created_at TEXT NOT NULL,
            CHECK (rating IS NULL OR (rating >= 1 AND rating <= 5))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tagged_replies_user ON tagged_replies(user_id, created_at)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tagged_replies_session ON tagged_replies(session_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Initialize or update default settings
///
/// Ensures all required settings exist with default values and resets NULL
/// values back to defaults.
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    // Engagement trigger policy
    ensure_setting(pool, "engagement_quiz_threshold", "40").await?;
    ensure_setting(pool, "engagement_practice_threshold", "25").await?;

    info!("Default settings initialized");
    Ok(())
}

/// Ensure a setting exists with the specified default value
///
/// If the setting doesn't exist, it will be created with the default.
/// If the setting exists but has a NULL value, it will be reset to the default.
async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM settings WHERE key = ?)")
        .bind(key)
        .fetch_one(pool)
        .await?;

    if !exists {
        // INSERT OR IGNORE handles concurrent initialization races; multiple
        // connections may pass the exists check simultaneously
        sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(default_value)
            .execute(pool)
            .await?;

        info!("Initialized setting '{}' with default value: {}", key, default_value);
        return Ok(());
    }

    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_one(pool)
        .await?;

    if value.is_none() {
        sqlx::query("UPDATE settings SET value = ? WHERE key = ?")
            .bind(default_value)
            .bind(key)
            .execute(pool)
            .await?;

        warn!("Setting '{}' was NULL, reset to default: {}", key, default_value);
    }

    Ok(())
}
