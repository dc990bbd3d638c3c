//! Session lifecycle management
//!
//! Creates, reactivates, and ends tutoring sessions under the
//! single-active-session invariant, and tracks per-session engagement with
//! monotonic quiz/practice trigger flags.
//!
//! The start flow runs inside one write transaction whose first statement is
//! an UPDATE against the user's session rows; under SQLite's single-writer
//! model that serializes concurrent starts for the same user before any
//! state is read, so two racing calls cannot both create a session for the
//! same (user, lesson).

use abtutor_common::db::models::{Session, SessionKind};
use abtutor_common::db::retry::retry_on_lock;
use abtutor_common::{time, Error, Result, TriggerPolicy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::db::{preserved, sessions};

/// Inputs to session start
#[derive(Debug, Clone)]
pub struct StartSessionParams {
    pub user_id: Uuid,
    pub topic_id: Option<Uuid>,
    pub lesson_id: Option<Uuid>,
    pub kind: SessionKind,
    pub models: Vec<String>,
}

/// What the caller gets back from start: enough to address the session and
/// its paired continuity record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHandle {
    pub session_id: Uuid,
    pub preserved_session_id: Option<Uuid>,
    pub kind: SessionKind,
    pub models: Vec<String>,
    pub started_at: DateTime<Utc>,
    /// True when a previously-ended session was brought back instead of a
    /// new row being created
    pub reactivated: bool,
}

/// Final accounting returned when a session ends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndSessionReport {
    pub session_id: Uuid,
    pub duration_seconds: i64,
    pub message_count: i64,
    pub engagement_score: i64,
}

/// Progress toward one trigger threshold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerStatus {
    pub threshold: i64,
    pub triggered: bool,
    pub progress_percent: i64,
}

/// Snapshot of both triggers for client progress UI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdStatus {
    pub engagement_score: i64,
    pub quiz: TriggerStatus,
    pub practice: TriggerStatus,
}

/// Result of an engagement increment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementUpdate {
    pub engagement_score: i64,
    pub quiz_triggered: bool,
    pub practice_triggered: bool,
    /// True only on the call that first crossed the threshold
    pub quiz_newly_triggered: bool,
    pub practice_newly_triggered: bool,
    pub status: ThresholdStatus,
}

/// Session lifecycle operations
#[derive(Clone)]
pub struct SessionManager {
    pool: SqlitePool,
    policy: TriggerPolicy,
}

impl SessionManager {
    pub fn new(pool: SqlitePool, policy: TriggerPolicy) -> Self {
        Self { pool, policy }
    }

    /// Start (or resume) a tutoring session.
    ///
    /// Lesson-scoped starts enforce one active session per user: other
    /// lessons' active sessions are ended, an existing active session for
    /// this lesson is returned unchanged, and a previously-ended one is
    /// reactivated with its history and engagement score intact. Starts
    /// without a lesson always create a fresh session/preserved pair.
    ///
    /// Lock contention gets one internal retry, then surfaces as Conflict.
    pub async fn start(&self, params: &StartSessionParams) -> Result<SessionHandle> {
        retry_on_lock("start_session", || self.start_once(params)).await
    }

    async fn start_once(&self, params: &StartSessionParams) -> Result<SessionHandle> {
        let now = time::now();
        let mut tx = self.pool.begin().await?;

        if let Some(lesson_id) = params.lesson_id {
            // First write acquires the database write lock; every concurrent
            // start for this user queues behind it from here on.
            let ended = sessions::end_other_lesson_sessions(&mut *tx, params.user_id, lesson_id, now).await?;
            if ended > 0 {
                info!(user_id = %params.user_id, ended, "Ended other active lesson sessions");
            }

            // Re-check under the lock: a racing call may have already won
            if let Some(existing) = sessions::find_active_for_lesson(&mut *tx, params.user_id, lesson_id).await? {
                tx.commit().await?;
                info!(session_id = %existing.guid, "Returning already-active session");
                return Ok(handle_from(&existing, false));
            }

            // Prefer reactivating the most recently ended session so history
            // and accumulated engagement survive
            if let Some(prior) = sessions::find_most_recent_ended(&mut *tx, params.user_id, lesson_id).await? {
                sessions::reactivate_session(&mut *tx, prior.guid, now).await?;
                tx.commit().await?;

                if let Some(preserved_id) = prior.preserved_session_id() {
                    preserved::touch(&self.pool, preserved_id, now).await?;
                }

                info!(session_id = %prior.guid, user_id = %params.user_id, "Reactivated ended session");
                return Ok(handle_from(&prior, true));
            }
        }

        // Fresh session plus its paired preserved record, linked via metadata
        let preserved = preserved::create(&mut *tx, params.user_id, now).await?;
        let session = Session {
            guid: Uuid::new_v4(),
            user_id: params.user_id,
            topic_id: params.topic_id,
            lesson_id: params.lesson_id,
            kind: params.kind,
            models: params.models.clone(),
            started_at: now,
            ended_at: None,
            message_count: 0,
            engagement_score: 0,
            quiz_triggered: false,
            practice_triggered: false,
            practice_completed: false,
            last_preference: None,
            preference_reason: None,
            metadata: json!({ (Session::PRESERVED_SESSION_KEY): preserved.guid.to_string() }),
        };
        sessions::insert_session(&mut *tx, &session).await?;
        tx.commit().await?;

        info!(session_id = %session.guid, user_id = %params.user_id, kind = session.kind.as_str(), "Started new session");
        Ok(handle_from(&session, false))
    }

    /// End a session and report its final accounting
    pub async fn end(&self, session_id: Uuid, user_id: Uuid) -> Result<EndSessionReport> {
        let session = self.owned_session(session_id, user_id).await?;

        let now = time::now();
        let ended_at = match session.ended_at {
            Some(already_ended) => already_ended,
            None => {
                sessions::end_session(&self.pool, session_id, now).await?;
                info!(session_id = %session_id, "Ended session");
                now
            }
        };

        Ok(EndSessionReport {
            session_id,
            duration_seconds: (ended_at - session.started_at).num_seconds().max(0),
            message_count: session.message_count,
            engagement_score: session.engagement_score,
        })
    }

    /// Add engagement points and evaluate the trigger predicates.
    ///
    /// Each trigger flag is monotonic: it is reported as newly triggered on
    /// the call that first crosses its threshold and stays set afterwards.
    pub async fn increment_engagement(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        points: i64,
    ) -> Result<EngagementUpdate> {
        if !(1..=10).contains(&points) {
            return Err(Error::InvalidInput(format!(
                "Engagement points must be between 1 and 10, got {}",
                points
            )));
        }

        let now = time::now();
        let mut tx = self.pool.begin().await?;

        // Write first: takes the write lock and doubles as the ownership
        // check. Dropping the transaction on NotFound rolls the add back.
        let updated = sessions::add_engagement_points(&mut *tx, session_id, user_id, points, now).await?;
        if updated == 0 {
            return Err(Error::NotFound(format!("Session {} not found", session_id)));
        }

        // Re-read under the lock: score already incremented, flags untouched
        let session = sessions::find_session_for_update(&mut *tx, session_id, user_id)
            .await?
            .ok_or_else(|| Error::Internal(format!("Session {} vanished mid-update", session_id)))?;

        let new_score = session.engagement_score;
        let quiz_should = self.should_trigger_quiz(new_score);
        let practice_should = self.should_trigger_practice(new_score);

        let quiz_newly = quiz_should && !session.quiz_triggered;
        let practice_newly = practice_should && !session.practice_triggered;

        sessions::set_trigger_flags(&mut *tx, session_id, quiz_should, practice_should, now).await?;
        tx.commit().await?;

        if let Some(preserved_id) = session.preserved_session_id() {
            preserved::touch(&self.pool, preserved_id, now).await?;
        }

        if quiz_newly {
            info!(session_id = %session_id, score = new_score, "Quiz trigger crossed");
        }
        if practice_newly {
            info!(session_id = %session_id, score = new_score, "Practice trigger crossed");
        }

        let quiz_triggered = session.quiz_triggered || quiz_should;
        let practice_triggered = session.practice_triggered || practice_should;

        Ok(EngagementUpdate {
            engagement_score: new_score,
            quiz_triggered,
            practice_triggered,
            quiz_newly_triggered: quiz_newly,
            practice_newly_triggered: practice_newly,
            status: self.status_snapshot(new_score, quiz_triggered, practice_triggered),
        })
    }

    /// Record that the learner finished a practice exercise in this session.
    ///
    /// The flag is monotonic; marking an already-completed session is a no-op.
    pub async fn complete_practice(&self, session_id: Uuid, user_id: Uuid) -> Result<()> {
        let session = self.owned_session(session_id, user_id).await?;
        if !session.practice_completed {
            sessions::mark_practice_completed(&self.pool, session_id, time::now()).await?;
            info!(session_id = %session_id, "Practice completed");
        }
        Ok(())
    }

    /// Threshold/trigger snapshot for client progress UI
    pub async fn threshold_status(&self, session_id: Uuid, user_id: Uuid) -> Result<ThresholdStatus> {
        let session = self.owned_session(session_id, user_id).await?;
        Ok(self.status_snapshot(
            session.engagement_score,
            session.quiz_triggered,
            session.practice_triggered,
        ))
    }

    /// Most recently started active session for a user
    pub async fn active_session(&self, user_id: Uuid) -> Result<Option<Session>> {
        sessions::get_active_session(&self.pool, user_id).await
    }

    /// Load a session, verifying ownership
    pub async fn owned_session(&self, session_id: Uuid, user_id: Uuid) -> Result<Session> {
        sessions::get_session_for_user(&self.pool, session_id, user_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Session {} not found", session_id)))
    }

    fn should_trigger_quiz(&self, engagement_score: i64) -> bool {
        engagement_score >= self.policy.quiz_threshold
    }

    fn should_trigger_practice(&self, engagement_score: i64) -> bool {
        engagement_score >= self.policy.practice_threshold
    }

    fn status_snapshot(&self, score: i64, quiz_triggered: bool, practice_triggered: bool) -> ThresholdStatus {
        ThresholdStatus {
            engagement_score: score,
            quiz: TriggerStatus {
                threshold: self.policy.quiz_threshold,
                triggered: quiz_triggered,
                progress_percent: progress_percent(score, self.policy.quiz_threshold),
            },
            practice: TriggerStatus {
                threshold: self.policy.practice_threshold,
                triggered: practice_triggered,
                progress_percent: progress_percent(score, self.policy.practice_threshold),
            },
        }
    }
}

fn progress_percent(score: i64, threshold: i64) -> i64 {
    if threshold <= 0 {
        return 100;
    }
    (score * 100 / threshold).min(100)
}

fn handle_from(session: &Session, reactivated: bool) -> SessionHandle {
    SessionHandle {
        session_id: session.guid,
        preserved_session_id: session.preserved_session_id(),
        kind: session.kind,
        models: session.models.clone(),
        started_at: session.started_at,
        reactivated,
    }
}
