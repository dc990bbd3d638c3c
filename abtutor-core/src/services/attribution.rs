//! Preference attribution
//!
//! Binds an activity outcome back to the tagged reply that provoked it.
//! Explicit attribution (the client names the reply) ranks above temporal
//! attribution (most recent reply within the recency window); anything else
//! stays unattributed and resolves to null confidence downstream.

use abtutor_common::db::models::{InteractionType, PracticeAttempt, QuizAttempt, TaggedReply};
use abtutor_common::{time, Result};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::{attempts, replies};

/// How far back a reply can be and still claim a fresh outcome
pub const RECENCY_WINDOW_MINUTES: i64 = 60;

/// Attribution stamp carried by attempts and preference logs.
///
/// `confidence` holds the raw stamped value (a label such as "explicit" or
/// "temporal", or a numeric string); [`resolve_confidence`] normalizes it to
/// a 0-1 decimal when the preference observation is written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributionFields {
    pub caused_by_reply_id: Option<Uuid>,
    pub attributed_model: Option<String>,
    pub confidence: Option<String>,
    pub delay_seconds: Option<i64>,
}

impl AttributionFields {
    pub fn is_attributed(&self) -> bool {
        self.caused_by_reply_id.is_some()
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

fn confidence_for_label(label: &str) -> Option<f64> {
    match label {
        "very_high" => Some(0.95),
        "high" => Some(0.85),
        "explicit" => Some(0.85),
        "strong" => Some(0.80),
        "medium" => Some(0.60),
        "temporal" => Some(0.60),
        "weak" => Some(0.40),
        "low" => Some(0.35),
        "very_low" => Some(0.20),
        _ => None,
    }
}

/// Normalize a raw confidence value to a 0-1 decimal.
///
/// Numeric input is rounded to 4 decimals; recognized labels map through a
/// fixed table; anything else is null (ambiguous attribution is not an
/// error).
pub fn resolve_confidence(raw: Option<&Value>) -> Option<f64> {
    let raw = raw?;

    if let Some(n) = raw.as_f64() {
        return Some(round4(n));
    }

    if let Some(s) = raw.as_str() {
        let s = s.trim();
        if let Some(mapped) = confidence_for_label(&s.to_lowercase()) {
            return Some(mapped);
        }
        if let Ok(n) = s.parse::<f64>() {
            return Some(round4(n));
        }
    }

    None
}

/// Normalize a raw attribution delay to non-negative whole seconds
pub fn normalize_delay(raw: Option<&Value>) -> Option<i64> {
    let raw = raw?;
    let n = raw
        .as_f64()
        .or_else(|| raw.as_str().and_then(|s| s.trim().parse::<f64>().ok()))?;

    Some(n.max(0.0).trunc() as i64)
}

/// Attribution for a brand-new attempt.
///
/// When the client names the reply that prompted the attempt, stamp it with
/// explicit confidence and zero delay. Otherwise leave the attempt
/// unattributed; submission-time temporal attribution may still claim it.
pub async fn attribute_at_start(
    pool: &SqlitePool,
    user_id: Uuid,
    explicit_reply_id: Option<Uuid>,
) -> Result<AttributionFields> {
    let Some(reply_id) = explicit_reply_id else {
        return Ok(AttributionFields::default());
    };

    match replies::get_reply_for_user(pool, reply_id, user_id).await? {
        Some(reply) => Ok(AttributionFields {
            caused_by_reply_id: Some(reply.guid),
            attributed_model: Some(reply.model_label),
            confidence: Some("explicit".to_string()),
            delay_seconds: Some(0),
        }),
        None => {
            tracing::warn!(user_id = %user_id, reply_id = %reply_id, "Explicit reply not found for user, leaving unattributed");
            Ok(AttributionFields::default())
        }
    }
}

/// Temporal attribution candidate: the user's most recent reply, if it falls
/// within the recency window of `now`
async fn temporal_attribution(
    pool: &SqlitePool,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<AttributionFields>> {
    let Some(reply) = replies::latest_reply_for_user(pool, user_id).await? else {
        return Ok(None);
    };

    let age = now - reply.created_at;
    if age.num_minutes() >= RECENCY_WINDOW_MINUTES {
        return Ok(None);
    }

    Ok(Some(AttributionFields {
        caused_by_reply_id: Some(reply.guid),
        attributed_model: Some(reply.model_label),
        confidence: Some("temporal".to_string()),
        delay_seconds: Some(age.num_seconds().max(0)),
    }))
}

/// Resolve attribution for a quiz attempt at submission time.
///
/// No-op if the attempt was already stamped at start.
pub async fn attribute_quiz_at_submit(pool: &SqlitePool, attempt: &QuizAttempt) -> Result<AttributionFields> {
    if attempt.caused_by_reply_id.is_some() {
        return Ok(AttributionFields {
            caused_by_reply_id: attempt.caused_by_reply_id,
            attributed_model: attempt.attributed_model.clone(),
            confidence: attempt.attribution_confidence.clone(),
            delay_seconds: attempt.attribution_delay_seconds,
        });
    }

    match temporal_attribution(pool, attempt.user_id, time::now()).await? {
        Some(fields) => {
            attempts::stamp_quiz_attribution(pool, attempt.guid, &fields).await?;
            Ok(fields)
        }
        None => Ok(AttributionFields::default()),
    }
}

/// Resolve attribution for a practice attempt at submission time
pub async fn attribute_practice_at_submit(
    pool: &SqlitePool,
    attempt: &PracticeAttempt,
) -> Result<AttributionFields> {
    if attempt.caused_by_reply_id.is_some() {
        return Ok(AttributionFields {
            caused_by_reply_id: attempt.caused_by_reply_id,
            attributed_model: attempt.attributed_model.clone(),
            confidence: attempt.attribution_confidence.clone(),
            delay_seconds: attempt.attribution_delay_seconds,
        });
    }

    match temporal_attribution(pool, attempt.user_id, time::now()).await? {
        Some(fields) => {
            attempts::stamp_practice_attribution(pool, attempt.guid, &fields).await?;
            Ok(fields)
        }
        None => Ok(AttributionFields::default()),
    }
}

/// Metrics extracted from the outcome that provoked a preference choice.
///
/// All fields are optional; absence means the caller supplies defaults.
#[derive(Debug, Clone)]
pub struct PerformanceMetrics {
    pub performance_score: Option<f64>,
    pub success_rate: Option<f64>,
    pub time_spent_seconds: Option<i64>,
    pub attempt_count: Option<i64>,
    pub context: Value,
    pub attribution: AttributionFields,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self {
            performance_score: None,
            success_rate: None,
            time_spent_seconds: None,
            attempt_count: None,
            context: json!({}),
            attribution: AttributionFields::default(),
        }
    }
}

/// The outcome variant behind a preference choice
#[derive(Debug, Clone)]
pub enum ActivityOutcome {
    Quiz(QuizAttempt),
    Practice(PracticeAttempt),
    /// Code execution carries no attempt row of its own; the most recent
    /// tagged reply in the session stands in, when one exists
    CodeExecution(Option<TaggedReply>),
}

impl ActivityOutcome {
    /// Extract the metrics and context payload for this outcome variant
    pub fn extract_metrics(&self) -> PerformanceMetrics {
        match self {
            ActivityOutcome::Quiz(attempt) => PerformanceMetrics {
                performance_score: Some(attempt.percentage.clamp(0.0, 100.0)),
                success_rate: Some(attempt.percentage.clamp(0.0, 100.0)),
                time_spent_seconds: Some(attempt.time_spent_seconds),
                attempt_count: Some(attempt.attempt_number),
                context: json!({
                    "quiz_id": attempt.quiz_id,
                    "score": attempt.score,
                    "max_score": attempt.max_score,
                    "passed": attempt.passed,
                }),
                attribution: AttributionFields {
                    caused_by_reply_id: attempt.caused_by_reply_id,
                    attributed_model: attempt.attributed_model.clone(),
                    confidence: attempt.attribution_confidence.clone(),
                    delay_seconds: attempt.attribution_delay_seconds,
                },
            },
            ActivityOutcome::Practice(attempt) => PerformanceMetrics {
                performance_score: Some(attempt.points.clamp(0.0, 100.0)),
                success_rate: Some(if attempt.is_correct { 100.0 } else { 0.0 }),
                time_spent_seconds: Some(attempt.time_spent_seconds),
                attempt_count: Some(attempt.attempt_number),
                context: json!({
                    "problem_id": attempt.problem_id,
                    "is_correct": attempt.is_correct,
                    "points_earned": attempt.points,
                    "complexity_score": attempt.complexity_score,
                }),
                attribution: AttributionFields {
                    caused_by_reply_id: attempt.caused_by_reply_id,
                    attributed_model: attempt.attributed_model.clone(),
                    confidence: attempt.attribution_confidence.clone(),
                    delay_seconds: attempt.attribution_delay_seconds,
                },
            },
            ActivityOutcome::CodeExecution(reply) => match reply {
                Some(reply) => PerformanceMetrics {
                    context: json!({
                        "message_id": reply.guid,
                        "message_type": reply.message_type,
                    }),
                    // The reply names the model but carries no outcome, so
                    // the confidence stays null (ambiguous, not an error)
                    attribution: AttributionFields {
                        caused_by_reply_id: Some(reply.guid),
                        attributed_model: Some(reply.model_label.clone()),
                        confidence: None,
                        delay_seconds: None,
                    },
                    ..PerformanceMetrics::default()
                },
                None => PerformanceMetrics::default(),
            },
        }
    }
}

/// Gather metrics for the user's most recent outcome of `activity_type`.
///
/// Quiz and practice read the latest attempt (optionally scoped to a topic);
/// code execution falls back to the session's most recent tagged reply.
/// Absence yields an all-null metrics value, never an error.
pub async fn metrics_for_activity(
    pool: &SqlitePool,
    user_id: Uuid,
    activity_type: InteractionType,
    topic_id: Option<Uuid>,
    session_id: Option<Uuid>,
) -> Result<PerformanceMetrics> {
    let outcome = match activity_type {
        InteractionType::Quiz => attempts::latest_quiz_attempt(pool, user_id, topic_id)
            .await?
            .map(ActivityOutcome::Quiz),
        InteractionType::Practice => attempts::latest_practice_attempt(pool, user_id, topic_id)
            .await?
            .map(ActivityOutcome::Practice),
        InteractionType::CodeExecution => {
            let reply = match session_id {
                Some(session) => replies::latest_reply_in_session(pool, session).await?,
                None => None,
            };
            Some(ActivityOutcome::CodeExecution(reply))
        }
    };

    Ok(outcome.map(|o| o.extract_metrics()).unwrap_or_default())
}
