//! Database models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{Error, Result};

/// Session kind: side-by-side comparison of both models, or a single model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Comparison,
    Single,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Comparison => "comparison",
            SessionKind::Single => "single",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "comparison" => Ok(SessionKind::Comparison),
            "single" => Ok(SessionKind::Single),
            other => Err(Error::InvalidInput(format!("Unknown session kind: {}", other))),
        }
    }
}

/// The learner's stated preference after an activity outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChosenModel {
    ModelA,
    ModelB,
    Both,
    Neither,
}

impl ChosenModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChosenModel::ModelA => "model_a",
            ChosenModel::ModelB => "model_b",
            ChosenModel::Both => "both",
            ChosenModel::Neither => "neither",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "model_a" => Ok(ChosenModel::ModelA),
            "model_b" => Ok(ChosenModel::ModelB),
            "both" => Ok(ChosenModel::Both),
            "neither" => Ok(ChosenModel::Neither),
            other => Err(Error::InvalidInput(format!("Unknown choice value: {}", other))),
        }
    }
}

/// Activity that provoked a preference observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    Quiz,
    Practice,
    CodeExecution,
}

impl InteractionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionType::Quiz => "quiz",
            InteractionType::Practice => "practice",
            InteractionType::CodeExecution => "code_execution",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "quiz" => Ok(InteractionType::Quiz),
            "practice" => Ok(InteractionType::Practice),
            "code_execution" => Ok(InteractionType::CodeExecution),
            other => Err(Error::InvalidInput(format!("Unknown activity type: {}", other))),
        }
    }
}

/// One learner's tutoring engagement window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub guid: Uuid,
    pub user_id: Uuid,
    pub topic_id: Option<Uuid>,
    pub lesson_id: Option<Uuid>,
    pub kind: SessionKind,
    /// AI model identifiers in use for this session
    pub models: Vec<String>,
    pub started_at: DateTime<Utc>,
    /// Null while the session is active
    pub ended_at: Option<DateTime<Utc>>,
    pub message_count: i64,
    pub engagement_score: i64,
    pub quiz_triggered: bool,
    pub practice_triggered: bool,
    pub practice_completed: bool,
    pub last_preference: Option<String>,
    pub preference_reason: Option<String>,
    /// Opaque metadata map; holds the preserved-session back-reference
    pub metadata: Value,
}

impl Session {
    /// Key under which the paired preserved-session id is stored in metadata
    pub const PRESERVED_SESSION_KEY: &'static str = "preserved_session_id";

    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }

    pub fn preserved_session_id(&self) -> Option<Uuid> {
        self.metadata
            .get(Self::PRESERVED_SESSION_KEY)
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}

/// Conversation-continuity record paired 1:1 with a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreservedSession {
    pub guid: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

/// One immutable observation of a learner's AI preference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferenceLog {
    pub guid: Uuid,
    pub user_id: Uuid,
    pub session_id: Option<Uuid>,
    pub topic_id: Option<Uuid>,
    pub interaction_type: InteractionType,
    pub chosen_model: ChosenModel,
    pub reason: Option<String>,
    pub performance_score: f64,
    pub success_rate: f64,
    pub time_spent_seconds: i64,
    pub attempt_count: i64,
    pub difficulty: String,
    /// Interaction-type-specific context payload
    pub context: Value,
    pub caused_by_reply_id: Option<Uuid>,
    pub attributed_model: Option<String>,
    /// Normalized 0-1 confidence; null when attribution is ambiguous
    pub attribution_confidence: Option<f64>,
    pub attribution_delay_seconds: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Quiz attempt, owned by the quiz subsystem; read and attribution-stamped here
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizAttempt {
    pub guid: Uuid,
    pub user_id: Uuid,
    pub quiz_id: Uuid,
    pub topic_id: Option<Uuid>,
    pub score: f64,
    pub max_score: f64,
    pub percentage: f64,
    pub passed: bool,
    pub time_spent_seconds: i64,
    pub attempt_number: i64,
    pub caused_by_reply_id: Option<Uuid>,
    pub attributed_model: Option<String>,
    /// Raw confidence as stamped: a numeric string or a label such as
    /// "explicit" / "temporal"; normalized only when a preference is logged
    pub attribution_confidence: Option<String>,
    pub attribution_delay_seconds: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Practice attempt, owned by the practice subsystem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PracticeAttempt {
    pub guid: Uuid,
    pub user_id: Uuid,
    pub problem_id: Uuid,
    pub topic_id: Option<Uuid>,
    pub is_correct: bool,
    pub points: f64,
    pub complexity_score: f64,
    pub compiler_errors: i64,
    pub runtime_errors: i64,
    pub time_spent_seconds: i64,
    pub attempt_number: i64,
    pub caused_by_reply_id: Option<Uuid>,
    pub attributed_model: Option<String>,
    pub attribution_confidence: Option<String>,
    pub attribution_delay_seconds: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl PracticeAttempt {
    /// Combined compiler + runtime error count used by the analytics engine
    pub fn total_errors(&self) -> i64 {
        self.compiler_errors + self.runtime_errors
    }
}

/// Stored chat response labeled with which AI model generated it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaggedReply {
    pub guid: Uuid,
    pub user_id: Uuid,
    pub session_id: Option<Uuid>,
    /// "model_a" or "model_b"
    pub model_label: String,
    pub message_type: String,
    /// Optional subjective rating left by the learner
    pub rating: Option<i64>,
    pub is_fallback: bool,
    pub latency_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}
