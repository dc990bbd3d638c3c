//! Deterministic scoring formulas
//!
//! Pure functions consumed as raw signal by the analytics engine and the
//! practice flow. Malformed input is tolerated as zero rather than rejected.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Simplified Java method signature: optional visibility, optional static,
/// return type, name, parameter list, opening brace.
static METHOD_SIGNATURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)\b(?:(?:public|private|protected)\s+)?(?:static\s+)?[A-Za-z_][\w<>\[\]]*\s+[A-Za-z_]\w*\s*\([^)]*\)\s*\{",
    )
    .expect("method signature regex is valid")
});

static CLASS_KEYWORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bclass\s+\w+").expect("class keyword regex is valid"));

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Structural complexity estimate for a submitted code snippet.
///
/// min(lines/10, 2) + class bonus + min(method count, 2), rounded to two
/// decimals. Tops out at 5.0 for a large multi-method class.
pub fn code_complexity(source: &str) -> f64 {
    let lines = source.lines().filter(|l| !l.trim().is_empty()).count() as f64;
    let class_bonus = if CLASS_KEYWORD.is_match(source) { 1.0 } else { 0.0 };
    let methods = METHOD_SIGNATURE.find_iter(source).count() as f64;

    round2((lines / 10.0).min(2.0) + class_bonus + methods.min(2.0))
}

/// Reward points for a code execution outcome.
///
/// Successful runs earn 4 base points plus complexity, capped at 8; failed
/// runs earn a single participation point.
pub fn execution_reward(success: bool, complexity: f64) -> i64 {
    if success {
        (4.0 + complexity).min(8.0).floor() as i64
    } else {
        1
    }
}

/// One point per ten minutes of study time
pub fn time_points(total_minutes: i64) -> i64 {
    if total_minutes <= 0 {
        0
    } else {
        total_minutes / 10
    }
}

/// Capped component breakdown of a learner's weighted progress
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightedProgress {
    pub interaction: i64,
    pub code: i64,
    pub time: i64,
    pub quiz: i64,
    pub total: i64,
    pub overall: i64,
}

/// Combine raw progress signals into a 0-100 progress figure.
///
/// Component caps: interaction 30, code 40, time 5, quiz 30.
pub fn weighted_progress(interaction: i64, code: i64, time: i64, quiz: i64) -> WeightedProgress {
    let interaction = interaction.clamp(0, 30);
    let code = code.clamp(0, 40);
    let time = time.clamp(0, 5);
    let quiz = quiz.clamp(0, 30);
    let total = interaction + code + time + quiz;

    WeightedProgress {
        interaction,
        code,
        time,
        quiz,
        total,
        overall: total.min(100),
    }
}

/// Weights for the composite performance score
#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
            gamma: 1.0,
        }
    }
}

/// α·quiz + β·code-success − γ·error-rate, rounded to two decimals
pub fn performance_score(
    quiz_score: f64,
    code_success_rate: f64,
    error_rate: f64,
    weights: ScoreWeights,
) -> f64 {
    round2(weights.alpha * quiz_score + weights.beta * code_success_rate - weights.gamma * error_rate)
}

/// Recommendation for the next problem's difficulty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyAdjustment {
    Increase,
    Decrease,
    Same,
}

/// Decide the next difficulty from a performance score
pub fn next_difficulty(score: f64, high: f64, low: f64) -> DifficultyAdjustment {
    if score >= high {
        DifficultyAdjustment::Increase
    } else if score < low {
        DifficultyAdjustment::Decrease
    } else {
        DifficultyAdjustment::Same
    }
}
