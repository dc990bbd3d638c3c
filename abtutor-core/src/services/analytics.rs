//! Comparative analytics engine
//!
//! Windowed, event-anchored, paired-difference comparison of the two models'
//! effect on learning outcomes. Each tagged reply anchors an effect window;
//! practice and quiz attempts around the anchor produce one observation per
//! reply, aggregated per (user, model) and paired within users who used both
//! models. Missing data degrades to empty/null results, never an error.

use std::collections::BTreeMap;

use abtutor_common::db::models::{PracticeAttempt, QuizAttempt, TaggedReply};
use abtutor_common::{time, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::{attempts, replies};

pub const DEFAULT_WINDOW_DAYS: i64 = 30;
pub const DEFAULT_BASELINE_K: usize = 3;
pub const DEFAULT_LOOKAHEAD_MINUTES: i64 = 30;

/// Quiz gain compares the 24h after the anchor against the 7 days before it
const QUIZ_POST_HOURS: i64 = 24;
const QUIZ_BASELINE_DAYS: i64 = 7;

pub const MODEL_A: &str = "model_a";
pub const MODEL_B: &str = "model_b";

/// Inputs to a comparison run
#[derive(Debug, Clone)]
pub struct CompareParams {
    /// Scope to one learner, or None for all learners with replies in window
    pub user_id: Option<Uuid>,
    /// Duration string: "Nd" days or "Nw" weeks; unparseable falls back to 30d
    pub window: Option<String>,
    /// Baseline size: practice attempts considered before each anchor
    pub baseline_k: usize,
    pub lookahead_minutes: i64,
}

impl Default for CompareParams {
    fn default() -> Self {
        Self {
            user_id: None,
            window: None,
            baseline_k: DEFAULT_BASELINE_K,
            lookahead_minutes: DEFAULT_LOOKAHEAD_MINUTES,
        }
    }
}

/// One per-reply effect observation
#[derive(Debug, Clone)]
struct ReplyObservation {
    user_id: Uuid,
    model_label: String,
    /// 1.0 if the first post-anchor practice attempt was correct
    success1: f64,
    time_to_first_success_min: Option<f64>,
    error_reduction: f64,
    quiz_gain: Option<f64>,
    rating: Option<f64>,
    fallback: f64,
    latency_ms: Option<f64>,
}

/// Aggregated effect metrics for one (user, model) pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelAggregate {
    pub user_id: Uuid,
    pub model: String,
    pub sample_size: usize,
    pub success_first_attempt: f64,
    pub time_to_first_success_min: Option<f64>,
    pub error_reduction: f64,
    pub quiz_score_gain: Option<f64>,
    pub avg_rating: Option<f64>,
    pub fallback_rate: f64,
    pub avg_latency_ms: Option<f64>,
}

/// Within-user difference per metric: model A value minus model B value.
///
/// Undefined metric values coalesce to 0 before differencing, so every
/// paired user contributes a defined difference for every metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairedDifference {
    pub user_id: Uuid,
    pub d_success_first_attempt: f64,
    pub d_time_to_first_success_min: f64,
    pub d_error_reduction: f64,
    pub d_quiz_score_gain: f64,
    pub d_rating: f64,
    pub d_fallback_rate: f64,
    pub d_latency_ms: f64,
}

/// Summary statistics for one metric over all paired users
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub n: usize,
    pub mean: f64,
    /// Sample standard deviation (n-1 denominator); 0 when n < 2
    pub std_dev: f64,
    pub std_error: f64,
}

/// Paired summary per metric; null when no paired users exist
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PairedSummary {
    pub success_first_attempt: Option<MetricSummary>,
    pub time_to_first_success_min: Option<MetricSummary>,
    pub error_reduction: Option<MetricSummary>,
    pub quiz_score_gain: Option<MetricSummary>,
    pub rating: Option<MetricSummary>,
    pub fallback_rate: Option<MetricSummary>,
    pub latency_ms: Option<MetricSummary>,
}

/// Full comparison output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub window_start: DateTime<Utc>,
    pub per_user_model: Vec<ModelAggregate>,
    pub paired_users: usize,
    pub paired_summary: PairedSummary,
}

/// Computes comparative effectiveness statistics between the two models
#[derive(Clone)]
pub struct AnalyticsEngine {
    pool: SqlitePool,
}

impl AnalyticsEngine {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Run a comparison over the requested window.
    ///
    /// Read-only; tolerates concurrent writes and partially-updated attempt
    /// sets. Absent input data yields empty aggregates rather than an error.
    pub async fn compare(&self, params: &CompareParams) -> Result<ComparisonReport> {
        let window_start = time::now() - parse_window(params.window.as_deref());

        let replies = replies::replies_in_window(&self.pool, params.user_id, window_start).await?;
        if replies.is_empty() {
            return Ok(ComparisonReport {
                window_start,
                per_user_model: Vec::new(),
                paired_users: 0,
                paired_summary: PairedSummary::default(),
            });
        }

        let practice = attempts::practice_attempts_in_window(&self.pool, params.user_id, window_start).await?;
        let quiz = attempts::quiz_attempts_in_window(&self.pool, params.user_id, window_start).await?;

        let mut replies_by_user: BTreeMap<Uuid, Vec<TaggedReply>> = BTreeMap::new();
        for reply in replies {
            replies_by_user.entry(reply.user_id).or_default().push(reply);
        }
        let mut practice_by_user: BTreeMap<Uuid, Vec<PracticeAttempt>> = BTreeMap::new();
        for attempt in practice {
            practice_by_user.entry(attempt.user_id).or_default().push(attempt);
        }
        let mut quiz_by_user: BTreeMap<Uuid, Vec<QuizAttempt>> = BTreeMap::new();
        for attempt in quiz {
            quiz_by_user.entry(attempt.user_id).or_default().push(attempt);
        }

        let empty_practice: Vec<PracticeAttempt> = Vec::new();
        let empty_quiz: Vec<QuizAttempt> = Vec::new();

        let mut observations = Vec::new();
        for (user_id, user_replies) in &replies_by_user {
            let user_practice = practice_by_user.get(user_id).unwrap_or(&empty_practice);
            let user_quiz = quiz_by_user.get(user_id).unwrap_or(&empty_quiz);
            observations.extend(compute_observations(
                user_replies,
                user_practice,
                user_quiz,
                params.baseline_k,
                params.lookahead_minutes,
            ));
        }

        let per_user_model = aggregate_observations(&observations);
        let differences = pair_differences(&per_user_model);
        let paired_summary = summarize_pairs(&differences);

        Ok(ComparisonReport {
            window_start,
            paired_users: differences.len(),
            per_user_model,
            paired_summary,
        })
    }
}

/// Parse a "Nd"/"Nw" duration string, falling back to the 30-day default
fn parse_window(raw: Option<&str>) -> Duration {
    let fallback = Duration::days(DEFAULT_WINDOW_DAYS);
    let Some(raw) = raw else {
        return fallback;
    };

    let trimmed = raw.trim().to_lowercase();
    let (digits, unit) = match trimmed.char_indices().last() {
        Some((idx, unit @ ('d' | 'w'))) => (&trimmed[..idx], unit),
        _ => return fallback,
    };

    match digits.parse::<i64>() {
        Ok(n) if n > 0 => match unit {
            'd' => Duration::days(n),
            _ => Duration::weeks(n),
        },
        _ => fallback,
    }
}

/// One observation per tagged reply for a single user's ordered reply list.
///
/// The effect window of each reply ends at the next reply's timestamp when
/// that comes sooner than the lookahead, so consecutive replies never claim
/// the same post attempts.
fn compute_observations(
    user_replies: &[TaggedReply],
    user_practice: &[PracticeAttempt],
    user_quiz: &[QuizAttempt],
    baseline_k: usize,
    lookahead_minutes: i64,
) -> Vec<ReplyObservation> {
    let mut observations = Vec::with_capacity(user_replies.len());

    for (idx, reply) in user_replies.iter().enumerate() {
        let anchor = reply.created_at;
        let mut window_end = anchor + Duration::minutes(lookahead_minutes);
        if let Some(next) = user_replies.get(idx + 1) {
            window_end = window_end.min(next.created_at);
        }

        let baseline: Vec<&PracticeAttempt> = user_practice
            .iter()
            .filter(|a| a.created_at < anchor)
            .collect();
        let baseline = &baseline[baseline.len().saturating_sub(baseline_k)..];

        let post: Vec<&PracticeAttempt> = user_practice
            .iter()
            .filter(|a| a.created_at > anchor && a.created_at <= window_end)
            .collect();

        let success1 = match post.first() {
            Some(first) if first.is_correct => 1.0,
            _ => 0.0,
        };

        let time_to_first_success_min = post
            .iter()
            .find(|a| a.is_correct)
            .map(|a| (a.created_at - anchor).num_seconds() as f64 / 60.0);

        let baseline_errors: i64 = baseline.iter().map(|a| a.total_errors()).sum();
        let post_errors: i64 = post.iter().take(baseline_k).map(|a| a.total_errors()).sum();
        let error_reduction = (baseline_errors - post_errors) as f64;

        let quiz_gain = quiz_score_gain(user_quiz, anchor);

        observations.push(ReplyObservation {
            user_id: reply.user_id,
            model_label: reply.model_label.clone(),
            success1,
            time_to_first_success_min,
            error_reduction,
            quiz_gain,
            rating: reply.rating.map(|r| r as f64),
            fallback: if reply.is_fallback { 1.0 } else { 0.0 },
            latency_ms: reply.latency_ms.filter(|&l| l > 0).map(|l| l as f64),
        });
    }

    observations
}

/// Mean quiz percentage in the 24h after the anchor minus the mean in the
/// 7 days before it; null unless both sides have attempts
fn quiz_score_gain(user_quiz: &[QuizAttempt], anchor: DateTime<Utc>) -> Option<f64> {
    let before: Vec<f64> = user_quiz
        .iter()
        .filter(|q| q.created_at >= anchor - Duration::days(QUIZ_BASELINE_DAYS) && q.created_at < anchor)
        .map(|q| q.percentage)
        .collect();
    let after: Vec<f64> = user_quiz
        .iter()
        .filter(|q| q.created_at > anchor && q.created_at <= anchor + Duration::hours(QUIZ_POST_HOURS))
        .map(|q| q.percentage)
        .collect();

    Some(mean(&after)? - mean(&before)?)
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Fold observations into per-(user, model) aggregates, in deterministic order
fn aggregate_observations(observations: &[ReplyObservation]) -> Vec<ModelAggregate> {
    let mut grouped: BTreeMap<(Uuid, String), Vec<&ReplyObservation>> = BTreeMap::new();
    for obs in observations {
        grouped
            .entry((obs.user_id, obs.model_label.clone()))
            .or_default()
            .push(obs);
    }

    grouped
        .into_iter()
        .map(|((user_id, model), group)| {
            let n = group.len();
            let defined = |f: fn(&ReplyObservation) -> Option<f64>| {
                let values: Vec<f64> = group.iter().filter_map(|o| f(o)).collect();
                mean(&values)
            };

            ModelAggregate {
                user_id,
                model,
                sample_size: n,
                success_first_attempt: group.iter().map(|o| o.success1).sum::<f64>() / n as f64,
                time_to_first_success_min: defined(|o| o.time_to_first_success_min),
                error_reduction: group.iter().map(|o| o.error_reduction).sum::<f64>() / n as f64,
                quiz_score_gain: defined(|o| o.quiz_gain),
                avg_rating: defined(|o| o.rating),
                fallback_rate: group.iter().map(|o| o.fallback).sum::<f64>() / n as f64,
                avg_latency_ms: defined(|o| o.latency_ms),
            }
        })
        .collect()
}

/// Within-user paired differences for every user holding aggregates for both
/// models. Metrics with no defined value on one side enter as 0.
fn pair_differences(aggregates: &[ModelAggregate]) -> Vec<PairedDifference> {
    let mut by_user: BTreeMap<Uuid, (Option<&ModelAggregate>, Option<&ModelAggregate>)> = BTreeMap::new();
    for agg in aggregates {
        let entry = by_user.entry(agg.user_id).or_default();
        match agg.model.as_str() {
            MODEL_A => entry.0 = Some(agg),
            MODEL_B => entry.1 = Some(agg),
            _ => {}
        }
    }

    by_user
        .into_iter()
        .filter_map(|(user_id, (a, b))| {
            let (a, b) = (a?, b?);
            Some(PairedDifference {
                user_id,
                d_success_first_attempt: a.success_first_attempt - b.success_first_attempt,
                d_time_to_first_success_min: a.time_to_first_success_min.unwrap_or(0.0)
                    - b.time_to_first_success_min.unwrap_or(0.0),
                d_error_reduction: a.error_reduction - b.error_reduction,
                d_quiz_score_gain: a.quiz_score_gain.unwrap_or(0.0) - b.quiz_score_gain.unwrap_or(0.0),
                d_rating: a.avg_rating.unwrap_or(0.0) - b.avg_rating.unwrap_or(0.0),
                d_fallback_rate: a.fallback_rate - b.fallback_rate,
                d_latency_ms: a.avg_latency_ms.unwrap_or(0.0) - b.avg_latency_ms.unwrap_or(0.0),
            })
        })
        .collect()
}

/// n, mean, sample standard deviation, and standard error for one metric
fn summarize(values: &[f64]) -> Option<MetricSummary> {
    let n = values.len();
    if n == 0 {
        return None;
    }

    let mean = values.iter().sum::<f64>() / n as f64;
    let std_dev = if n < 2 {
        0.0
    } else {
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
        variance.sqrt()
    };

    Some(MetricSummary {
        n,
        mean,
        std_dev,
        std_error: std_dev / (n as f64).sqrt(),
    })
}

fn summarize_pairs(differences: &[PairedDifference]) -> PairedSummary {
    let collect = |f: fn(&PairedDifference) -> f64| {
        let values: Vec<f64> = differences.iter().map(f).collect();
        summarize(&values)
    };

    PairedSummary {
        success_first_attempt: collect(|d| d.d_success_first_attempt),
        time_to_first_success_min: collect(|d| d.d_time_to_first_success_min),
        error_reduction: collect(|d| d.d_error_reduction),
        quiz_score_gain: collect(|d| d.d_quiz_score_gain),
        rating: collect(|d| d.d_rating),
        fallback_rate: collect(|d| d.d_fallback_rate),
        latency_ms: collect(|d| d.d_latency_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(user: Uuid, model: &str, at: DateTime<Utc>) -> TaggedReply {
        TaggedReply {
            guid: Uuid::new_v4(),
            user_id: user,
            session_id: None,
            model_label: model.to_string(),
            message_type: "chat".to_string(),
            rating: None,
            is_fallback: false,
            latency_ms: Some(800),
            created_at: at,
        }
    }

    fn practice(user: Uuid, correct: bool, errors: i64, at: DateTime<Utc>) -> PracticeAttempt {
        PracticeAttempt {
            guid: Uuid::new_v4(),
            user_id: user,
            problem_id: Uuid::new_v4(),
            topic_id: None,
            is_correct: correct,
            points: 10.0,
            complexity_score: 1.0,
            compiler_errors: errors,
            runtime_errors: 0,
            time_spent_seconds: 120,
            attempt_number: 1,
            caused_by_reply_id: None,
            attributed_model: None,
            attribution_confidence: None,
            attribution_delay_seconds: None,
            created_at: at,
        }
    }

    fn quiz(user: Uuid, percentage: f64, at: DateTime<Utc>) -> QuizAttempt {
        QuizAttempt {
            guid: Uuid::new_v4(),
            user_id: user,
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
        }
    }

    fn t0() -> DateTime<Utc> {
        "2026-01-15T10:00:00Z".parse().unwrap()
    }

    #[test]
    fn test_parse_window_days_and_weeks() {
        assert_eq!(parse_window(Some("7d")), Duration::days(7));
        assert_eq!(parse_window(Some("2w")), Duration::weeks(2));
        assert_eq!(parse_window(Some(" 14D ")), Duration::days(14));
    }

    #[test]
    fn test_parse_window_falls_back_to_default() {
        assert_eq!(parse_window(None), Duration::days(30));
        assert_eq!(parse_window(Some("soon")), Duration::days(30));
        assert_eq!(parse_window(Some("0d")), Duration::days(30));
        assert_eq!(parse_window(Some("-3w")), Duration::days(30));
        assert_eq!(parse_window(Some("d")), Duration::days(30));
    }

    #[test]
    fn test_observation_success_and_time_to_first_success() {
        let user = Uuid::new_v4();
        let replies = vec![reply(user, MODEL_A, t0())];
        let practice = vec![
            practice(user, false, 3, t0() - Duration::minutes(20)),
            practice(user, true, 0, t0() + Duration::minutes(5)),
        ];

        let obs = compute_observations(&replies, &practice, &[], 3, 30);
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].success1, 1.0);
        assert_eq!(obs[0].time_to_first_success_min, Some(5.0));
        // baseline errors 3, post errors 0
        assert_eq!(obs[0].error_reduction, 3.0);
    }

    #[test]
    fn test_observation_no_post_attempts() {
        let user = Uuid::new_v4();
        let replies = vec![reply(user, MODEL_B, t0())];

        let obs = compute_observations(&replies, &[], &[], 3, 30);
        assert_eq!(obs[0].success1, 0.0);
        assert_eq!(obs[0].time_to_first_success_min, None);
        assert_eq!(obs[0].error_reduction, 0.0);
    }

    #[test]
    fn test_consecutive_replies_do_not_double_count_post_attempts() {
        let user = Uuid::new_v4();
        let replies = vec![
            reply(user, MODEL_A, t0()),
            reply(user, MODEL_B, t0() + Duration::minutes(10)),
        ];
        // Lands 15 min after the first reply but inside the second reply's
        // window; only the second reply may claim it
        let practice = vec![practice(user, true, 0, t0() + Duration::minutes(15))];

        let obs = compute_observations(&replies, &practice, &[], 3, 30);
        assert_eq!(obs[0].success1, 0.0);
        assert_eq!(obs[0].time_to_first_success_min, None);
        assert_eq!(obs[1].success1, 1.0);
        assert_eq!(obs[1].time_to_first_success_min, Some(5.0));
    }

    #[test]
    fn test_quiz_gain_requires_both_sides() {
        let user = Uuid::new_v4();
        let quizzes = vec![quiz(user, 50.0, t0() - Duration::days(2))];
        assert_eq!(quiz_score_gain(&quizzes, t0()), None);

        let quizzes = vec![
            quiz(user, 50.0, t0() - Duration::days(2)),
            quiz(user, 80.0, t0() + Duration::hours(3)),
        ];
        assert_eq!(quiz_score_gain(&quizzes, t0()), Some(30.0));
    }

    #[test]
    fn test_quiz_gain_ignores_attempts_outside_windows() {
        let user = Uuid::new_v4();
        let quizzes = vec![
            quiz(user, 10.0, t0() - Duration::days(8)),
            quiz(user, 50.0, t0() - Duration::days(1)),
            quiz(user, 80.0, t0() + Duration::hours(3)),
            quiz(user, 0.0, t0() + Duration::hours(30)),
        ];
        assert_eq!(quiz_score_gain(&quizzes, t0()), Some(30.0));
    }

    #[test]
    fn test_summarize_single_value_has_zero_spread() {
        let summary = summarize(&[1.0]).unwrap();
        assert_eq!(summary.n, 1);
        assert_eq!(summary.mean, 1.0);
        assert_eq!(summary.std_dev, 0.0);
        assert_eq!(summary.std_error, 0.0);
    }

    #[test]
    fn test_summarize_empty_is_null() {
        assert_eq!(summarize(&[]), None);
    }

    #[test]
    fn test_summarize_sample_standard_deviation() {
        let summary = summarize(&[1.0, 3.0]).unwrap();
        assert_eq!(summary.n, 2);
        assert_eq!(summary.mean, 2.0);
        // sample sd with n-1 denominator: sqrt(((1-2)^2 + (3-2)^2) / 1)
        assert!((summary.std_dev - 2.0_f64.sqrt()).abs() < 1e-12);
        assert!((summary.std_error - 1.0).abs() < 1e-12);
    }

    fn aggregate(user: Uuid, model: &str, success: f64, ttf: Option<f64>) -> ModelAggregate {
        ModelAggregate {
            user_id: user,
            model: model.to_string(),
            sample_size: 1,
            success_first_attempt: success,
            time_to_first_success_min: ttf,
            error_reduction: 0.0,
            quiz_score_gain: None,
            avg_rating: None,
            fallback_rate: 0.0,
            avg_latency_ms: None,
        }
    }

    #[test]
    fn test_paired_difference_coalesces_undefined_side_to_zero() {
        let user = Uuid::new_v4();
        let aggregates = vec![
            aggregate(user, MODEL_A, 1.0, Some(5.0)),
            aggregate(user, MODEL_B, 0.0, None),
        ];

        let diffs = pair_differences(&aggregates);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].d_success_first_attempt, 1.0);
        // model B has no successful attempt; its undefined time enters as 0
        assert_eq!(diffs[0].d_time_to_first_success_min, 5.0);

        let summary = summarize_pairs(&diffs);
        let success = summary.success_first_attempt.unwrap();
        assert_eq!(success.n, 1);
        assert_eq!(success.mean, 1.0);
        assert_eq!(success.std_dev, 0.0);
        assert_eq!(success.std_error, 0.0);
    }

    #[test]
    fn test_users_with_one_model_are_not_paired() {
        let user_a = Uuid::new_v4();
        let user_b = Uuid::new_v4();
        let aggregates = vec![
            aggregate(user_a, MODEL_A, 1.0, None),
            aggregate(user_b, MODEL_A, 1.0, None),
            aggregate(user_b, MODEL_B, 0.5, None),
        ];

        let diffs = pair_differences(&aggregates);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].user_id, user_b);
    }

    #[test]
    fn test_aggregate_observations_groups_by_user_and_model() {
        let user = Uuid::new_v4();
        let replies = vec![
            reply(user, MODEL_A, t0()),
            reply(user, MODEL_A, t0() + Duration::hours(2)),
            reply(user, MODEL_B, t0() + Duration::hours(4)),
        ];
        let obs = compute_observations(&replies, &[], &[], 3, 30);
        let aggregates = aggregate_observations(&obs);

        assert_eq!(aggregates.len(), 2);
        let a = aggregates.iter().find(|x| x.model == MODEL_A).unwrap();
        assert_eq!(a.sample_size, 2);
        let b = aggregates.iter().find(|x| x.model == MODEL_B).unwrap();
        assert_eq!(b.sample_size, 1);
        // every fixture reply carries an 800ms latency
        assert_eq!(a.avg_latency_ms, Some(800.0));
    }
}
