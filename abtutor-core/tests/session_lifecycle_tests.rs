//! Integration tests for session lifecycle management
//!
//! Covers the single-active-session invariant, idempotent and concurrent
//! starts, reactivation, engagement triggers, and end-session accounting.

mod helpers;

use abtutor_common::{Error, TriggerPolicy};
use uuid::Uuid;

#[tokio::test]
async fn test_start_creates_session_and_preserved_pair() {
    let (state, _dir) = helpers::setup().await;
    let user = Uuid::new_v4();

    let handle = helpers::start_session(&state, user, Some(Uuid::new_v4())).await;

    assert!(!handle.reactivated);
    let preserved_id = handle.preserved_session_id.expect("preserved session linked");

    let preserved = abtutor_core::db::preserved::fetch_most_recent(&state.db, user)
        .await
        .expect("fetch preserved")
        .expect("preserved session exists");
    assert_eq!(preserved.guid, preserved_id);

    let session = state
        .session_manager()
        .owned_session(handle.session_id, user)
        .await
        .expect("session exists");
    assert!(session.is_active());
    assert_eq!(session.engagement_score, 0);
    assert!(!session.quiz_triggered);
    assert!(!session.practice_triggered);
}

#[tokio::test]
async fn test_start_is_idempotent_for_same_lesson() {
    let (state, _dir) = helpers::setup().await;
    let user = Uuid::new_v4();
    let lesson = Uuid::new_v4();

    let first = helpers::start_session(&state, user, Some(lesson)).await;
    let second = helpers::start_session(&state, user, Some(lesson)).await;

    assert_eq!(first.session_id, second.session_id);
    assert!(!second.reactivated);
    assert_eq!(helpers::active_session_count(&state.db, user).await, 1);
}

#[tokio::test]
async fn test_starting_another_lesson_ends_the_previous_session() {
    let (state, _dir) = helpers::setup().await;
    let user = Uuid::new_v4();

    let first = helpers::start_session(&state, user, Some(Uuid::new_v4())).await;
    let second = helpers::start_session(&state, user, Some(Uuid::new_v4())).await;

    assert_ne!(first.session_id, second.session_id);
    assert_eq!(helpers::active_session_count(&state.db, user).await, 1);

    let old = state
        .session_manager()
        .owned_session(first.session_id, user)
        .await
        .expect("old session still exists");
    assert!(!old.is_active());
}

#[tokio::test]
async fn test_reactivation_reuses_session_and_engagement_score() {
    let (state, _dir) = helpers::setup().await;
    let user = Uuid::new_v4();
    let lesson = Uuid::new_v4();

    let handle = helpers::start_session(&state, user, Some(lesson)).await;
    state
        .session_manager()
        .increment_engagement(handle.session_id, user, 7)
        .await
        .expect("increment");
    state
        .session_manager()
        .end(handle.session_id, user)
        .await
        .expect("end session");

    let resumed = helpers::start_session(&state, user, Some(lesson)).await;

    assert_eq!(resumed.session_id, handle.session_id);
    assert!(resumed.reactivated);

    let session = state
        .session_manager()
        .owned_session(resumed.session_id, user)
        .await
        .expect("session exists");
    assert!(session.is_active());
    assert_eq!(session.engagement_score, 7);
}

#[tokio::test]
async fn test_lesson_less_starts_always_create_fresh_sessions() {
    let (state, _dir) = helpers::setup().await;
    let user = Uuid::new_v4();

    let first = helpers::start_session(&state, user, None).await;
    let second = helpers::start_session(&state, user, None).await;

    // Sessions without a lesson are exempt from the single-active invariant
    assert_ne!(first.session_id, second.session_id);
    assert_eq!(helpers::active_session_count(&state.db, user).await, 2);
}

#[tokio::test]
async fn test_concurrent_starts_yield_exactly_one_active_session() {
    let (state, _dir) = helpers::setup().await;
    let user = Uuid::new_v4();
    let lesson = Uuid::new_v4();

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let state = state.clone();
        tasks.push(tokio::spawn(async move {
            state
                .session_manager()
                .start(&helpers::start_params(user, Some(lesson)))
                .await
        }));
    }

    let mut session_ids = Vec::new();
    for task in tasks {
        let handle = task.await.expect("task join").expect("start succeeds");
        session_ids.push(handle.session_id);
    }

    // Every racing call must land on the same session
    assert!(session_ids.iter().all(|id| *id == session_ids[0]));
    assert_eq!(helpers::active_session_count(&state.db, user).await, 1);
}

#[tokio::test]
async fn test_end_reports_final_accounting() {
    let (state, _dir) = helpers::setup().await;
    let user = Uuid::new_v4();

    let handle = helpers::start_session(&state, user, Some(Uuid::new_v4())).await;
    state
        .session_manager()
        .increment_engagement(handle.session_id, user, 5)
        .await
        .expect("increment");

    let report = state
        .session_manager()
        .end(handle.session_id, user)
        .await
        .expect("end session");

    assert_eq!(report.session_id, handle.session_id);
    assert_eq!(report.engagement_score, 5);
    assert!(report.duration_seconds >= 0);
    assert_eq!(helpers::active_session_count(&state.db, user).await, 0);
}

#[tokio::test]
async fn test_end_unknown_session_is_not_found() {
    let (state, _dir) = helpers::setup().await;

    let result = state
        .session_manager()
        .end(Uuid::new_v4(), Uuid::new_v4())
        .await;

    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_end_rejects_foreign_user() {
    let (state, _dir) = helpers::setup().await;
    let owner = Uuid::new_v4();

    let handle = helpers::start_session(&state, owner, Some(Uuid::new_v4())).await;
    let result = state
        .session_manager()
        .end(handle.session_id, Uuid::new_v4())
        .await;

    assert!(matches!(result, Err(Error::NotFound(_))));
    assert_eq!(helpers::active_session_count(&state.db, owner).await, 1);
}

#[tokio::test]
async fn test_increment_validates_point_range() {
    let (state, _dir) = helpers::setup().await;
    let user = Uuid::new_v4();
    let handle = helpers::start_session(&state, user, Some(Uuid::new_v4())).await;

    for bad_points in [0, 11, -3] {
        let result = state
            .session_manager()
            .increment_engagement(handle.session_id, user, bad_points)
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))), "points {}", bad_points);
    }
}

#[tokio::test]
async fn test_triggers_fire_once_and_stay_set() {
    let policy = TriggerPolicy {
        quiz_threshold: 10,
        practice_threshold: 5,
    };
    let (state, _dir) = helpers::setup_with_policy(policy).await;
    let user = Uuid::new_v4();
    let handle = helpers::start_session(&state, user, Some(Uuid::new_v4())).await;
    let manager = state.session_manager();

    // 4 points: nothing triggered yet
    let update = manager
        .increment_engagement(handle.session_id, user, 4)
        .await
        .expect("increment");
    assert!(!update.practice_triggered);
    assert!(!update.quiz_triggered);

    // 8 points: practice crosses
    let update = manager
        .increment_engagement(handle.session_id, user, 4)
        .await
        .expect("increment");
    assert!(update.practice_triggered);
    assert!(update.practice_newly_triggered);
    assert!(!update.quiz_triggered);

    // 12 points: quiz crosses; practice stays set but is no longer new
    let update = manager
        .increment_engagement(handle.session_id, user, 4)
        .await
        .expect("increment");
    assert!(update.quiz_triggered);
    assert!(update.quiz_newly_triggered);
    assert!(update.practice_triggered);
    assert!(!update.practice_newly_triggered);

    // Crossing again reports nothing new
    let update = manager
        .increment_engagement(handle.session_id, user, 4)
        .await
        .expect("increment");
    assert_eq!(update.engagement_score, 16);
    assert!(update.quiz_triggered && update.practice_triggered);
    assert!(!update.quiz_newly_triggered);
    assert!(!update.practice_newly_triggered);
}

#[tokio::test]
async fn test_threshold_status_snapshot() {
    let policy = TriggerPolicy {
        quiz_threshold: 20,
        practice_threshold: 10,
    };
    let (state, _dir) = helpers::setup_with_policy(policy).await;
    let user = Uuid::new_v4();
    let handle = helpers::start_session(&state, user, Some(Uuid::new_v4())).await;
    let manager = state.session_manager();

    manager
        .increment_engagement(handle.session_id, user, 10)
        .await
        .expect("increment");

    let status = manager
        .threshold_status(handle.session_id, user)
        .await
        .expect("status");
    assert_eq!(status.engagement_score, 10);
    assert_eq!(status.quiz.progress_percent, 50);
    assert!(!status.quiz.triggered);
    assert_eq!(status.practice.progress_percent, 100);
    assert!(status.practice.triggered);
}

#[tokio::test]
async fn test_practice_completed_is_monotonic() {
    let (state, _dir) = helpers::setup().await;
    let user = Uuid::new_v4();
    let handle = helpers::start_session(&state, user, Some(Uuid::new_v4())).await;
    let manager = state.session_manager();

    manager
        .complete_practice(handle.session_id, user)
        .await
        .expect("complete practice");
    manager
        .complete_practice(handle.session_id, user)
        .await
        .expect("second call is a no-op");

    let session = manager
        .owned_session(handle.session_id, user)
        .await
        .expect("session");
    assert!(session.practice_completed);

    let result = manager.complete_practice(handle.session_id, Uuid::new_v4()).await;
    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_active_session_returns_most_recent() {
    let (state, _dir) = helpers::setup().await;
    let user = Uuid::new_v4();
    let manager = state.session_manager();

    assert!(manager.active_session(user).await.expect("query").is_none());

    let handle = helpers::start_session(&state, user, Some(Uuid::new_v4())).await;
    let active = manager
        .active_session(user)
        .await
        .expect("query")
        .expect("active session");
    assert_eq!(active.guid, handle.session_id);
}
