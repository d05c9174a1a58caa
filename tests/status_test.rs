//! Topic status transitions and auto-close scheduling.

mod common;

use chrono::{Duration, Utc};
use serde_json::json;
use topic_engine::db;
use topic_engine::external::{CLOSE_TOPIC_JOB, SYSTEM_USER_ID};
use topic_engine::TopicStatus;

#[tokio::test]
async fn closing_and_reopening_a_topic() {
    let harness = common::setup().await;
    let topic = common::seed_topic(&harness.engine, 1, "Closable").await;
    let pool = harness.engine.db().pool();
    let original_bump = topic.bumped_at.clone();

    harness
        .engine
        .update_status(topic.id, TopicStatus::Closed, true, 9)
        .await
        .unwrap();
    let closed = db::get_topic(pool, topic.id).await.unwrap().unwrap();
    assert!(closed.closed);
    // Closing is silent with respect to bump ordering.
    assert_eq!(closed.bumped_at, original_bump);

    harness
        .engine
        .update_status(topic.id, TopicStatus::Closed, false, 9)
        .await
        .unwrap();
    let reopened = db::get_topic(pool, topic.id).await.unwrap().unwrap();
    assert!(!reopened.closed);
    // Re-opening counts as activity.
    assert_ne!(reopened.bumped_at, original_bump);

    // Each transition authored a moderator message.
    let posts = harness.moderator.posts.lock().unwrap();
    assert_eq!(posts.len(), 2);
    assert!(posts[0].2.contains("closed.enabled"));
    assert!(posts[1].2.contains("closed.disabled"));
}

#[tokio::test]
async fn autoclosed_aliases_the_closed_column() {
    let harness = common::setup().await;
    let topic = common::seed_topic(&harness.engine, 1, "Auto-closable").await;
    let pool = harness.engine.db().pool();

    harness
        .engine
        .update_status(topic.id, TopicStatus::Autoclosed, true, SYSTEM_USER_ID)
        .await
        .unwrap();
    let fresh = db::get_topic(pool, topic.id).await.unwrap().unwrap();
    assert!(fresh.closed);

    let posts = harness.moderator.posts.lock().unwrap();
    assert!(posts[0].2.contains("autoclosed.enabled"));
}

#[tokio::test]
async fn pinning_sets_and_clears_the_timestamp() {
    let harness = common::setup().await;
    let topic = common::seed_topic(&harness.engine, 1, "Pinnable").await;
    let pool = harness.engine.db().pool();

    harness
        .engine
        .update_status(topic.id, TopicStatus::Pinned, true, 9)
        .await
        .unwrap();
    assert!(db::get_topic(pool, topic.id).await.unwrap().unwrap().pinned_at.is_some());

    harness
        .engine
        .update_status(topic.id, TopicStatus::Pinned, false, 9)
        .await
        .unwrap();
    assert!(db::get_topic(pool, topic.id).await.unwrap().unwrap().pinned_at.is_none());
}

#[tokio::test]
async fn setting_a_status_to_its_current_value_is_silent() {
    let harness = common::setup().await;
    let topic = common::seed_topic(&harness.engine, 1, "Already open").await;

    harness
        .engine
        .update_status(topic.id, TopicStatus::Closed, false, 9)
        .await
        .unwrap();
    harness
        .engine
        .update_status(topic.id, TopicStatus::Archived, false, 9)
        .await
        .unwrap();

    assert!(harness.moderator.posts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn auto_close_schedules_a_deferred_job_for_the_explicit_user() {
    let harness = common::setup().await;
    let topic = common::seed_topic(&harness.engine, 1, "Deadline").await;
    let deadline = Utc::now() + Duration::hours(6);

    harness
        .engine
        .set_auto_close(topic.id, Some(deadline), Some(42))
        .await
        .unwrap();

    let scheduled = harness.scheduler.scheduled.lock().unwrap();
    assert_eq!(scheduled.len(), 1);
    let (job, run_at, payload) = &scheduled[0];
    assert_eq!(job, CLOSE_TOPIC_JOB);
    assert_eq!(*run_at, deadline);
    assert_eq!(payload, &json!({ "topic_id": topic.id, "user_id": 42 }));

    // The previous schedule (none, here) is always cancelled first.
    let cancelled = harness.scheduler.cancelled.lock().unwrap();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].1, json!({ "topic_id": topic.id }));
}

#[tokio::test]
async fn category_derived_auto_close_falls_back_to_creator_or_system() {
    let harness = common::setup().await;
    let staff_topic = common::seed_topic(&harness.engine, 50, "Staff topic").await;
    let plain_topic = common::seed_topic(&harness.engine, 60, "Plain topic").await;
    harness.identity.make_staff(50);
    let deadline = Utc::now() + Duration::hours(1);

    harness
        .engine
        .set_auto_close(staff_topic.id, Some(deadline), None)
        .await
        .unwrap();
    harness
        .engine
        .set_auto_close(plain_topic.id, Some(deadline), None)
        .await
        .unwrap();

    let scheduled = harness.scheduler.scheduled.lock().unwrap();
    assert_eq!(scheduled[0].2["user_id"], json!(50));
    assert_eq!(scheduled[1].2["user_id"], json!(SYSTEM_USER_ID));
}

#[tokio::test]
async fn changing_the_deadline_cancels_the_previous_job() {
    let harness = common::setup().await;
    let topic = common::seed_topic(&harness.engine, 1, "Rescheduled").await;
    let first = Utc::now() + Duration::hours(1);
    let second = Utc::now() + Duration::hours(2);

    harness.engine.set_auto_close(topic.id, Some(first), Some(9)).await.unwrap();
    harness.engine.set_auto_close(topic.id, Some(second), Some(9)).await.unwrap();

    assert_eq!(harness.scheduler.cancelled.lock().unwrap().len(), 2);
    let scheduled = harness.scheduler.scheduled.lock().unwrap();
    assert_eq!(scheduled.len(), 2);
    assert_eq!(scheduled[1].1, second);
}

#[tokio::test]
async fn clearing_the_deadline_only_cancels() {
    let harness = common::setup().await;
    let topic = common::seed_topic(&harness.engine, 1, "Cleared deadline").await;
    let deadline = Utc::now() + Duration::hours(1);
    let pool = harness.engine.db().pool();

    harness.engine.set_auto_close(topic.id, Some(deadline), Some(9)).await.unwrap();
    harness.engine.set_auto_close(topic.id, None, None).await.unwrap();

    assert_eq!(harness.scheduler.scheduled.lock().unwrap().len(), 1);
    assert_eq!(harness.scheduler.cancelled.lock().unwrap().len(), 2);
    let fresh = db::get_topic(pool, topic.id).await.unwrap().unwrap();
    assert!(fresh.auto_close_at.is_none());
    assert!(fresh.auto_close_user_id.is_none());
}

#[tokio::test]
async fn unchanged_auto_close_settings_are_a_no_op() {
    let harness = common::setup().await;
    let topic = common::seed_topic(&harness.engine, 1, "Stable deadline").await;
    let deadline = Utc::now() + Duration::hours(1);

    harness.engine.set_auto_close(topic.id, Some(deadline), Some(9)).await.unwrap();
    harness.engine.set_auto_close(topic.id, Some(deadline), Some(9)).await.unwrap();

    assert_eq!(harness.scheduler.scheduled.lock().unwrap().len(), 1);
    assert_eq!(harness.scheduler.cancelled.lock().unwrap().len(), 1);
}
