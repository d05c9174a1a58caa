//! Post-number allocation under concurrency.

mod common;

use topic_engine::db;
use topic_engine::sequence;

#[tokio::test]
async fn concurrent_post_creation_assigns_gap_free_numbers() {
    let harness = common::setup().await;
    let topic = common::seed_topic(&harness.engine, 1, "Concurrency torture topic").await;

    let mut handles = Vec::new();
    for user_id in 0..20 {
        let engine = harness.engine.clone();
        let topic_id = topic.id;
        handles.push(tokio::spawn(async move {
            engine
                .create_post(topic_id, 100 + user_id, "concurrent reply")
                .await
                .expect("Failed to create post")
                .post_number
        }));
    }

    let mut numbers = Vec::new();
    for handle in handles {
        numbers.push(handle.await.expect("Task panicked"));
    }
    numbers.sort_unstable();

    // Exactly {1..N}: no duplicates, no gaps.
    assert_eq!(numbers, (1..=20).collect::<Vec<i64>>());

    let topic = db::get_topic(harness.engine.db().pool(), topic.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(topic.highest_post_number, 20);
    assert_eq!(topic.posts_count, 20);
}

#[tokio::test]
async fn allocate_counts_replies_beyond_the_opening_post() {
    let harness = common::setup().await;
    let topic = common::seed_topic(&harness.engine, 1, "Reply counting").await;
    let pool = harness.engine.db().pool();

    let mut tx = pool.begin().await.unwrap();
    // The opening allocation is never a reply, even with counting on.
    let first = sequence::allocate(&mut *tx, topic.id, true).await.unwrap();
    let second = sequence::allocate(&mut *tx, topic.id, true).await.unwrap();
    // Recovery-style allocations leave the reply count alone.
    let third = sequence::allocate(&mut *tx, topic.id, false).await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!((first, second, third), (1, 2, 3));

    let topic = db::get_topic(pool, topic.id).await.unwrap().unwrap();
    assert_eq!(topic.highest_post_number, 3);
    assert_eq!(topic.reply_count, 1);
}

#[tokio::test]
async fn rolled_back_allocation_leaves_no_trace() {
    let harness = common::setup().await;
    let topic = common::seed_topic(&harness.engine, 1, "Rollback safety").await;
    let pool = harness.engine.db().pool();

    {
        let mut tx = pool.begin().await.unwrap();
        let number = sequence::allocate(&mut *tx, topic.id, false).await.unwrap();
        assert_eq!(number, 1);
        // Dropped without commit: the increment must vanish with it.
    }

    let topic = db::get_topic(pool, topic.id).await.unwrap().unwrap();
    assert_eq!(topic.highest_post_number, 0);

    let post = common::seed_post(&harness.engine, topic.id, 2, "first real post").await;
    assert_eq!(post.post_number, 1);
}

#[tokio::test]
async fn allocation_fails_for_missing_topic() {
    let harness = common::setup().await;
    let pool = harness.engine.db().pool();

    let mut tx = pool.begin().await.unwrap();
    let result = sequence::allocate(&mut *tx, 9999, false).await;
    assert!(result.is_err());
}
