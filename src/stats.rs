//! Recomputation of a topic's denormalized statistics.
//!
//! The correctness strategy against counter drift is full recomputation from
//! source rows inside one transaction, never incremental adjustment. Every
//! operation that adds, removes, or moves posts runs [`recalculate`]
//! afterwards; calling it redundantly is safe.

use anyhow::{Context, Result};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

/// Recompute a topic's denormalized counters from its post rows.
///
/// Idempotent. In one transaction:
/// - renumbers live posts to 1..N in display order, closing any gaps left by
///   a migration or deletion;
/// - recomputes `highest_post_number` (max live post number, 0 if none),
///   `posts_count`, `reply_count` (live posts beyond the first), and
///   `last_post_user_id` (kept when no live post remains);
/// - recomputes each per-action-type counter as the sum over live posts;
/// - clamps every TopicUser's `last_read_post_number` and `seen_post_count`
///   down to the new `highest_post_number` (a user cannot have read a post
///   number that no longer exists).
///
/// # Errors
///
/// Fails if any statement cannot be executed; nothing is applied partially.
pub async fn recalculate(pool: &SqlitePool, topic_id: i64) -> Result<()> {
    let mut tx = pool
        .begin()
        .await
        .context("Failed to begin statistics transaction")?;
    recalculate_in(&mut *tx, topic_id).await?;
    tx.commit()
        .await
        .context("Failed to commit statistics recalculation")?;
    Ok(())
}

/// [`recalculate`] running inside the caller's transaction, so a mutation
/// and its follow-up resynchronization commit or abort as one unit.
///
/// # Errors
///
/// Fails if any statement cannot be executed.
pub async fn recalculate_in(conn: &mut SqliteConnection, topic_id: i64) -> Result<()> {
    let live: Vec<(i64, i64, i64)> = sqlx::query_as(
        r"
        SELECT id, post_number, sort_order FROM posts
        WHERE topic_id = ? AND deleted_at IS NULL
        ORDER BY sort_order, post_number
        ",
    )
    .bind(topic_id)
    .fetch_all(&mut *conn)
    .await
    .context("Failed to fetch live posts")?;

    let stale: Vec<(i64, i64)> = live
        .iter()
        .enumerate()
        .filter_map(|(idx, &(post_id, number, sort))| {
            let target = idx as i64 + 1;
            (number != target || sort != target).then_some((post_id, target))
        })
        .collect();

    // Close numbering gaps in two passes. A recovered post re-enters with a
    // fresh high number but its old sort position, which can push a later
    // row's target above that row's current number; parking the stale rows
    // on negative numbers first keeps every intermediate state clear of the
    // live unique index.
    for &(post_id, target) in &stale {
        sqlx::query("UPDATE posts SET post_number = ? WHERE id = ?")
            .bind(-target)
            .bind(post_id)
            .execute(&mut *conn)
            .await
            .context("Failed to park post number")?;
    }
    for &(post_id, target) in &stale {
        sqlx::query("UPDATE posts SET post_number = ?, sort_order = ? WHERE id = ?")
            .bind(target)
            .bind(target)
            .bind(post_id)
            .execute(&mut *conn)
            .await
            .context("Failed to renumber post")?;
    }

    let (highest, count, like_sum, flag_sum): (i64, i64, i64, i64) = sqlx::query_as(
        r"
        SELECT
            COALESCE(MAX(post_number), 0),
            COUNT(*),
            COALESCE(SUM(like_count), 0),
            COALESCE(SUM(flag_count), 0)
        FROM posts
        WHERE topic_id = ? AND deleted_at IS NULL
        ",
    )
    .bind(topic_id)
    .fetch_one(&mut *conn)
    .await
    .context("Failed to aggregate post statistics")?;

    sqlx::query(
        r"
        UPDATE topics
        SET highest_post_number = ?,
            posts_count = ?,
            reply_count = ?,
            like_count = ?,
            flag_count = ?,
            last_post_user_id = COALESCE(
                (SELECT user_id FROM posts
                 WHERE topic_id = ? AND deleted_at IS NULL
                 ORDER BY post_number DESC LIMIT 1),
                last_post_user_id)
        WHERE id = ?
        ",
    )
    .bind(highest)
    .bind(count)
    .bind((count - 1).max(0))
    .bind(like_sum)
    .bind(flag_sum)
    .bind(topic_id)
    .bind(topic_id)
    .execute(&mut *conn)
    .await
    .context("Failed to update topic statistics")?;

    sqlx::query(
        r"
        UPDATE topic_users
        SET last_read_post_number = MIN(last_read_post_number, ?),
            seen_post_count = MIN(seen_post_count, ?)
        WHERE topic_id = ?
          AND (last_read_post_number > ? OR seen_post_count > ?)
        ",
    )
    .bind(highest)
    .bind(highest)
    .bind(topic_id)
    .bind(highest)
    .bind(highest)
    .execute(&mut *conn)
    .await
    .context("Failed to clamp topic user read positions")?;

    debug!(topic_id, highest, posts = count, "Recalculated topic statistics");
    Ok(())
}

/// Recompute a topic's `avg_time` as the geometric mean of its posts'
/// individual average-time values.
///
/// Posts with no recorded time are skipped; if no post has timing data the
/// topic's `avg_time` is left unset.
///
/// # Errors
///
/// Fails if the posts cannot be read or the topic cannot be updated.
pub async fn update_avg_time(pool: &SqlitePool, topic_id: i64) -> Result<()> {
    let rows: Vec<(f64,)> = sqlx::query_as(
        r"
        SELECT avg_time FROM posts
        WHERE topic_id = ? AND deleted_at IS NULL
          AND avg_time IS NOT NULL AND avg_time > 0
        ",
    )
    .bind(topic_id)
    .fetch_all(pool)
    .await
    .context("Failed to fetch post timings")?;

    let values: Vec<f64> = rows.into_iter().map(|(v,)| v).collect();
    let mean = geometric_mean(&values);

    sqlx::query("UPDATE topics SET avg_time = ? WHERE id = ?")
        .bind(mean)
        .bind(topic_id)
        .execute(pool)
        .await
        .context("Failed to update topic avg_time")?;

    Ok(())
}

/// Batch variant of [`update_avg_time`] over every live topic.
///
/// # Errors
///
/// Fails on the first topic whose timing cannot be recomputed.
pub async fn update_all_avg_times(pool: &SqlitePool) -> Result<()> {
    let topic_ids: Vec<(i64,)> = sqlx::query_as("SELECT id FROM topics WHERE deleted_at IS NULL")
        .fetch_all(pool)
        .await
        .context("Failed to list topics")?;

    for (topic_id,) in topic_ids {
        update_avg_time(pool, topic_id).await?;
    }
    Ok(())
}

/// Geometric mean of the given values; `None` when empty.
fn geometric_mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let log_sum: f64 = values.iter().map(|v| v.ln()).sum();
    Some((log_sum / values.len() as f64).exp())
}
