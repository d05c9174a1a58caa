//! Atomic post-number allocation.

use anyhow::{bail, Context, Result};
use sqlx::SqliteConnection;

/// Allocate the next post number for a topic.
///
/// Runs inside the caller's transaction so the increment and the post
/// insertion commit or abort as one unit; a half-applied increment with no
/// corresponding post cannot be observed. The increment-and-read is a single
/// statement, so concurrent allocations on the same topic serialize on the
/// store and never hand out the same number.
///
/// Returns the new value, i.e. the number to assign to the post being
/// created. With `count_reply` set, any allocation beyond the opening post
/// bumps the topic's `reply_count` in the same statement; callers that hand
/// out numbers without adding a reply (post recovery) pass `false`.
///
/// # Errors
///
/// Fails if the topic does not exist or the update cannot be executed.
pub async fn allocate(conn: &mut SqliteConnection, topic_id: i64, count_reply: bool) -> Result<i64> {
    // SET expressions see the pre-update values, so a non-zero
    // highest_post_number means the number being handed out is not 1.
    let row: Option<(i64,)> = sqlx::query_as(
        r"
        UPDATE topics
        SET highest_post_number = highest_post_number + 1,
            reply_count = reply_count
                + CASE WHEN ? AND highest_post_number > 0 THEN 1 ELSE 0 END
        WHERE id = ?
        RETURNING highest_post_number
        ",
    )
    .bind(count_reply)
    .bind(topic_id)
    .fetch_optional(&mut *conn)
    .await
    .context("Failed to allocate post number")?;

    match row {
        Some((next,)) => Ok(next),
        None => bail!("topic {topic_id} not found during post number allocation"),
    }
}
