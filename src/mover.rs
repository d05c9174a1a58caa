//! Moving posts between topics.

use anyhow::Context;
use tracing::{info, warn};

use crate::db::{Archetype, NewTopic, Post};
use crate::engine::TopicEngine;
use crate::error::{EngineError, Result};
use crate::stats;

/// Where moved posts land.
#[derive(Debug, Clone)]
pub enum MoveDestination {
    /// Create a fresh topic with this title (inheriting the source's
    /// category) and move into it.
    NewTopic { title: String },
    /// Move into an existing topic the mover can read.
    Existing { topic_id: i64 },
}

/// Outcome of a completed migration.
#[derive(Debug, Clone)]
pub struct MoveResult {
    pub destination_topic_id: i64,
    /// Ids of posts whose ownership changed (the copied opening post is not
    /// included).
    pub moved_post_ids: Vec<i64>,
    /// Destination post number of the first moved (non-copied) post; anchors
    /// the explanatory moderator message.
    pub first_moved_post_number: Option<i64>,
}

impl TopicEngine {
    /// Move (or for the opening post, copy) a subset of a topic's posts into
    /// another topic.
    ///
    /// Posts migrate in chronological order and are renumbered contiguously
    /// above the destination's previous maximum. Candidate validation and
    /// the whole reassignment run in one transaction: a post that does not
    /// belong to the source anymore (moved concurrently, deleted) aborts the
    /// migration with nothing applied, and a destination topic created for
    /// the move is deleted again on abort. After commit both endpoints'
    /// statistics are recalculated, an explanatory moderator message is
    /// anchored at the first moved position, and affected authors are
    /// notified asynchronously.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty id set or ids not belonging to the
    /// source topic; `PermissionDenied` when the mover cannot read an
    /// existing destination; `ConcurrencyConflict` when a post slipped away
    /// between validation and update.
    pub async fn move_posts(
        &self,
        moved_by: i64,
        source_topic_id: i64,
        post_ids: &[i64],
        destination: MoveDestination,
    ) -> Result<MoveResult> {
        if post_ids.is_empty() {
            return Err(EngineError::InvalidArgument(
                "no posts selected for move".to_string(),
            ));
        }
        let source = self.require_topic(source_topic_id).await?;

        let (destination_topic_id, created_destination) = match destination {
            MoveDestination::Existing { topic_id } => {
                if topic_id == source_topic_id {
                    return Err(EngineError::InvalidArgument(
                        "destination topic is the source topic".to_string(),
                    ));
                }
                self.require_topic(topic_id).await?;
                if !self
                    .identity
                    .can_see_topic(moved_by, topic_id)
                    .await
                    .context("Visibility check failed")?
                {
                    return Err(EngineError::PermissionDenied(format!(
                        "user {moved_by} cannot see topic {topic_id}"
                    )));
                }
                (topic_id, false)
            }
            MoveDestination::NewTopic { title } => {
                let new_topic = self
                    .create_topic(&NewTopic {
                        title,
                        user_id: moved_by,
                        category_id: source.category_id,
                        archetype: Archetype::Regular,
                    })
                    .await?;
                (new_topic.id, true)
            }
        };

        let (result, authors) = match self
            .reassign_posts(source_topic_id, destination_topic_id, post_ids)
            .await
        {
            Ok(moved) => moved,
            Err(e) => {
                // A destination created for this move must not outlive its
                // failure.
                if created_destination {
                    if let Err(cleanup) = self.delete_topic(destination_topic_id).await {
                        warn!(destination_topic_id, error = %cleanup, "Failed to remove destination of aborted move");
                    }
                }
                return Err(e);
            }
        };

        stats::recalculate(self.pool(), source_topic_id).await?;
        stats::recalculate(self.pool(), destination_topic_id).await?;
        self.invalidate_poster_summary(source_topic_id);
        self.invalidate_poster_summary(destination_topic_id);

        let message = self.text.message(
            "move_posts.moderator_post",
            &[
                ("count", result.moved_post_ids.len().to_string()),
                ("source_title", source.title.clone()),
            ],
        );
        self.moderator
            .create_action_post(
                destination_topic_id,
                moved_by,
                &message,
                result.first_moved_post_number,
            )
            .await
            .context("Failed to author move explanation post")?;

        // Fire-and-forget: delivery failures are the notification system's
        // problem, not the migration's.
        if let Err(e) = self
            .notifier
            .notify_moved_posts(&authors, source_topic_id, destination_topic_id)
            .await
        {
            warn!(source_topic_id, destination_topic_id, error = %e, "Failed to queue moved-posts notification");
        }

        info!(
            source_topic_id,
            destination_topic_id,
            moved = result.moved_post_ids.len(),
            "Moved posts"
        );
        Ok(result)
    }

    /// The transactional heart of the migration: validate the candidate set
    /// against the source, renumber at the destination, and leave the
    /// source's opening post intact by copying it. Returns the move outcome
    /// plus the deduplicated authors of the genuinely moved posts.
    async fn reassign_posts(
        &self,
        source_topic_id: i64,
        destination_topic_id: i64,
        post_ids: &[i64],
    ) -> Result<(MoveResult, Vec<i64>)> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .context("Failed to begin post migration")?;

        // Chronological order, not numeric: migration preserves the order
        // posts were written in. Loading inside the transaction means the
        // set cannot change under the reassignment.
        let placeholders = vec!["?"; post_ids.len()].join(", ");
        let sql = format!(
            r"
            SELECT * FROM posts
            WHERE topic_id = ? AND deleted_at IS NULL AND id IN ({placeholders})
            ORDER BY created_at, id
            "
        );
        let mut query = sqlx::query_as(&sql).bind(source_topic_id);
        for id in post_ids {
            query = query.bind(id);
        }
        let candidates: Vec<Post> = query
            .fetch_all(&mut *tx)
            .await
            .context("Failed to load move candidates")?;
        if candidates.len() != post_ids.len() {
            let found: Vec<i64> = candidates.iter().map(|p| p.id).collect();
            let missing: Vec<i64> = post_ids
                .iter()
                .copied()
                .filter(|id| !found.contains(id))
                .collect();
            return Err(EngineError::InvalidArgument(format!(
                "posts {missing:?} do not belong to topic {source_topic_id}"
            )));
        }

        let (destination_max,): (i64,) =
            sqlx::query_as("SELECT highest_post_number FROM topics WHERE id = ?")
                .bind(destination_topic_id)
                .fetch_one(&mut *tx)
                .await
                .context("Failed to read destination high-water mark")?;

        let mut moved_post_ids = Vec::new();
        let mut first_moved_post_number = None;
        let mut offset = 0i64;

        let mut authors = Vec::new();

        for post in &candidates {
            let new_number = destination_max + offset + 1;

            if post.post_number == 1 {
                // The opening post must never leave its topic: copy it to
                // the destination with the original author and raw content.
                sqlx::query(
                    r"
                    INSERT INTO posts (topic_id, user_id, post_number, sort_order, raw,
                                       like_count, flag_count, avg_time, created_at)
                    VALUES (?, ?, ?, ?, ?, 0, 0, NULL, ?)
                    ",
                )
                .bind(destination_topic_id)
                .bind(post.user_id)
                .bind(new_number)
                .bind(new_number)
                .bind(&post.raw)
                .bind(&post.created_at)
                .execute(&mut *tx)
                .await
                .context("Failed to copy opening post")?;
            } else {
                let updated = sqlx::query(
                    r"
                    UPDATE posts
                    SET topic_id = ?, post_number = ?, sort_order = ?
                    WHERE id = ? AND topic_id = ? AND deleted_at IS NULL
                    ",
                )
                .bind(destination_topic_id)
                .bind(new_number)
                .bind(new_number)
                .bind(post.id)
                .bind(source_topic_id)
                .execute(&mut *tx)
                .await
                .context("Failed to move post")?;

                if updated.rows_affected() != 1 {
                    tx.rollback()
                        .await
                        .context("Failed to roll back post migration")?;
                    return Err(EngineError::ConcurrencyConflict(vec![post.id]));
                }
                moved_post_ids.push(post.id);
                authors.push(post.user_id);
                if first_moved_post_number.is_none() {
                    first_moved_post_number = Some(new_number);
                }
            }
            offset += 1;
        }

        // Keep the destination's allocation counter ahead of every number
        // just handed out; the follow-up recalculation settles the rest.
        sqlx::query("UPDATE topics SET highest_post_number = ? WHERE id = ?")
            .bind(destination_max + offset)
            .bind(destination_topic_id)
            .execute(&mut *tx)
            .await
            .context("Failed to advance destination high-water mark")?;

        tx.commit().await.context("Failed to commit post migration")?;

        authors.sort_unstable();
        authors.dedup();
        Ok((
            MoveResult {
                destination_topic_id,
                moved_post_ids,
                first_moved_post_number,
            },
            authors,
        ))
    }
}
