//! Category transitions: per-category topic counts and the featured-topics
//! cache, maintained atomically with the membership change.

use anyhow::{Context, Result as AnyResult};
use sqlx::SqliteConnection;
use tracing::{debug, info};

use crate::db;
use crate::engine::TopicEngine;
use crate::error::{EngineError, Result};

impl TopicEngine {
    /// Move a topic to another category (or out of any category with
    /// `None`).
    ///
    /// Idempotent: assigning the current category is a no-op with no count
    /// churn and no cache refresh. Otherwise the old category's `topic_count`
    /// is decremented, the new one's incremented, the topic's reference
    /// updated, and both categories' featured-topics caches rebuilt — all in
    /// one transaction.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the destination category does not exist.
    pub async fn change_category(&self, topic_id: i64, new_category: Option<i64>) -> Result<()> {
        let topic = self.require_topic(topic_id).await?;
        if topic.category_id == new_category {
            return Ok(());
        }

        if let Some(category_id) = new_category {
            if db::get_category(self.pool(), category_id).await?.is_none() {
                return Err(EngineError::InvalidArgument(format!(
                    "category {category_id} not found"
                )));
            }
        }

        let mut tx = self
            .pool()
            .begin()
            .await
            .context("Failed to begin category transition")?;

        sqlx::query("UPDATE topics SET category_id = ? WHERE id = ?")
            .bind(new_category)
            .bind(topic_id)
            .execute(&mut *tx)
            .await
            .context("Failed to update topic category")?;

        if let Some(old_id) = topic.category_id {
            sqlx::query("UPDATE categories SET topic_count = topic_count - 1 WHERE id = ?")
                .bind(old_id)
                .execute(&mut *tx)
                .await
                .context("Failed to decrement old category count")?;
            refresh_featured_topics(&mut *tx, old_id, self.config.category_featured_topics).await?;
        }

        if let Some(new_id) = new_category {
            sqlx::query("UPDATE categories SET topic_count = topic_count + 1 WHERE id = ?")
                .bind(new_id)
                .execute(&mut *tx)
                .await
                .context("Failed to increment new category count")?;
            refresh_featured_topics(&mut *tx, new_id, self.config.category_featured_topics).await?;
        }

        tx.commit()
            .await
            .context("Failed to commit category transition")?;

        info!(topic_id, from = ?topic.category_id, to = ?new_category, "Changed topic category");
        Ok(())
    }

    /// Creation-time category auto-assignment.
    ///
    /// Applies at most once per topic: skipped when the topic already
    /// carries a category. Explicit `change_category` calls are not subject
    /// to this guard (policy decision pending product confirmation).
    pub async fn assign_initial_category(&self, topic_id: i64, category_id: i64) -> Result<()> {
        let topic = self.require_topic(topic_id).await?;
        if topic.category_id.is_some() {
            debug!(topic_id, category_id, "Skipping initial category assignment: already set");
            return Ok(());
        }
        self.change_category(topic_id, Some(category_id)).await
    }

    /// Release a soft-deleted topic's slot: decrement the count and rebuild
    /// the featured cache.
    pub(crate) async fn release_category_slot(&self, category_id: i64) -> Result<()> {
        self.adjust_category_slot(category_id, -1).await
    }

    /// Reclaim a recovered topic's slot.
    pub(crate) async fn reclaim_category_slot(&self, category_id: i64) -> Result<()> {
        self.adjust_category_slot(category_id, 1).await
    }

    async fn adjust_category_slot(&self, category_id: i64, delta: i64) -> Result<()> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .context("Failed to begin category adjustment")?;

        sqlx::query("UPDATE categories SET topic_count = topic_count + ? WHERE id = ?")
            .bind(delta)
            .bind(category_id)
            .execute(&mut *tx)
            .await
            .context("Failed to adjust category count")?;
        refresh_featured_topics(&mut *tx, category_id, self.config.category_featured_topics).await?;

        tx.commit()
            .await
            .context("Failed to commit category adjustment")?;
        Ok(())
    }
}

/// Rebuild a category's featured-topics cache inside the caller's
/// transaction: pinned topics first, then most recently bumped.
async fn refresh_featured_topics(
    tx: &mut SqliteConnection,
    category_id: i64,
    limit: i64,
) -> AnyResult<()> {
    sqlx::query("DELETE FROM category_featured_topics WHERE category_id = ?")
        .bind(category_id)
        .execute(&mut *tx)
        .await
        .context("Failed to clear featured topics")?;

    let topic_ids: Vec<(i64,)> = sqlx::query_as(
        r"
        SELECT id FROM topics
        WHERE category_id = ? AND deleted_at IS NULL
        ORDER BY (pinned_at IS NOT NULL) DESC, bumped_at DESC, id DESC
        LIMIT ?
        ",
    )
    .bind(category_id)
    .bind(limit)
    .fetch_all(&mut *tx)
    .await
    .context("Failed to select featured topics")?;

    for (rank, (topic_id,)) in topic_ids.iter().enumerate() {
        sqlx::query(
            "INSERT INTO category_featured_topics (category_id, topic_id, rank) VALUES (?, ?, ?)",
        )
        .bind(category_id)
        .bind(topic_id)
        .bind(rank as i64 + 1)
        .execute(&mut *tx)
        .await
        .context("Failed to insert featured topic")?;
    }

    Ok(())
}
