//! Per-(topic, user) state: notification level, stars, mutes, pin
//! dismissal. Every mutation is an upsert against the TopicUser row; rows
//! are created lazily and never hard-deleted.

use anyhow::Context;
use tracing::{debug, warn};

use crate::db::{self, now_utc, NotificationLevel};
use crate::engine::TopicEngine;
use crate::error::{EngineError, Result};
use crate::external::STAR_ACTION;

impl TopicEngine {
    /// Set a user's notification level for a topic.
    pub async fn set_notification_level(
        &self,
        topic_id: i64,
        user_id: i64,
        level: NotificationLevel,
    ) -> Result<()> {
        self.require_topic(topic_id).await?;
        sqlx::query(
            r"
            INSERT INTO topic_users (topic_id, user_id, notification_level)
            VALUES (?, ?, ?)
            ON CONFLICT (topic_id, user_id)
            DO UPDATE SET notification_level = excluded.notification_level
            ",
        )
        .bind(topic_id)
        .bind(user_id)
        .bind(level.as_i64())
        .execute(self.pool())
        .await
        .context("Failed to set notification level")?;

        debug!(topic_id, user_id, ?level, "Set notification level");
        Ok(())
    }

    /// Star or unstar a topic for a user, returning the topic's new
    /// `star_count`.
    ///
    /// The count is recomputed as a live count over starred TopicUser rows
    /// rather than incremented, so concurrent toggles cannot drift it.
    /// Starring draws one credit from the daily rate limiter; unstarring
    /// credits it back. A credit taken for a star whose transaction then
    /// fails is also returned. Toggling to the current state is a no-op
    /// that touches neither the row nor the budget.
    ///
    /// # Errors
    ///
    /// `Validation` when the daily star budget is exhausted.
    pub async fn set_star(&self, topic_id: i64, user_id: i64, starred: bool) -> Result<i64> {
        let topic = self.require_topic(topic_id).await?;

        let currently = db::get_topic_user(self.pool(), topic_id, user_id)
            .await?
            .is_some_and(|tu| tu.starred);
        if currently == starred {
            return Ok(topic.star_count);
        }

        if starred {
            self.limiter
                .acquire(user_id, STAR_ACTION, self.config.max_stars_per_day)
                .await
                .map_err(|e| EngineError::Validation(format!("star limit: {e}")))?;
        } else if let Err(e) = self.limiter.rollback(user_id, STAR_ACTION).await {
            warn!(user_id, error = %e, "Failed to credit star limiter back");
        }

        let result = self.apply_star(topic_id, user_id, starred).await;
        if result.is_err() && starred {
            if let Err(e) = self.limiter.rollback(user_id, STAR_ACTION).await {
                warn!(user_id, error = %e, "Failed to return star credit after error");
            }
        }
        result
    }

    async fn apply_star(&self, topic_id: i64, user_id: i64, starred: bool) -> Result<i64> {
        let starred_at = starred.then(now_utc);

        let mut tx = self
            .pool()
            .begin()
            .await
            .context("Failed to begin star toggle")?;

        sqlx::query(
            r"
            INSERT INTO topic_users (topic_id, user_id, starred, starred_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (topic_id, user_id)
            DO UPDATE SET starred = excluded.starred, starred_at = excluded.starred_at
            ",
        )
        .bind(topic_id)
        .bind(user_id)
        .bind(starred)
        .bind(&starred_at)
        .execute(&mut *tx)
        .await
        .context("Failed to upsert star")?;

        let (star_count,): (i64,) = sqlx::query_as(
            r"
            UPDATE topics
            SET star_count = (SELECT COUNT(*) FROM topic_users
                              WHERE topic_id = ? AND starred = 1)
            WHERE id = ?
            RETURNING star_count
            ",
        )
        .bind(topic_id)
        .bind(topic_id)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to recount stars")?;

        tx.commit().await.context("Failed to commit star toggle")?;

        debug!(topic_id, user_id, starred, star_count, "Toggled star");
        Ok(star_count)
    }

    /// Flip a user's mute state: muted becomes regular, anything else
    /// becomes muted.
    pub async fn toggle_mute(&self, topic_id: i64, user_id: i64) -> Result<NotificationLevel> {
        let current = db::get_topic_user(self.pool(), topic_id, user_id)
            .await?
            .and_then(|tu| tu.level())
            .unwrap_or(NotificationLevel::Regular);

        let new_level = if current == NotificationLevel::Muted {
            NotificationLevel::Regular
        } else {
            NotificationLevel::Muted
        };
        self.set_notification_level(topic_id, user_id, new_level)
            .await?;
        Ok(new_level)
    }

    /// Dismiss a globally pinned topic for one user without touching the
    /// global pin.
    pub async fn clear_pin(&self, topic_id: i64, user_id: i64) -> Result<()> {
        self.require_topic(topic_id).await?;
        sqlx::query(
            r"
            INSERT INTO topic_users (topic_id, user_id, cleared_pinned_at)
            VALUES (?, ?, ?)
            ON CONFLICT (topic_id, user_id)
            DO UPDATE SET cleared_pinned_at = excluded.cleared_pinned_at
            ",
        )
        .bind(topic_id)
        .bind(user_id)
        .bind(now_utc())
        .execute(self.pool())
        .await
        .context("Failed to clear pin")?;
        Ok(())
    }
}
