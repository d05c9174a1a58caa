//! The engine facade: topic and post lifecycle plus wiring for the
//! component operations implemented in the sibling modules.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::db::{self, now_utc, Database, NewTopic, NotificationLevel, Post, Topic};
use crate::error::{EngineError, Result};
use crate::external::{
    IdentityService, JobScheduler, ModeratorPoster, NotificationSender, RateLimiter, TextProcessor,
};
use crate::posters::PosterSummaryEntry;
use crate::{sequence, stats};

/// The external services the engine consumes.
pub struct Collaborators {
    pub identity: Arc<dyn IdentityService>,
    pub limiter: Arc<dyn RateLimiter>,
    pub scheduler: Arc<dyn JobScheduler>,
    pub notifier: Arc<dyn NotificationSender>,
    pub text: Arc<dyn TextProcessor>,
    pub moderator: Arc<dyn ModeratorPoster>,
}

/// Transactional consistency engine for topic aggregates.
pub struct TopicEngine {
    pub(crate) db: Database,
    pub(crate) config: EngineConfig,
    pub(crate) identity: Arc<dyn IdentityService>,
    pub(crate) limiter: Arc<dyn RateLimiter>,
    pub(crate) scheduler: Arc<dyn JobScheduler>,
    pub(crate) notifier: Arc<dyn NotificationSender>,
    pub(crate) text: Arc<dyn TextProcessor>,
    pub(crate) moderator: Arc<dyn ModeratorPoster>,
    // Explicit per-topic cache of the poster summary, invalidated on every
    // structural mutation rather than tied to object lifetime.
    poster_summaries: Mutex<HashMap<i64, Arc<Vec<PosterSummaryEntry>>>>,
}

impl TopicEngine {
    #[must_use]
    pub fn new(db: Database, config: EngineConfig, services: Collaborators) -> Self {
        Self {
            db,
            config,
            identity: services.identity,
            limiter: services.limiter,
            scheduler: services.scheduler,
            notifier: services.notifier,
            text: services.text,
            moderator: services.moderator,
            poster_summaries: Mutex::new(HashMap::new()),
        }
    }

    /// The underlying database handle.
    #[must_use]
    pub const fn db(&self) -> &Database {
        &self.db
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        self.db.pool()
    }

    /// Fetch a topic or fail with `TopicNotFound`.
    pub(crate) async fn require_topic(&self, topic_id: i64) -> Result<Topic> {
        db::get_topic(self.pool(), topic_id)
            .await?
            .ok_or(EngineError::TopicNotFound(topic_id))
    }

    // ========== Topic lifecycle ==========

    /// Create a topic.
    ///
    /// The title is sanitized through the text-processing collaborator and
    /// validated against the configured limits and duplicate-title policy. A
    /// `watching` TopicUser row is auto-created for the creator, and any
    /// requested category is assigned through the at-most-once creation path.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a title outside the configured limits,
    /// `Validation` when duplicate titles are disallowed and one exists.
    pub async fn create_topic(&self, new_topic: &NewTopic) -> Result<Topic> {
        let title = self.validated_title(&new_topic.title).await?;
        let slug = self.text.slug_for(&title);
        let now = now_utc();

        let mut tx = self
            .pool()
            .begin()
            .await
            .context("Failed to begin topic creation")?;

        let result = sqlx::query(
            r"
            INSERT INTO topics (title, slug, user_id, last_post_user_id, archetype,
                                bumped_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&title)
        .bind(&slug)
        .bind(new_topic.user_id)
        .bind(new_topic.user_id)
        .bind(new_topic.archetype.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .context("Failed to insert topic")?;
        let topic_id = result.last_insert_rowid();

        // The creator starts out watching their own topic.
        sqlx::query(
            r"
            INSERT INTO topic_users (topic_id, user_id, notification_level)
            VALUES (?, ?, ?)
            ",
        )
        .bind(topic_id)
        .bind(new_topic.user_id)
        .bind(NotificationLevel::Watching.as_i64())
        .execute(&mut *tx)
        .await
        .context("Failed to create creator topic_user")?;

        tx.commit().await.context("Failed to commit topic creation")?;

        if let Some(category_id) = new_topic.category_id {
            self.assign_initial_category(topic_id, category_id).await?;
        }

        info!(topic_id, %slug, "Created topic");
        self.require_topic(topic_id).await
    }

    /// Update a topic's title, re-sanitizing and regenerating the slug.
    ///
    /// # Errors
    ///
    /// Same validation failures as `create_topic`.
    pub async fn update_title(&self, topic_id: i64, raw_title: &str) -> Result<Topic> {
        self.require_topic(topic_id).await?;
        let title = self.validated_title(raw_title).await?;
        let slug = self.text.slug_for(&title);

        sqlx::query("UPDATE topics SET title = ?, slug = ? WHERE id = ?")
            .bind(&title)
            .bind(&slug)
            .bind(topic_id)
            .execute(self.pool())
            .await
            .map_err(EngineError::from)?;

        self.require_topic(topic_id).await
    }

    /// Soft-delete a topic, releasing its slot in the category's count and
    /// featured cache.
    pub async fn delete_topic(&self, topic_id: i64) -> Result<()> {
        let topic = self.require_topic(topic_id).await?;
        if topic.deleted_at.is_some() {
            return Ok(());
        }

        sqlx::query("UPDATE topics SET deleted_at = ? WHERE id = ?")
            .bind(now_utc())
            .bind(topic_id)
            .execute(self.pool())
            .await
            .map_err(EngineError::from)?;

        if let Some(category_id) = topic.category_id {
            self.release_category_slot(category_id).await?;
        }
        self.invalidate_poster_summary(topic_id);
        Ok(())
    }

    /// Recover a soft-deleted topic, reclaiming its category slot.
    pub async fn recover_topic(&self, topic_id: i64) -> Result<()> {
        let topic = self.require_topic(topic_id).await?;
        if topic.deleted_at.is_none() {
            return Ok(());
        }

        sqlx::query("UPDATE topics SET deleted_at = NULL WHERE id = ?")
            .bind(topic_id)
            .execute(self.pool())
            .await
            .map_err(EngineError::from)?;

        if let Some(category_id) = topic.category_id {
            self.reclaim_category_slot(category_id).await?;
        }
        Ok(())
    }

    // ========== Post lifecycle ==========

    /// Create a post, allocating its number atomically with the insertion.
    ///
    /// Maintains `posts_count` (by live recount), `reply_count`,
    /// `last_post_user_id`, and `bumped_at` in the same transaction.
    pub async fn create_post(&self, topic_id: i64, user_id: i64, raw: &str) -> Result<Post> {
        let now = now_utc();
        let mut tx = self
            .pool()
            .begin()
            .await
            .context("Failed to begin post creation")?;

        // The allocation is the transaction's first write, so lock
        // acquisition happens here and the busy timeout applies. It also
        // owns the reply counting: every post beyond the opener is a reply.
        let post_number = sequence::allocate(&mut *tx, topic_id, true).await?;

        let result = sqlx::query(
            r"
            INSERT INTO posts (topic_id, user_id, post_number, sort_order, raw, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(topic_id)
        .bind(user_id)
        .bind(post_number)
        .bind(post_number)
        .bind(raw)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .context("Failed to insert post")?;
        let post_id = result.last_insert_rowid();

        sqlx::query(
            r"
            UPDATE topics
            SET posts_count = (SELECT COUNT(*) FROM posts
                               WHERE topic_id = ? AND deleted_at IS NULL),
                last_post_user_id = ?,
                bumped_at = ?
            WHERE id = ?
            ",
        )
        .bind(topic_id)
        .bind(user_id)
        .bind(&now)
        .bind(topic_id)
        .execute(&mut *tx)
        .await
        .context("Failed to update topic after post creation")?;

        tx.commit().await.context("Failed to commit post creation")?;

        self.invalidate_poster_summary(topic_id);
        debug!(topic_id, post_id, post_number, "Created post");

        db::get_post(self.pool(), post_id)
            .await?
            .ok_or(EngineError::PostNotFound(post_id))
    }

    /// Soft-delete a post and resynchronize the topic's statistics, which
    /// also clamps read positions past the new highest post number. Both
    /// happen in one transaction.
    pub async fn delete_post(&self, post_id: i64) -> Result<()> {
        let post = db::get_post(self.pool(), post_id)
            .await?
            .ok_or(EngineError::PostNotFound(post_id))?;
        if post.deleted_at.is_some() {
            return Ok(());
        }

        let mut tx = self
            .pool()
            .begin()
            .await
            .context("Failed to begin post deletion")?;
        sqlx::query("UPDATE posts SET deleted_at = ? WHERE id = ?")
            .bind(now_utc())
            .bind(post_id)
            .execute(&mut *tx)
            .await
            .context("Failed to soft-delete post")?;
        stats::recalculate_in(&mut *tx, post.topic_id).await?;
        tx.commit().await.context("Failed to commit post deletion")?;

        self.invalidate_poster_summary(post.topic_id);
        Ok(())
    }

    /// Recover a soft-deleted post.
    ///
    /// The post's old number may have been reassigned by a recalculation, so
    /// recovery allocates a fresh number; the preserved `sort_order` keeps
    /// the post at its original display position, and the recalculation in
    /// the same transaction folds it back into the 1..N numbering. A failure
    /// anywhere leaves the post deleted.
    pub async fn recover_post(&self, post_id: i64) -> Result<()> {
        let post = db::get_post(self.pool(), post_id)
            .await?
            .ok_or(EngineError::PostNotFound(post_id))?;
        if post.deleted_at.is_none() {
            return Ok(());
        }

        let mut tx = self
            .pool()
            .begin()
            .await
            .context("Failed to begin post recovery")?;
        let post_number = sequence::allocate(&mut *tx, post.topic_id, false).await?;
        sqlx::query("UPDATE posts SET deleted_at = NULL, post_number = ? WHERE id = ?")
            .bind(post_number)
            .bind(post_id)
            .execute(&mut *tx)
            .await
            .context("Failed to recover post")?;
        stats::recalculate_in(&mut *tx, post.topic_id).await?;
        tx.commit().await.context("Failed to commit post recovery")?;

        self.invalidate_poster_summary(post.topic_id);
        Ok(())
    }

    // ========== Statistics ==========

    /// Resynchronize all denormalized counters from the post rows.
    pub async fn recalculate_statistics(&self, topic_id: i64) -> Result<()> {
        self.require_topic(topic_id).await?;
        stats::recalculate(self.pool(), topic_id).await?;
        self.invalidate_poster_summary(topic_id);
        Ok(())
    }

    // ========== Internals shared with component modules ==========

    async fn validated_title(&self, raw: &str) -> Result<String> {
        let title = self.text.sanitize_title(raw);
        let len = title.chars().count();
        if len < self.config.min_title_length || len > self.config.max_title_length {
            return Err(EngineError::InvalidArgument(format!(
                "title length {len} outside {}..={}",
                self.config.min_title_length, self.config.max_title_length
            )));
        }
        if !self.config.allow_duplicate_titles
            && db::count_topics_with_title(self.pool(), &title).await? > 0
        {
            return Err(EngineError::Validation(format!(
                "a topic titled {title:?} already exists"
            )));
        }
        Ok(title)
    }

    pub(crate) fn invalidate_poster_summary(&self, topic_id: i64) {
        self.poster_summaries
            .lock()
            .expect("poster summary cache poisoned")
            .remove(&topic_id);
    }

    pub(crate) fn cached_poster_summary(&self, topic_id: i64) -> Option<Arc<Vec<PosterSummaryEntry>>> {
        self.poster_summaries
            .lock()
            .expect("poster summary cache poisoned")
            .get(&topic_id)
            .cloned()
    }

    pub(crate) fn store_poster_summary(
        &self,
        topic_id: i64,
        summary: Vec<PosterSummaryEntry>,
    ) -> Arc<Vec<PosterSummaryEntry>> {
        let summary = Arc::new(summary);
        self.poster_summaries
            .lock()
            .expect("poster summary cache poisoned")
            .insert(topic_id, Arc::clone(&summary));
        summary
    }
}
