//! Interfaces to external collaborators.
//!
//! The engine consumes these services but never implements them: identity and
//! authorization, per-day rate limiting, deferred job scheduling, email and
//! notification dispatch, text processing, and moderator-post authoring.
//! Implementations are injected into [`crate::TopicEngine`] as trait objects.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Deferred job that closes a topic when its auto-close deadline arrives.
pub const CLOSE_TOPIC_JOB: &str = "close_topic";

/// Rate-limited action key for starring a topic.
pub const STAR_ACTION: &str = "star";

/// Acting user id for operations attributed to the system rather than a
/// person (e.g. auto-close derived from a category default when the topic
/// creator is not staff).
pub const SYSTEM_USER_ID: i64 = -1;

/// A user resolved by the identity service.
#[derive(Debug, Clone)]
pub struct ResolvedUser {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
}

/// Identity and authorization.
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Resolve a username or other identifier to a user, if one exists.
    async fn resolve_user(&self, identifier: &str) -> Result<Option<ResolvedUser>>;

    /// Find the registered user owning an email address, if any.
    async fn user_for_email(&self, email: &str) -> Result<Option<ResolvedUser>>;

    /// Whether the user may read the given topic.
    async fn can_see_topic(&self, user_id: i64, topic_id: i64) -> Result<bool>;

    /// Whether the user is staff (used for auto-close attribution).
    async fn is_staff(&self, user_id: i64) -> Result<bool>;
}

/// Bounded-per-day action credits keyed by (user, action, day).
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Take one credit; fails when the daily budget is exhausted.
    async fn acquire(&self, user_id: i64, action: &str, max_per_day: u32) -> Result<()>;

    /// Return a previously taken credit (e.g. a star being removed).
    async fn rollback(&self, user_id: i64, action: &str) -> Result<()>;
}

/// Deferred background-job dispatch.
///
/// Scheduled work is fire-and-forget: execution is eventual and failures are
/// handled by the downstream job system, never by the transaction that
/// queued them.
#[async_trait]
pub trait JobScheduler: Send + Sync {
    /// Schedule a job for a future instant.
    async fn schedule(&self, job: &str, run_at: DateTime<Utc>, payload: Value) -> Result<()>;

    /// Cancel any scheduled run of `job` matching the key payload.
    async fn cancel(&self, job: &str, key: Value) -> Result<()>;
}

/// Email and cross-user notification dispatch.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Queue the invite-notification email for an invite.
    async fn enqueue_invite_email(&self, invite_id: i64, topic_id: i64) -> Result<()>;

    /// Tell authors their posts were moved to another topic.
    async fn notify_moved_posts(
        &self,
        user_ids: &[i64],
        source_topic_id: i64,
        destination_topic_id: i64,
    ) -> Result<()>;
}

/// Title sanitization, slug generation, and message localization.
pub trait TextProcessor: Send + Sync {
    /// Normalize a raw title (strip markup, collapse whitespace).
    fn sanitize_title(&self, raw: &str) -> String;

    /// Produce a URL slug from a title.
    fn slug_for(&self, title: &str) -> String;

    /// Render a human-readable localized message for a key and parameters.
    fn message(&self, key: &str, params: &[(&str, String)]) -> String;
}

/// Authoring of automated "moderator action" posts.
#[async_trait]
pub trait ModeratorPoster: Send + Sync {
    /// Create a moderator-action post in a topic.
    ///
    /// When `position` is given the post is anchored at that post number /
    /// sort position instead of being appended at the end.
    async fn create_action_post(
        &self,
        topic_id: i64,
        acting_user_id: i64,
        raw: &str,
        position: Option<i64>,
    ) -> Result<()>;
}
