//! Topic status flags (closed, archived, pinned) and auto-close scheduling.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};

use crate::db::now_utc;
use crate::engine::TopicEngine;
use crate::error::Result;
use crate::external::{CLOSE_TOPIC_JOB, SYSTEM_USER_ID};

/// A settable topic status.
///
/// `Autoclosed` is a pseudo-status aliasing the `closed` column; it exists so
/// deferred close jobs can describe themselves distinctly in moderator
/// messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicStatus {
    Closed,
    Archived,
    Pinned,
    Autoclosed,
}

impl TopicStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Archived => "archived",
            Self::Pinned => "pinned",
            Self::Autoclosed => "autoclosed",
        }
    }
}

impl TopicEngine {
    /// Enable or disable a status flag on a topic.
    ///
    /// Pinning is special-cased through `pinned_at`; every other status maps
    /// 1:1 to a boolean column. Each actual transition authors an automated
    /// moderator message; re-opening a closed topic additionally bumps the
    /// topic, since the explanatory post counts as activity. Setting a
    /// status to its current value is a no-op.
    pub async fn update_status(
        &self,
        topic_id: i64,
        status: TopicStatus,
        enabled: bool,
        acting_user_id: i64,
    ) -> Result<()> {
        let topic = self.require_topic(topic_id).await?;

        let current = match status {
            TopicStatus::Pinned => topic.pinned_at.is_some(),
            TopicStatus::Closed | TopicStatus::Autoclosed => topic.closed,
            TopicStatus::Archived => topic.archived,
        };
        if current == enabled {
            return Ok(());
        }

        let now = now_utc();
        // Re-opening counts as activity; other transitions leave the bump
        // ordering alone.
        let bump = matches!(status, TopicStatus::Closed | TopicStatus::Autoclosed) && !enabled;

        match status {
            TopicStatus::Pinned => {
                sqlx::query("UPDATE topics SET pinned_at = ? WHERE id = ?")
                    .bind(enabled.then(|| now.clone()))
                    .bind(topic_id)
                    .execute(self.pool())
                    .await
                    .context("Failed to update pinned_at")?;
            }
            TopicStatus::Closed | TopicStatus::Autoclosed => {
                sqlx::query("UPDATE topics SET closed = ?, bumped_at = CASE WHEN ? THEN ? ELSE bumped_at END WHERE id = ?")
                    .bind(enabled)
                    .bind(bump)
                    .bind(&now)
                    .bind(topic_id)
                    .execute(self.pool())
                    .await
                    .context("Failed to update closed flag")?;
            }
            TopicStatus::Archived => {
                sqlx::query("UPDATE topics SET archived = ? WHERE id = ?")
                    .bind(enabled)
                    .bind(topic_id)
                    .execute(self.pool())
                    .await
                    .context("Failed to update archived flag")?;
            }
        }

        let message_key = format!(
            "topic_status.{}.{}",
            status.as_str(),
            if enabled { "enabled" } else { "disabled" }
        );
        let message = self.text.message(&message_key, &[]);
        self.moderator
            .create_action_post(topic_id, acting_user_id, &message, None)
            .await
            .context("Failed to author status moderator post")?;

        info!(topic_id, status = status.as_str(), enabled, "Updated topic status");
        Ok(())
    }

    /// Set or clear a topic's auto-close deadline.
    ///
    /// Any previously scheduled close job is cancelled; when a new deadline
    /// is set, a deferred close job is scheduled for that instant against
    /// the responsible user. `by_user` names that user explicitly; when the
    /// deadline was derived from a category default (`by_user` absent), the
    /// topic creator is responsible if staff, otherwise the system actor.
    /// Unchanged deadline and responsible user is a no-op.
    pub async fn set_auto_close(
        &self,
        topic_id: i64,
        at: Option<DateTime<Utc>>,
        by_user: Option<i64>,
    ) -> Result<()> {
        let topic = self.require_topic(topic_id).await?;

        let responsible = match (at, by_user) {
            (None, _) => None,
            (Some(_), Some(user_id)) => Some(user_id),
            (Some(_), None) => {
                if self
                    .identity
                    .is_staff(topic.user_id)
                    .await
                    .context("Staff check failed")?
                {
                    Some(topic.user_id)
                } else {
                    Some(SYSTEM_USER_ID)
                }
            }
        };

        let at_text = at.map(|d| d.to_rfc3339());
        if at_text == topic.auto_close_at && responsible == topic.auto_close_user_id {
            return Ok(());
        }

        sqlx::query("UPDATE topics SET auto_close_at = ?, auto_close_user_id = ? WHERE id = ?")
            .bind(&at_text)
            .bind(responsible)
            .bind(topic_id)
            .execute(self.pool())
            .await
            .context("Failed to persist auto-close settings")?;

        // Job dispatch is fire-and-forget; a scheduler hiccup must not undo
        // the persisted settings.
        if let Err(e) = self
            .scheduler
            .cancel(CLOSE_TOPIC_JOB, json!({ "topic_id": topic_id }))
            .await
        {
            warn!(topic_id, error = %e, "Failed to cancel scheduled close job");
        }
        if let Some(run_at) = at {
            let payload = json!({ "topic_id": topic_id, "user_id": responsible });
            if let Err(e) = self.scheduler.schedule(CLOSE_TOPIC_JOB, run_at, payload).await {
                warn!(topic_id, error = %e, "Failed to schedule close job");
            }
        }

        Ok(())
    }
}
