//! Idempotent invitation of users into topics.

use anyhow::Context;
use tracing::{debug, warn};

use crate::db::{self, now_utc, Invite, NotificationLevel, Topic};
use crate::engine::TopicEngine;
use crate::error::{EngineError, Result};

/// What an invite call accomplished.
#[derive(Debug, Clone)]
pub enum InviteOutcome {
    /// The identifier resolved to an existing user who was granted access
    /// directly; no invite entity exists.
    AccessGranted,
    /// An email invite was created or reused. `reused` is set when a prior
    /// invite for the same (inviter, email) pair was found, possibly
    /// recovered from soft-deletion.
    Invited { invite: Invite, reused: bool },
}

impl TopicEngine {
    /// Invite a user into a topic by identifier (username or email).
    ///
    /// On a private message, an identifier resolving to an existing user is
    /// granted access directly; re-inviting an already-granted user is a
    /// no-op success. Email identifiers go through the deduplicated invite
    /// path: the (inviter, email) pair is reused across topics, recovering a
    /// soft-deleted invite rather than creating a duplicate. An email
    /// already belonging to a registered user becomes a direct access grant
    /// on private messages and a validation failure elsewhere. Every
    /// successful invite links the invite to the topic idempotently and
    /// queues the notification email.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the identifier is neither a resolvable user
    /// nor an email; `Validation` for the registered-email case outside
    /// private messages.
    pub async fn invite(
        &self,
        topic_id: i64,
        invited_by: i64,
        identifier: &str,
    ) -> Result<InviteOutcome> {
        let topic = self.require_topic(topic_id).await?;

        if topic.is_private_message() {
            if let Some(user) = self
                .identity
                .resolve_user(identifier)
                .await
                .context("Failed to resolve invitee")?
            {
                self.grant_access(topic_id, user.id).await?;
                return Ok(InviteOutcome::AccessGranted);
            }
        }

        if identifier.contains('@') {
            return self.invite_by_email(&topic, invited_by, identifier).await;
        }

        Err(EngineError::InvalidArgument(format!(
            "cannot invite {identifier:?}: not a known user or email address"
        )))
    }

    async fn invite_by_email(
        &self,
        topic: &Topic,
        invited_by: i64,
        email: &str,
    ) -> Result<InviteOutcome> {
        let existing = db::get_invite_by_inviter_email(self.pool(), invited_by, email).await?;

        let (invite, reused) = match existing {
            Some(invite) => {
                if invite.deleted_at.is_some() {
                    sqlx::query("UPDATE invites SET deleted_at = NULL WHERE id = ?")
                        .bind(invite.id)
                        .execute(self.pool())
                        .await
                        .context("Failed to recover invite")?;
                }
                debug!(invite_id = invite.id, "Reusing existing invite");
                (
                    db::get_invite_by_inviter_email(self.pool(), invited_by, email)
                        .await?
                        .ok_or_else(|| {
                            EngineError::Internal(anyhow::anyhow!("invite vanished during reuse"))
                        })?,
                    true,
                )
            }
            None => {
                // The email may already belong to a registered account; on a
                // private message that converts into a direct grant.
                if let Some(user) = self
                    .identity
                    .user_for_email(email)
                    .await
                    .context("Failed to look up email owner")?
                {
                    if topic.is_private_message() {
                        self.grant_access(topic.id, user.id).await?;
                        return Ok(InviteOutcome::AccessGranted);
                    }
                    return Err(EngineError::Validation(format!(
                        "{email} already belongs to a registered user"
                    )));
                }

                let result = sqlx::query(
                    "INSERT INTO invites (invited_by_id, email, created_at) VALUES (?, ?, ?)",
                )
                .bind(invited_by)
                .bind(email)
                .bind(now_utc())
                .execute(self.pool())
                .await
                .context("Failed to create invite")?;
                let invite_id = result.last_insert_rowid();
                (
                    db::get_invite_by_inviter_email(self.pool(), invited_by, email)
                        .await?
                        .ok_or_else(|| {
                            EngineError::Internal(anyhow::anyhow!(
                                "invite {invite_id} vanished after insert"
                            ))
                        })?,
                    false,
                )
            }
        };

        // Linking is idempotent: re-linking an already-linked invite does
        // not duplicate the row.
        sqlx::query(
            r"
            INSERT OR IGNORE INTO topic_invites (topic_id, invite_id, created_at)
            VALUES (?, ?, ?)
            ",
        )
        .bind(topic.id)
        .bind(invite.id)
        .bind(now_utc())
        .execute(self.pool())
        .await
        .context("Failed to link invite to topic")?;

        if let Err(e) = self.notifier.enqueue_invite_email(invite.id, topic.id).await {
            warn!(invite_id = invite.id, error = %e, "Failed to queue invite email");
        }

        Ok(InviteOutcome::Invited { invite, reused })
    }

    /// Put a user on a topic's allow-list, idempotently, watching the topic.
    async fn grant_access(&self, topic_id: i64, user_id: i64) -> Result<()> {
        sqlx::query(
            r"
            INSERT OR IGNORE INTO topic_allowed_users (topic_id, user_id, created_at)
            VALUES (?, ?, ?)
            ",
        )
        .bind(topic_id)
        .bind(user_id)
        .bind(now_utc())
        .execute(self.pool())
        .await
        .context("Failed to grant topic access")?;

        self.set_notification_level(topic_id, user_id, NotificationLevel::Watching)
            .await
    }
}
