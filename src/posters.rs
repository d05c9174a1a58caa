//! Featured-poster selection and the display poster summary.

use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;

use crate::engine::TopicEngine;
use crate::error::Result;

/// Role labels attached to poster summary entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PosterRole {
    OriginalPoster,
    MostPosts,
    FrequentPoster,
    MostRecentPoster,
}

impl PosterRole {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::OriginalPoster => "Original Poster",
            Self::MostPosts => "Most Posts",
            Self::FrequentPoster => "Frequent Poster",
            Self::MostRecentPoster => "Most Recent Poster",
        }
    }
}

/// One entry of the poster summary. A user holding several roles gets all
/// their labels on the single entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PosterSummaryEntry {
    pub user_id: i64,
    pub roles: Vec<PosterRole>,
}

impl PosterSummaryEntry {
    /// Concatenated role labels for display.
    #[must_use]
    pub fn description(&self) -> String {
        self.roles
            .iter()
            .map(PosterRole::label)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl TopicEngine {
    /// Build the ordered poster summary for a topic: up to 5 deduplicated
    /// entries covering the original poster, the persisted featured slots,
    /// and the last poster (always placed last when present).
    ///
    /// The featured-slot assignment is recomputed and persisted on every
    /// call; the returned summary is cached per topic until a structural
    /// mutation invalidates it. Passing `exclude_post_id` leaves that post
    /// out of the frequency ranking and bypasses the cache.
    pub async fn poster_summary(
        &self,
        topic_id: i64,
        exclude_post_id: Option<i64>,
    ) -> Result<Arc<Vec<PosterSummaryEntry>>> {
        let topic = self.require_topic(topic_id).await?;

        // Rank non-deleted posts by author, excluding the original poster
        // and the current last poster. Ties break by first appearance in the
        // topic.
        let ranked: Vec<(i64,)> = sqlx::query_as(
            r"
            SELECT user_id
            FROM posts
            WHERE topic_id = ? AND deleted_at IS NULL
              AND user_id NOT IN (?, ?)
              AND (? IS NULL OR id != ?)
            GROUP BY user_id
            ORDER BY COUNT(*) DESC, MIN(post_number) ASC
            LIMIT 4
            ",
        )
        .bind(topic_id)
        .bind(topic.user_id)
        .bind(topic.last_post_user_id)
        .bind(exclude_post_id)
        .bind(exclude_post_id)
        .fetch_all(self.pool())
        .await
        .context("Failed to rank posters")?;
        let featured: Vec<i64> = ranked.into_iter().map(|(id,)| id).collect();

        // Persist the slot assignment in rank order, clearing any slot not
        // re-filled.
        sqlx::query(
            r"
            UPDATE topics
            SET featured_user1_id = ?,
                featured_user2_id = ?,
                featured_user3_id = ?,
                featured_user4_id = ?
            WHERE id = ?
            ",
        )
        .bind(featured.first().copied())
        .bind(featured.get(1).copied())
        .bind(featured.get(2).copied())
        .bind(featured.get(3).copied())
        .bind(topic_id)
        .execute(self.pool())
        .await
        .context("Failed to persist featured posters")?;

        if exclude_post_id.is_none() {
            if let Some(cached) = self.cached_poster_summary(topic_id) {
                return Ok(cached);
            }
        }

        let summary = build_summary(topic.user_id, topic.last_post_user_id, &featured);
        if exclude_post_id.is_none() {
            return Ok(self.store_poster_summary(topic_id, summary));
        }
        Ok(Arc::new(summary))
    }
}

/// Assemble the display summary from the selected user ids.
///
/// Entries keep selection order (original poster, then featured slots by
/// rank) except the last poster, whose entry always moves to the end. The
/// result never repeats a user and never exceeds 5 entries.
fn build_summary(creator_id: i64, last_poster_id: i64, featured: &[i64]) -> Vec<PosterSummaryEntry> {
    let mut entries = vec![PosterSummaryEntry {
        user_id: creator_id,
        roles: vec![PosterRole::OriginalPoster],
    }];

    for (rank, &user_id) in featured.iter().enumerate() {
        let role = if rank == 0 {
            PosterRole::MostPosts
        } else {
            PosterRole::FrequentPoster
        };
        entries.push(PosterSummaryEntry {
            user_id,
            roles: vec![role],
        });
    }

    if let Some(pos) = entries.iter().position(|e| e.user_id == last_poster_id) {
        let mut entry = entries.remove(pos);
        entry.roles.push(PosterRole::MostRecentPoster);
        entries.push(entry);
    } else {
        if entries.len() == 5 {
            // Make room without displacing the original poster or the
            // higher-ranked featured slots.
            entries.pop();
        }
        entries.push(PosterSummaryEntry {
            user_id: last_poster_id,
            roles: vec![PosterRole::MostRecentPoster],
        });
    }

    entries.truncate(5);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creator_only_topic_merges_both_roles() {
        let summary = build_summary(1, 1, &[]);
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].user_id, 1);
        assert_eq!(
            summary[0].roles,
            vec![PosterRole::OriginalPoster, PosterRole::MostRecentPoster]
        );
    }

    #[test]
    fn last_poster_entry_is_always_last() {
        let summary = build_summary(1, 3, &[2, 3, 4]);
        let ids: Vec<i64> = summary.iter().map(|e| e.user_id).collect();
        assert_eq!(ids, vec![1, 2, 4, 3]);
        assert_eq!(
            summary.last().unwrap().roles,
            vec![PosterRole::FrequentPoster, PosterRole::MostRecentPoster]
        );
    }

    #[test]
    fn caps_at_five_entries_keeping_last_poster() {
        let summary = build_summary(1, 9, &[2, 3, 4, 5]);
        let ids: Vec<i64> = summary.iter().map(|e| e.user_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 9]);
        assert_eq!(summary.last().unwrap().roles, vec![PosterRole::MostRecentPoster]);
    }

    #[test]
    fn never_repeats_a_user() {
        let summary = build_summary(1, 2, &[2, 3]);
        let ids: Vec<i64> = summary.iter().map(|e| e.user_id).collect();
        assert_eq!(ids, vec![1, 3, 2]);
    }
}
