use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Current UTC timestamp in the RFC3339 text form stored in the database.
#[must_use]
pub fn now_utc() -> String {
    Utc::now().to_rfc3339()
}

/// Topic archetype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Archetype {
    Regular,
    PrivateMessage,
}

impl Archetype {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::PrivateMessage => "private_message",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "regular" => Some(Self::Regular),
            "private_message" => Some(Self::PrivateMessage),
            _ => None,
        }
    }
}

/// Per-user notification level for a topic.
///
/// Explicitly ordered: muted < regular < tracking < watching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Muted = 0,
    Regular = 1,
    Tracking = 2,
    Watching = 3,
}

impl NotificationLevel {
    #[must_use]
    pub fn as_i64(&self) -> i64 {
        *self as i64
    }

    #[must_use]
    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(Self::Muted),
            1 => Some(Self::Regular),
            2 => Some(Self::Tracking),
            3 => Some(Self::Watching),
            _ => None,
        }
    }
}

/// A discussion thread aggregate with denormalized statistics.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Topic {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub user_id: i64,
    pub last_post_user_id: i64,
    pub category_id: Option<i64>,
    pub highest_post_number: i64,
    pub posts_count: i64,
    pub reply_count: i64,
    pub featured_user1_id: Option<i64>,
    pub featured_user2_id: Option<i64>,
    pub featured_user3_id: Option<i64>,
    pub featured_user4_id: Option<i64>,
    pub like_count: i64,
    pub flag_count: i64,
    pub star_count: i64,
    pub avg_time: Option<f64>,
    pub archetype: String,
    pub closed: bool,
    pub archived: bool,
    pub pinned_at: Option<String>,
    pub bumped_at: String,
    pub auto_close_at: Option<String>,
    pub auto_close_user_id: Option<i64>,
    pub created_at: String,
    pub deleted_at: Option<String>,
}

impl Topic {
    #[must_use]
    pub fn archetype_enum(&self) -> Option<Archetype> {
        Archetype::from_str(&self.archetype)
    }

    #[must_use]
    pub fn is_private_message(&self) -> bool {
        self.archetype_enum() == Some(Archetype::PrivateMessage)
    }

    /// Featured-poster slots in rank order, skipping empty slots.
    #[must_use]
    pub fn featured_user_ids(&self) -> Vec<i64> {
        [
            self.featured_user1_id,
            self.featured_user2_id,
            self.featured_user3_id,
            self.featured_user4_id,
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// A post within a topic.
///
/// `post_number` is the 1-based position among live posts; `sort_order`
/// drives display ordering independently of the numeric value so posts can be
/// reinserted mid-stream.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: i64,
    pub topic_id: i64,
    pub user_id: i64,
    pub post_number: i64,
    pub sort_order: i64,
    pub raw: String,
    pub like_count: i64,
    pub flag_count: i64,
    pub avg_time: Option<f64>,
    pub created_at: String,
    pub deleted_at: Option<String>,
}

/// Per-(topic, user) state. Created lazily on first interaction, never
/// hard-deleted.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TopicUser {
    pub topic_id: i64,
    pub user_id: i64,
    pub notification_level: i64,
    pub starred: bool,
    pub starred_at: Option<String>,
    pub cleared_pinned_at: Option<String>,
    pub last_read_post_number: i64,
    pub seen_post_count: i64,
}

impl TopicUser {
    #[must_use]
    pub fn level(&self) -> Option<NotificationLevel> {
        NotificationLevel::from_i64(self.notification_level)
    }
}

/// A category a topic can belong to.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub topic_count: i64,
    pub created_at: String,
}

/// An invitation, identified by its (inviter, email) pair. Soft-deletable and
/// recoverable so it can be reused across topics without duplicate creation.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Invite {
    pub id: i64,
    pub invited_by_id: i64,
    pub email: String,
    pub created_at: String,
    pub deleted_at: Option<String>,
}

/// Fields for creating a topic.
#[derive(Debug, Clone)]
pub struct NewTopic {
    pub title: String,
    pub user_id: i64,
    pub category_id: Option<i64>,
    pub archetype: Archetype,
}
