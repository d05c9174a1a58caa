use anyhow::{Context, Result};
use sqlx::SqlitePool;

use super::models::{now_utc, Category, Invite, Post, Topic, TopicUser};

// ========== Topics ==========

/// Get a topic by id, including soft-deleted ones.
pub async fn get_topic(pool: &SqlitePool, id: i64) -> Result<Option<Topic>> {
    sqlx::query_as("SELECT * FROM topics WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch topic")
}

/// Count live topics with the given title (duplicate-title policy checks).
pub async fn count_topics_with_title(pool: &SqlitePool, title: &str) -> Result<i64> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM topics WHERE title = ? AND deleted_at IS NULL")
            .bind(title)
            .fetch_one(pool)
            .await
            .context("Failed to count topics by title")?;
    Ok(count)
}

// ========== Posts ==========

/// Get a post by id.
pub async fn get_post(pool: &SqlitePool, id: i64) -> Result<Option<Post>> {
    sqlx::query_as("SELECT * FROM posts WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch post")
}

/// Live posts of a topic in display order.
pub async fn posts_for_topic(pool: &SqlitePool, topic_id: i64) -> Result<Vec<Post>> {
    sqlx::query_as(
        r"
        SELECT * FROM posts
        WHERE topic_id = ? AND deleted_at IS NULL
        ORDER BY sort_order, post_number
        ",
    )
    .bind(topic_id)
    .fetch_all(pool)
    .await
    .context("Failed to fetch posts for topic")
}

// ========== Categories ==========

/// Get a category by id.
pub async fn get_category(pool: &SqlitePool, id: i64) -> Result<Option<Category>> {
    sqlx::query_as("SELECT * FROM categories WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch category")
}

/// Insert a category, returning its id.
pub async fn insert_category(pool: &SqlitePool, name: &str, slug: &str) -> Result<i64> {
    let result = sqlx::query("INSERT INTO categories (name, slug, created_at) VALUES (?, ?, ?)")
        .bind(name)
        .bind(slug)
        .bind(now_utc())
        .execute(pool)
        .await
        .context("Failed to insert category")?;
    Ok(result.last_insert_rowid())
}

/// Topic ids in a category's featured-topics cache, best rank first.
pub async fn featured_topics_for_category(pool: &SqlitePool, category_id: i64) -> Result<Vec<i64>> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        r"
        SELECT topic_id FROM category_featured_topics
        WHERE category_id = ?
        ORDER BY rank
        ",
    )
    .bind(category_id)
    .fetch_all(pool)
    .await
    .context("Failed to fetch featured topics")?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

// ========== Topic users ==========

/// Get a user's per-topic state row, if it exists yet.
pub async fn get_topic_user(
    pool: &SqlitePool,
    topic_id: i64,
    user_id: i64,
) -> Result<Option<TopicUser>> {
    sqlx::query_as("SELECT * FROM topic_users WHERE topic_id = ? AND user_id = ?")
        .bind(topic_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch topic user")
}

// ========== Invites ==========

/// Find an invite by its (inviter, email) identity, including soft-deleted
/// rows so callers can recover them instead of creating duplicates.
pub async fn get_invite_by_inviter_email(
    pool: &SqlitePool,
    invited_by_id: i64,
    email: &str,
) -> Result<Option<Invite>> {
    sqlx::query_as("SELECT * FROM invites WHERE invited_by_id = ? AND email = ?")
        .bind(invited_by_id)
        .bind(email)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch invite")
}

/// Whether a user is on a topic's allow-list.
pub async fn topic_allows_user(pool: &SqlitePool, topic_id: i64, user_id: i64) -> Result<bool> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM topic_allowed_users WHERE topic_id = ? AND user_id = ?")
            .bind(topic_id)
            .bind(user_id)
            .fetch_optional(pool)
            .await
            .context("Failed to check topic allowed user")?;
    Ok(row.is_some())
}

/// Invite ids linked to a topic.
pub async fn invites_for_topic(pool: &SqlitePool, topic_id: i64) -> Result<Vec<i64>> {
    let rows: Vec<(i64,)> =
        sqlx::query_as("SELECT invite_id FROM topic_invites WHERE topic_id = ? ORDER BY invite_id")
            .bind(topic_id)
            .fetch_all(pool)
            .await
            .context("Failed to fetch topic invites")?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}
