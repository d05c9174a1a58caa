use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::debug;

/// Run all pending migrations.
pub async fn run(pool: &SqlitePool) -> Result<()> {
    create_migration_table(pool).await?;
    let current_version = get_schema_version(pool).await?;

    if current_version < 1 {
        debug!("Running migration v1");
        run_migration_v1(pool).await?;
        set_schema_version(pool, 1).await?;
    }

    if current_version < 2 {
        debug!("Running migration v2");
        run_migration_v2(pool).await?;
        set_schema_version(pool, 2).await?;
    }

    if current_version < 3 {
        debug!("Running migration v3");
        run_migration_v3(pool).await?;
        set_schema_version(pool, 3).await?;
    }

    Ok(())
}

async fn create_migration_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS _schema_version (
            version INTEGER PRIMARY KEY
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create schema version table")?;

    Ok(())
}

async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let row: Option<(i32,)> = sqlx::query_as("SELECT version FROM _schema_version LIMIT 1")
        .fetch_optional(pool)
        .await
        .context("Failed to get schema version")?;

    Ok(row.map_or(0, |(v,)| v))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("DELETE FROM _schema_version")
        .execute(pool)
        .await?;
    sqlx::query("INSERT INTO _schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

async fn run_migration_v1(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v1: core topic aggregate schema");

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            slug TEXT NOT NULL,
            topic_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create categories table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS topics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            slug TEXT NOT NULL,
            user_id INTEGER NOT NULL,
            last_post_user_id INTEGER NOT NULL,
            category_id INTEGER REFERENCES categories(id) ON DELETE SET NULL,
            highest_post_number INTEGER NOT NULL DEFAULT 0,
            posts_count INTEGER NOT NULL DEFAULT 0,
            reply_count INTEGER NOT NULL DEFAULT 0,
            featured_user1_id INTEGER,
            featured_user2_id INTEGER,
            featured_user3_id INTEGER,
            featured_user4_id INTEGER,
            like_count INTEGER NOT NULL DEFAULT 0,
            flag_count INTEGER NOT NULL DEFAULT 0,
            star_count INTEGER NOT NULL DEFAULT 0,
            avg_time REAL,
            archetype TEXT NOT NULL DEFAULT 'regular',
            closed INTEGER NOT NULL DEFAULT 0,
            archived INTEGER NOT NULL DEFAULT 0,
            pinned_at TEXT,
            bumped_at TEXT NOT NULL,
            auto_close_at TEXT,
            auto_close_user_id INTEGER,
            created_at TEXT NOT NULL,
            deleted_at TEXT
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create topics table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS posts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            topic_id INTEGER NOT NULL REFERENCES topics(id) ON DELETE CASCADE,
            user_id INTEGER NOT NULL,
            post_number INTEGER NOT NULL,
            sort_order INTEGER NOT NULL,
            raw TEXT NOT NULL,
            like_count INTEGER NOT NULL DEFAULT 0,
            flag_count INTEGER NOT NULL DEFAULT 0,
            avg_time REAL,
            created_at TEXT NOT NULL,
            deleted_at TEXT
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create posts table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS topic_users (
            topic_id INTEGER NOT NULL REFERENCES topics(id) ON DELETE CASCADE,
            user_id INTEGER NOT NULL,
            notification_level INTEGER NOT NULL DEFAULT 1,
            starred INTEGER NOT NULL DEFAULT 0,
            starred_at TEXT,
            cleared_pinned_at TEXT,
            last_read_post_number INTEGER NOT NULL DEFAULT 0,
            seen_post_count INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (topic_id, user_id)
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create topic_users table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS category_featured_topics (
            category_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
            topic_id INTEGER NOT NULL REFERENCES topics(id) ON DELETE CASCADE,
            rank INTEGER NOT NULL,
            PRIMARY KEY (category_id, topic_id)
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create category_featured_topics table")?;

    Ok(())
}

async fn run_migration_v2(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v2: invites and private-message access");

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS invites (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            invited_by_id INTEGER NOT NULL,
            email TEXT NOT NULL,
            created_at TEXT NOT NULL,
            deleted_at TEXT,
            UNIQUE (invited_by_id, email)
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create invites table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS topic_invites (
            topic_id INTEGER NOT NULL REFERENCES topics(id) ON DELETE CASCADE,
            invite_id INTEGER NOT NULL REFERENCES invites(id) ON DELETE CASCADE,
            created_at TEXT NOT NULL,
            PRIMARY KEY (topic_id, invite_id)
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create topic_invites table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS topic_allowed_users (
            topic_id INTEGER NOT NULL REFERENCES topics(id) ON DELETE CASCADE,
            user_id INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (topic_id, user_id)
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create topic_allowed_users table")?;

    Ok(())
}

async fn run_migration_v3(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v3: indexes");

    // Post numbers are unique per topic only among live rows; soft-deleted
    // posts keep their old number until a recalculation reassigns it.
    sqlx::query(
        r"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_posts_topic_post_number
        ON posts(topic_id, post_number)
        WHERE deleted_at IS NULL
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create posts post_number index")?;

    sqlx::query(
        r"
        CREATE INDEX IF NOT EXISTS idx_posts_topic_created
        ON posts(topic_id, created_at)
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create posts created_at index")?;

    sqlx::query(
        r"
        CREATE INDEX IF NOT EXISTS idx_topics_category_bumped
        ON topics(category_id, bumped_at)
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create topics bumped_at index")?;

    Ok(())
}
