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
    debug!("Running migration v1: creating initial schema");

    // Target sites and their pacing credit
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS sites (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            base_url TEXT NOT NULL,
            username TEXT NOT NULL,
            password TEXT NOT NULL,
            lack_count INTEGER NOT NULL DEFAULT 0 CHECK (lack_count >= 0),
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create sites table")?;

    // Categories owned by a site
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            site_id INTEGER NOT NULL REFERENCES sites(id) ON DELETE CASCADE,
            external_id TEXT NOT NULL,
            name TEXT NOT NULL DEFAULT '',
            last_published_at INTEGER NOT NULL DEFAULT 0,
            UNIQUE (site_id, external_id)
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create categories table")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_categories_last_published ON categories(last_published_at)",
    )
    .execute(pool)
    .await?;

    // Backlog of articles waiting for demand
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS article_cache (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'default',
            created_at INTEGER NOT NULL
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create article_cache table")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_article_cache_created ON article_cache(created_at, id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn run_migration_v2(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v2: adding comment users");

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS comment_users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            alias TEXT NOT NULL,
            password TEXT NOT NULL
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create comment_users table")?;

    Ok(())
}
