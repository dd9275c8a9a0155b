use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;

use super::models::{
    CacheStatus, CachedArticle, Category, CommentUser, NewCategory, NewCommentUser, NewSite, Site,
};

// ========== Sites ==========

/// Register a new site, returning its ID.
pub async fn insert_site(pool: &SqlitePool, site: &NewSite) -> Result<i64> {
    let result = sqlx::query(
        r"
        INSERT INTO sites (base_url, username, password, lack_count)
        VALUES (?, ?, ?, ?)
        ",
    )
    .bind(&site.base_url)
    .bind(&site.username)
    .bind(&site.password)
    .bind(site.lack_count.max(0))
    .execute(pool)
    .await
    .context("Failed to insert site")?;

    Ok(result.last_insert_rowid())
}

/// Get a site by ID.
pub async fn get_site(pool: &SqlitePool, id: i64) -> Result<Option<Site>> {
    sqlx::query_as("SELECT * FROM sites WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch site")
}

/// List every site in storage order.
pub async fn list_sites(pool: &SqlitePool) -> Result<Vec<Site>> {
    sqlx::query_as("SELECT * FROM sites ORDER BY id")
        .fetch_all(pool)
        .await
        .context("Failed to list sites")
}

/// Add `n` demand credits to a site.
///
/// The update is relative, so concurrent callers never lose increments. A
/// negative `n` is clamped so the counter stays non-negative.
pub async fn increase_lack_count(pool: &SqlitePool, site_id: i64, n: i64) -> Result<()> {
    sqlx::query("UPDATE sites SET lack_count = MAX(lack_count + ?, 0) WHERE id = ?")
        .bind(n)
        .bind(site_id)
        .execute(pool)
        .await
        .context("Failed to increase lack count")?;

    Ok(())
}

/// Total outstanding demand across all sites.
pub async fn sum_lack_count(pool: &SqlitePool) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COALESCE(SUM(lack_count), 0) FROM sites")
        .fetch_one(pool)
        .await
        .context("Failed to sum lack count")?;

    Ok(row.0)
}

// ========== Categories ==========

/// Register a new category, returning its ID.
pub async fn insert_category(pool: &SqlitePool, category: &NewCategory) -> Result<i64> {
    let result = sqlx::query(
        r"
        INSERT INTO categories (site_id, external_id, name)
        VALUES (?, ?, ?)
        ",
    )
    .bind(category.site_id)
    .bind(&category.external_id)
    .bind(&category.name)
    .execute(pool)
    .await
    .context("Failed to insert category")?;

    Ok(result.last_insert_rowid())
}

/// Insert a category or refresh the name of an existing one.
///
/// Pacing state of an existing category is left untouched.
pub async fn upsert_category(pool: &SqlitePool, category: &NewCategory) -> Result<i64> {
    let row: (i64,) = sqlx::query_as(
        r"
        INSERT INTO categories (site_id, external_id, name)
        VALUES (?, ?, ?)
        ON CONFLICT (site_id, external_id) DO UPDATE SET name = excluded.name
        RETURNING id
        ",
    )
    .bind(category.site_id)
    .bind(&category.external_id)
    .bind(&category.name)
    .fetch_one(pool)
    .await
    .context("Failed to upsert category")?;

    Ok(row.0)
}

/// Get a category by ID.
pub async fn get_category(pool: &SqlitePool, id: i64) -> Result<Option<Category>> {
    sqlx::query_as("SELECT * FROM categories WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch category")
}

/// List the categories owned by a site.
pub async fn list_categories_for_site(pool: &SqlitePool, site_id: i64) -> Result<Vec<Category>> {
    sqlx::query_as("SELECT * FROM categories WHERE site_id = ? ORDER BY id")
        .bind(site_id)
        .fetch_all(pool)
        .await
        .context("Failed to list categories for site")
}

/// The category that has waited longest for an article among sites with
/// outstanding demand.
///
/// Ties are broken by storage order.
pub async fn first_published_category(pool: &SqlitePool) -> Result<Option<Category>> {
    sqlx::query_as(
        r"
        SELECT c.*
        FROM categories c
        JOIN sites s ON s.id = c.site_id
        WHERE s.lack_count != 0
        ORDER BY c.last_published_at ASC, c.id ASC
        LIMIT 1
        ",
    )
    .fetch_optional(pool)
    .await
    .context("Failed to fetch first published category")
}

/// The most recently published category across all sites.
pub async fn last_published_category(pool: &SqlitePool) -> Result<Option<Category>> {
    sqlx::query_as(
        r"
        SELECT * FROM categories
        ORDER BY last_published_at DESC, id ASC
        LIMIT 1
        ",
    )
    .fetch_optional(pool)
    .await
    .context("Failed to fetch last published category")
}

/// Record a publish to a category.
///
/// Advances the category's `last_published_at` to now (never backwards) and
/// consumes one demand credit of its site, in one transaction.
pub async fn mark_published(pool: &SqlitePool, category_id: i64) -> Result<()> {
    let now = Utc::now().timestamp_millis();
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let site: Option<(i64,)> = sqlx::query_as(
        r"
        UPDATE categories
        SET last_published_at = MAX(last_published_at, ?)
        WHERE id = ?
        RETURNING site_id
        ",
    )
    .bind(now)
    .bind(category_id)
    .fetch_optional(&mut *tx)
    .await
    .context("Failed to update category publish time")?;

    let Some((site_id,)) = site else {
        anyhow::bail!("Category {category_id} not found");
    };

    sqlx::query("UPDATE sites SET lack_count = MAX(lack_count - 1, 0) WHERE id = ?")
        .bind(site_id)
        .execute(&mut *tx)
        .await
        .context("Failed to decrement lack count")?;

    tx.commit().await.context("Failed to commit publish mark")?;
    Ok(())
}

// ========== Article backlog ==========

/// Append an article to the backlog, returning its ID.
pub async fn add_article_to_cache(pool: &SqlitePool, title: &str, content: &str) -> Result<i64> {
    let result = sqlx::query(
        r"
        INSERT INTO article_cache (title, content, status, created_at)
        VALUES (?, ?, ?, ?)
        ",
    )
    .bind(title)
    .bind(content)
    .bind(CacheStatus::Default.as_str())
    .bind(Utc::now().timestamp_millis())
    .execute(pool)
    .await
    .context("Failed to add article to cache")?;

    Ok(result.last_insert_rowid())
}

/// Oldest backlog entries not already reserved by a running cycle.
pub async fn list_article_cache_by_limit(
    pool: &SqlitePool,
    limit: i64,
) -> Result<Vec<CachedArticle>> {
    sqlx::query_as(
        r"
        SELECT * FROM article_cache
        WHERE status != ?
        ORDER BY created_at ASC, id ASC
        LIMIT ?
        ",
    )
    .bind(CacheStatus::Reserved.as_str())
    .bind(limit.max(0))
    .fetch_all(pool)
    .await
    .context("Failed to list article cache")
}

/// Get a backlog entry by ID.
pub async fn get_article_cache(pool: &SqlitePool, id: i64) -> Result<Option<CachedArticle>> {
    sqlx::query_as("SELECT * FROM article_cache WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch article cache entry")
}

/// Number of entries in the backlog.
pub async fn count_article_cache(pool: &SqlitePool) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM article_cache")
        .fetch_one(pool)
        .await
        .context("Failed to count article cache")?;

    Ok(row.0)
}

/// Remove a published article from the backlog.
///
/// Returns `false` if the entry was already gone.
pub async fn delete_article_cache(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM article_cache WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to delete article cache entry")?;

    Ok(result.rows_affected() > 0)
}

/// Change the status tag of a backlog entry.
pub async fn set_article_cache_status(
    pool: &SqlitePool,
    id: i64,
    status: CacheStatus,
) -> Result<()> {
    sqlx::query("UPDATE article_cache SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to set article cache status")?;

    Ok(())
}

/// Release entries left reserved by an interrupted cycle.
pub async fn reset_reserved_article_cache(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("UPDATE article_cache SET status = ? WHERE status = ?")
        .bind(CacheStatus::Default.as_str())
        .bind(CacheStatus::Reserved.as_str())
        .execute(pool)
        .await
        .context("Failed to reset reserved article cache entries")?;

    Ok(result.rows_affected())
}

// ========== Comment users ==========

/// Register a comment persona, returning its ID.
pub async fn insert_comment_user(pool: &SqlitePool, user: &NewCommentUser) -> Result<i64> {
    let result = sqlx::query(
        r"
        INSERT INTO comment_users (name, alias, password)
        VALUES (?, ?, ?)
        ",
    )
    .bind(&user.name)
    .bind(&user.alias)
    .bind(&user.password)
    .execute(pool)
    .await
    .context("Failed to insert comment user")?;

    Ok(result.last_insert_rowid())
}

/// Pick a random comment persona.
pub async fn get_random_comment_user(pool: &SqlitePool) -> Result<Option<CommentUser>> {
    sqlx::query_as("SELECT * FROM comment_users ORDER BY RANDOM() LIMIT 1")
        .fetch_optional(pool)
        .await
        .context("Failed to fetch random comment user")
}

/// Number of registered comment personas.
pub async fn count_comment_users(pool: &SqlitePool) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM comment_users")
        .fetch_one(pool)
        .await
        .context("Failed to count comment users")?;

    Ok(row.0)
}
