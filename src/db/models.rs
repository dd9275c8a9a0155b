use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Convert a stored unix-millisecond timestamp to a `DateTime`.
#[must_use]
pub fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// A CMS site articles are distributed to.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Site {
    pub id: i64,
    pub base_url: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    /// Number of articles this site is currently due to receive.
    pub lack_count: i64,
    pub created_at: String,
}

/// Data for registering a new site.
#[derive(Debug, Clone)]
pub struct NewSite {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub lack_count: i64,
}

/// A category on a site; the unit a publish is routed to.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Category {
    pub id: i64,
    pub site_id: i64,
    /// Category id as the CMS knows it.
    pub external_id: String,
    pub name: String,
    /// Unix milliseconds, 0 if never published.
    pub last_published_at: i64,
}

impl Category {
    #[must_use]
    pub fn last_published(&self) -> DateTime<Utc> {
        millis_to_datetime(self.last_published_at)
    }
}

/// Data for registering a new category.
#[derive(Debug, Clone)]
pub struct NewCategory {
    pub site_id: i64,
    pub external_id: String,
    pub name: String,
}

/// Backlog entry status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    Default,
    /// Picked up by a running drain cycle.
    Reserved,
    InBuffer,
}

impl CacheStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Reserved => "reserved",
            Self::InBuffer => "in_buffer",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "default" => Some(Self::Default),
            "reserved" => Some(Self::Reserved),
            "in_buffer" => Some(Self::InBuffer),
            _ => None,
        }
    }
}

/// An article waiting in the backlog.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CachedArticle {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub status: String,
    /// Unix milliseconds.
    pub created_at: i64,
}

impl CachedArticle {
    #[must_use]
    pub fn status_enum(&self) -> Option<CacheStatus> {
        CacheStatus::from_str(&self.status)
    }
}

/// A synthetic identity used to author comments.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CommentUser {
    pub id: i64,
    pub name: String,
    pub alias: String,
    #[serde(skip_serializing)]
    pub password: String,
}

/// Data for registering a new comment persona.
#[derive(Debug, Clone)]
pub struct NewCommentUser {
    pub name: String,
    pub alias: String,
    pub password: String,
}
