//! CMS client abstraction.
//!
//! Every target site exposes the same small capability set: list categories,
//! post articles, list and fetch articles, post comments. The schedulers only
//! talk to sites through [`CmsClient`]; [`CmsConnector`] builds clients, either
//! authenticated (one login round trip) or anonymous.

pub mod rest;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use rest::{RestClient, RestConnector};

#[derive(Debug, Error)]
pub enum CmsError {
    /// The site rejected our session or credentials.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid response: {0}")]
    Decode(String),
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl CmsError {
    /// Whether this error should trigger a re-login.
    #[must_use]
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, Self::Unauthenticated(_))
    }
}

/// Login credentials for a site account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// A category as listed by the CMS.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteCategory {
    pub external_id: String,
    pub name: String,
}

/// An article ready to be posted.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Article {
    pub title: String,
    pub content: String,
    pub intro: String,
    /// Set by the publisher once a destination is chosen.
    pub external_category_id: Option<String>,
}

impl Article {
    /// Build an article whose intro is the first `intro_length` characters of
    /// the content.
    #[must_use]
    pub fn new(title: impl Into<String>, content: impl Into<String>, intro_length: usize) -> Self {
        let content = content.into();
        let intro = content.chars().take(intro_length).collect();
        Self {
            title: title.into(),
            content,
            intro,
            external_category_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    PostedAt,
    CommentCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Filter and ordering for listing articles.
#[derive(Debug, Clone)]
pub struct ArticleQuery {
    pub category: Option<String>,
    pub sort_by: SortBy,
    pub order: SortOrder,
}

impl ArticleQuery {
    /// Newest articles first, all categories.
    #[must_use]
    pub fn newest_first() -> Self {
        Self {
            category: None,
            sort_by: SortBy::PostedAt,
            order: SortOrder::Desc,
        }
    }
}

/// An article as stored on the CMS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteArticle {
    pub id: String,
    pub external_category_id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub posted_at: DateTime<Utc>,
    #[serde(default)]
    pub comment_count: i64,
}

/// A comment to post under an article.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewComment {
    pub article_id: String,
    pub content: String,
}

/// Operations a CMS site supports.
#[async_trait]
pub trait CmsClient: Send + Sync {
    async fn list_categories(&self) -> Result<Vec<RemoteCategory>, CmsError>;

    async fn post_article(&self, article: &Article) -> Result<(), CmsError>;

    async fn list_articles(&self, query: &ArticleQuery) -> Result<Vec<RemoteArticle>, CmsError>;

    async fn get_article(&self, id: &str) -> Result<RemoteArticle, CmsError>;

    async fn post_comment(&self, comment: &NewComment) -> Result<(), CmsError>;
}

/// Builds CMS clients for a site endpoint.
#[async_trait]
pub trait CmsConnector: Send + Sync {
    /// Log in to `endpoint`, returning a client bound to the new session.
    ///
    /// This performs one network round trip; bad credentials surface here.
    async fn connect(
        &self,
        endpoint: &str,
        credentials: &Credentials,
    ) -> Result<Arc<dyn CmsClient>, CmsError>;

    /// A client without a session, for public reads.
    fn anonymous(&self, endpoint: &str) -> Result<Arc<dyn CmsClient>, CmsError>;
}
