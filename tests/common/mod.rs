//! In-memory CMS fleet and text engine shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use article_distributor::ai::{GeneratedComment, Rewritten, TextEngine};
use article_distributor::cms::{
    Article, ArticleQuery, CmsClient, CmsConnector, CmsError, Credentials, NewComment,
    RemoteArticle, RemoteCategory,
};
use article_distributor::db::{self, Database, NewCategory, NewCommentUser, NewSite};
use async_trait::async_trait;
use tempfile::TempDir;

pub async fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.sqlite");
    let db = Database::new(&db_path)
        .await
        .expect("Failed to create database");
    (db, temp_dir)
}

/// Register a site with one category, returning `(site_id, category_id)`.
pub async fn add_site(db: &Database, base_url: &str, lack_count: i64) -> (i64, i64) {
    let site_id = db::insert_site(
        db.pool(),
        &NewSite {
            base_url: base_url.to_string(),
            username: "admin".to_string(),
            password: "secret".to_string(),
            lack_count,
        },
    )
    .await
    .expect("Failed to insert site");

    let category_id = db::insert_category(
        db.pool(),
        &NewCategory {
            site_id,
            external_id: format!("cat-{site_id}"),
            name: "news".to_string(),
        },
    )
    .await
    .expect("Failed to insert category");

    (site_id, category_id)
}

pub async fn add_persona(db: &Database, name: &str) -> i64 {
    db::insert_comment_user(
        db.pool(),
        &NewCommentUser {
            name: name.to_string(),
            alias: format!("{name} alias"),
            password: "pw".to_string(),
        },
    )
    .await
    .expect("Failed to insert comment user")
}

pub async fn set_last_published(db: &Database, category_id: i64, millis: i64) {
    sqlx::query("UPDATE categories SET last_published_at = ? WHERE id = ?")
        .bind(millis)
        .bind(category_id)
        .execute(db.pool())
        .await
        .expect("Failed to set last_published_at");
}

pub async fn lack_count(db: &Database, site_id: i64) -> i64 {
    db::get_site(db.pool(), site_id)
        .await
        .unwrap()
        .expect("site exists")
        .lack_count
}

pub async fn last_published(db: &Database, category_id: i64) -> i64 {
    db::get_category(db.pool(), category_id)
        .await
        .unwrap()
        .expect("category exists")
        .last_published_at
}

/// Shared state of the fake fleet, keyed by site endpoint.
#[derive(Default)]
pub struct FakeFleet {
    pub logins: AtomicUsize,
    /// Endpoints whose article posts fail.
    pub failing_posts: Mutex<HashSet<String>>,
    /// Endpoints that reject every login.
    pub rejecting_logins: Mutex<HashSet<String>>,
    /// Endpoints whose article listing fails.
    pub failing_listings: Mutex<HashSet<String>>,
    pub categories: Mutex<HashMap<String, Vec<RemoteCategory>>>,
    pub articles: Mutex<HashMap<String, Vec<RemoteArticle>>>,
    /// `(endpoint, article)` in post order.
    pub posted: Mutex<Vec<(String, Article)>>,
    /// `(endpoint, username, comment)` in post order.
    pub comments: Mutex<Vec<(String, String, NewComment)>>,
}

impl FakeFleet {
    pub fn fail_posts(&self, endpoint: &str) {
        self.failing_posts
            .lock()
            .unwrap()
            .insert(endpoint.to_string());
    }

    pub fn reject_logins(&self, endpoint: &str) {
        self.rejecting_logins
            .lock()
            .unwrap()
            .insert(endpoint.to_string());
    }

    pub fn fail_listings(&self, endpoint: &str) {
        self.failing_listings
            .lock()
            .unwrap()
            .insert(endpoint.to_string());
    }

    pub fn add_article(&self, endpoint: &str, article: RemoteArticle) {
        self.articles
            .lock()
            .unwrap()
            .entry(endpoint.to_string())
            .or_default()
            .push(article);
    }

    pub fn posted(&self) -> Vec<(String, Article)> {
        self.posted.lock().unwrap().clone()
    }

    pub fn comments(&self) -> Vec<(String, String, NewComment)> {
        self.comments.lock().unwrap().clone()
    }
}

pub struct FakeConnector(pub Arc<FakeFleet>);

struct FakeClient {
    fleet: Arc<FakeFleet>,
    endpoint: String,
    username: Option<String>,
}

#[async_trait]
impl CmsConnector for FakeConnector {
    async fn connect(
        &self,
        endpoint: &str,
        credentials: &Credentials,
    ) -> Result<Arc<dyn CmsClient>, CmsError> {
        self.0.logins.fetch_add(1, Ordering::SeqCst);
        if self.0.rejecting_logins.lock().unwrap().contains(endpoint) {
            return Err(CmsError::Unauthenticated("bad credentials".to_string()));
        }
        Ok(Arc::new(FakeClient {
            fleet: Arc::clone(&self.0),
            endpoint: endpoint.to_string(),
            username: Some(credentials.username.clone()),
        }))
    }

    fn anonymous(&self, endpoint: &str) -> Result<Arc<dyn CmsClient>, CmsError> {
        Ok(Arc::new(FakeClient {
            fleet: Arc::clone(&self.0),
            endpoint: endpoint.to_string(),
            username: None,
        }))
    }
}

#[async_trait]
impl CmsClient for FakeClient {
    async fn list_categories(&self) -> Result<Vec<RemoteCategory>, CmsError> {
        Ok(self
            .fleet
            .categories
            .lock()
            .unwrap()
            .get(&self.endpoint)
            .cloned()
            .unwrap_or_default())
    }

    async fn post_article(&self, article: &Article) -> Result<(), CmsError> {
        if self.fleet.failing_posts.lock().unwrap().contains(&self.endpoint) {
            return Err(CmsError::Status {
                status: 502,
                body: "bad gateway".to_string(),
            });
        }
        self.fleet
            .posted
            .lock()
            .unwrap()
            .push((self.endpoint.clone(), article.clone()));
        Ok(())
    }

    async fn list_articles(&self, _query: &ArticleQuery) -> Result<Vec<RemoteArticle>, CmsError> {
        if self
            .fleet
            .failing_listings
            .lock()
            .unwrap()
            .contains(&self.endpoint)
        {
            return Err(CmsError::Status {
                status: 503,
                body: "down".to_string(),
            });
        }
        let mut articles = self
            .fleet
            .articles
            .lock()
            .unwrap()
            .get(&self.endpoint)
            .cloned()
            .unwrap_or_default();
        articles.sort_by(|a, b| b.posted_at.cmp(&a.posted_at));
        Ok(articles)
    }

    async fn get_article(&self, id: &str) -> Result<RemoteArticle, CmsError> {
        self.fleet
            .articles
            .lock()
            .unwrap()
            .get(&self.endpoint)
            .and_then(|articles| articles.iter().find(|a| a.id == id).cloned())
            .ok_or_else(|| CmsError::Status {
                status: 404,
                body: format!("no article {id}"),
            })
    }

    async fn post_comment(&self, comment: &NewComment) -> Result<(), CmsError> {
        let Some(username) = &self.username else {
            return Err(CmsError::Unauthenticated("anonymous".to_string()));
        };
        self.fleet.comments.lock().unwrap().push((
            self.endpoint.clone(),
            username.clone(),
            comment.clone(),
        ));
        Ok(())
    }
}

/// Text engine returning canned output, optionally failing.
#[derive(Default)]
pub struct FakeEngine {
    pub fail: bool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl TextEngine for FakeEngine {
    async fn rewrite(&self, text: &str) -> anyhow::Result<Rewritten> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("engine down");
        }
        Ok(Rewritten {
            title: format!("Rewritten: {}", text.chars().take(10).collect::<String>()),
            content: text.to_uppercase(),
        })
    }

    async fn comment(&self, article_text: &str) -> anyhow::Result<GeneratedComment> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("engine down");
        }
        Ok(GeneratedComment {
            comment: format!("Nice read about {}", article_text.len()),
            score: 0.8,
        })
    }
}
