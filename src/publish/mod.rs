//! Publish scheduler.
//!
//! Articles go to the category that has waited longest among sites with
//! outstanding demand credit (`lack_count`). Articles that find no demand wait
//! in the backlog until a drain cycle (see [`cycle`]) injects some.

pub mod cycle;
pub mod sampling;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use thiserror::Error;
use tracing::{debug, info};

use crate::ai::{retry_fixed, TextEngine};
use crate::cms::{Article, CmsError, Credentials};
use crate::db::{self, Database, NewCategory, Site};
use crate::pool::{ClientPool, Identity};

pub use cycle::CycleReport;
pub use sampling::{demand_draw, random_num, random_time};

#[derive(Debug, Error)]
pub enum PublishError {
    /// No site is due an article; queue it instead.
    #[error("no site has outstanding demand")]
    NoDemand,
    /// The chosen destination rejected the article.
    #[error("publishing to site {site_id} category {category_id} failed: {source}")]
    Failure {
        site_id: i64,
        category_id: i64,
        #[source]
        source: CmsError,
    },
    /// The article is live on the CMS but the publish could not be recorded.
    /// It must not be posted again.
    #[error(
        "published to site {} category {} but failed to record it: {source:#}",
        .destination.site_id,
        .destination.category_id
    )]
    Unrecorded {
        destination: Destination,
        #[source]
        source: anyhow::Error,
    },
    #[error("text engine failed: {0:#}")]
    Engine(#[source] anyhow::Error),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Where an article was published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub site_id: i64,
    pub category_id: i64,
    pub external_category_id: String,
}

/// Outcome of a manual submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Published(Destination),
    /// Stored in the backlog under this ID.
    Queued(i64),
}

type DemandDraw = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Distributes articles over the site fleet.
#[derive(Clone)]
pub struct Publisher {
    db: Database,
    pool: Arc<ClientPool>,
    intro_length: usize,
    demand_draw: DemandDraw,
}

impl Publisher {
    #[must_use]
    pub fn new(db: Database, pool: Arc<ClientPool>, intro_length: usize) -> Self {
        Self {
            db,
            pool,
            intro_length,
            demand_draw: Arc::new(demand_draw),
        }
    }

    /// Replace the demand draw used by drain cycles.
    #[must_use]
    pub fn with_demand_draw(mut self, draw: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.demand_draw = Arc::new(draw);
        self
    }

    /// Publish `article` to the longest-waiting category of a site with demand.
    ///
    /// Pacing state changes only when the post succeeds.
    pub async fn average_publish(&self, article: &mut Article) -> Result<Destination, PublishError> {
        let pool = self.db.pool();

        let Some(category) = db::first_published_category(pool).await? else {
            return Err(PublishError::NoDemand);
        };
        let site = db::get_site(pool, category.site_id)
            .await?
            .ok_or_else(|| anyhow!("Site {} not found", category.site_id))?;

        let (site_id, category_id) = (site.id, category.id);
        let failure = move |source: CmsError| PublishError::Failure {
            site_id,
            category_id,
            source,
        };

        article.external_category_id = Some(category.external_id.clone());

        let client = self
            .pool
            .get_or_create(Identity::Site(site.id), &site.base_url, &site_credentials(&site))
            .await
            .map_err(failure)?;

        let article: &Article = article;
        client
            .request(|c| async move { c.post_article(article).await })
            .await
            .map_err(failure)?;

        let destination = Destination {
            site_id,
            category_id,
            external_category_id: category.external_id,
        };

        if let Err(source) = db::mark_published(pool, category_id).await {
            return Err(PublishError::Unrecorded {
                destination,
                source,
            });
        }

        info!(
            site_id,
            category_id,
            title = %article.title,
            "Published article"
        );

        Ok(destination)
    }

    /// Put an article in the backlog.
    pub async fn pre_publish(&self, article: &Article) -> Result<i64, PublishError> {
        let id = db::add_article_to_cache(self.db.pool(), &article.title, &article.content).await?;
        debug!(cache_id = id, title = %article.title, "Article queued in backlog");
        Ok(id)
    }

    /// Publish now if any site has demand, otherwise queue.
    pub async fn submit(&self, mut article: Article) -> Result<Submission, PublishError> {
        match self.average_publish(&mut article).await {
            Ok(destination) => Ok(Submission::Published(destination)),
            Err(PublishError::NoDemand) => {
                let id = self.pre_publish(&article).await?;
                info!(cache_id = id, "No demand, article queued");
                Ok(Submission::Queued(id))
            }
            Err(e) => Err(e),
        }
    }

    /// Rewrite raw text with the text engine, then submit it.
    pub async fn submit_generated(
        &self,
        engine: &dyn TextEngine,
        raw_text: &str,
        attempts: u32,
        delay: Duration,
    ) -> Result<Submission, PublishError> {
        let rewritten = retry_fixed(attempts, delay, move || engine.rewrite(raw_text))
            .await
            .context("Failed to rewrite article")
            .map_err(PublishError::Engine)?;
        let article = Article::new(rewritten.title, rewritten.content, self.intro_length);
        self.submit(article).await
    }

    /// Refresh a site's categories from the CMS.
    ///
    /// New categories start as never published. Returns how many categories
    /// the site reported.
    pub async fn sync_categories(&self, site_id: i64) -> anyhow::Result<usize> {
        let pool = self.db.pool();
        let site = db::get_site(pool, site_id)
            .await?
            .ok_or_else(|| anyhow!("Site {site_id} not found"))?;

        let client = self
            .pool
            .get_or_create(Identity::Site(site.id), &site.base_url, &site_credentials(&site))
            .await
            .with_context(|| format!("Failed to log in to site {site_id}"))?;
        let categories = client
            .request(|c| async move { c.list_categories().await })
            .await
            .with_context(|| format!("Failed to list categories of site {site_id}"))?;

        for category in &categories {
            db::upsert_category(
                pool,
                &NewCategory {
                    site_id,
                    external_id: category.external_id.clone(),
                    name: category.name.clone(),
                },
            )
            .await?;
        }

        info!(site_id, count = categories.len(), "Synced site categories");
        Ok(categories.len())
    }

    /// Release backlog entries reserved by a cycle that never finished.
    pub async fn recover_on_startup(&self) -> anyhow::Result<u64> {
        let released = db::reset_reserved_article_cache(self.db.pool()).await?;
        if released > 0 {
            info!(count = released, "Released reserved backlog entries");
        }
        Ok(released)
    }
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("intro_length", &self.intro_length)
            .finish_non_exhaustive()
    }
}

pub(crate) fn site_credentials(site: &Site) -> Credentials {
    Credentials::new(&site.username, &site.password)
}
