//! Comment scheduler.
//!
//! Every pass walks each site's articles newest first and decides per article
//! whether to comment. The chance drops with article age and with the number
//! of comments already there, so fresh articles attract a first comment and
//! old busy ones are left alone.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ai::{retry_fixed, GeneratedComment, TextEngine};
use crate::cms::{ArticleQuery, Credentials, NewComment, RemoteArticle};
use crate::constants::{COMMENT_MAX_INTERVAL_MINUTES, COMMENT_MIN_INTERVAL_MINUTES};
use crate::db::{self, Database, Site};
use crate::pool::{ClientPool, Identity};
use crate::scheduling::sleep_or_cancel;

/// Pause before the next comment pass, uniform in [30, 60) minutes.
#[must_use]
pub fn random_pause() -> Duration {
    let minutes =
        rand::thread_rng().gen_range(COMMENT_MIN_INTERVAL_MINUTES..COMMENT_MAX_INTERVAL_MINUTES);
    Duration::from_secs(minutes * 60)
}

/// Uniform integer in [0, 100) compared against [`comment_gap`].
#[must_use]
pub fn comment_draw() -> u32 {
    rand::thread_rng().gen_range(0..100)
}

/// `floor(hours since posted + 1) * existing comments`.
#[must_use]
pub fn comment_gap(posted_at: DateTime<Utc>, now: DateTime<Utc>, comment_count: i64) -> i64 {
    let hours = (now - posted_at).num_seconds().max(0) as f64 / 3600.0;
    ((hours + 1.0).floor() as i64).saturating_mul(comment_count.max(0))
}

/// An article is commented on when the draw beats its gap.
#[must_use]
pub fn should_comment(gap: i64, draw: u32) -> bool {
    i64::from(draw) > gap
}

/// What one comment pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub sites: usize,
    pub scanned: usize,
    pub selected: usize,
    pub posted: usize,
    pub failed: usize,
}

type CommentDraw = Arc<dyn Fn() -> u32 + Send + Sync>;

/// Posts generated comments as random personas.
#[derive(Clone)]
pub struct CommentScheduler {
    db: Database,
    pool: Arc<ClientPool>,
    engine: Arc<dyn TextEngine>,
    retry_attempts: u32,
    retry_delay: Duration,
    draw: CommentDraw,
}

impl CommentScheduler {
    #[must_use]
    pub fn new(
        db: Database,
        pool: Arc<ClientPool>,
        engine: Arc<dyn TextEngine>,
        retry_attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            db,
            pool,
            engine,
            retry_attempts,
            retry_delay,
            draw: Arc::new(comment_draw),
        }
    }

    /// Replace the per-article draw.
    #[must_use]
    pub fn with_draw(mut self, draw: impl Fn() -> u32 + Send + Sync + 'static) -> Self {
        self.draw = Arc::new(draw);
        self
    }

    /// Run comment passes until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Comment scheduler started");

        loop {
            let pause = random_pause();
            debug!(minutes = pause.as_secs() / 60, "Next comment pass scheduled");

            if !sleep_or_cancel(pause, &shutdown).await {
                info!("Comment scheduler shutting down");
                break;
            }

            match self.run_pass(Utc::now()).await {
                Ok(report) => info!(
                    sites = report.sites,
                    scanned = report.scanned,
                    posted = report.posted,
                    failed = report.failed,
                    "Comment pass finished"
                ),
                Err(e) => error!("Comment pass aborted: {e:#}"),
            }
        }
    }

    /// Scan every site once and comment on the selected articles.
    ///
    /// Failures on one article or site are logged and the pass moves on.
    pub async fn run_pass(&self, now: DateTime<Utc>) -> Result<PassReport> {
        let pool = self.db.pool();
        let mut report = PassReport::default();

        if db::count_comment_users(pool).await? == 0 {
            warn!("No comment users configured, skipping comment pass");
            return Ok(report);
        }

        for site in db::list_sites(pool).await? {
            report.sites += 1;
            let articles = match self.list_site_articles(&site).await {
                Ok(articles) => articles,
                Err(e) => {
                    warn!(site_id = site.id, "Failed to list articles: {e:#}");
                    continue;
                }
            };

            for article in articles {
                report.scanned += 1;
                let gap = comment_gap(article.posted_at, now, article.comment_count);
                if !should_comment(gap, (self.draw)()) {
                    continue;
                }
                report.selected += 1;

                match self.comment_on(&site, &article.id).await {
                    Ok(generated) => {
                        report.posted += 1;
                        info!(
                            site_id = site.id,
                            article_id = %article.id,
                            score = generated.score,
                            "Posted comment"
                        );
                    }
                    Err(e) => {
                        report.failed += 1;
                        warn!(
                            site_id = site.id,
                            article_id = %article.id,
                            "Failed to comment: {e:#}"
                        );
                    }
                }
            }
        }

        Ok(report)
    }

    async fn list_site_articles(&self, site: &Site) -> Result<Vec<RemoteArticle>> {
        let client = self.pool.connector().anonymous(&site.base_url)?;
        let articles = client.list_articles(&ArticleQuery::newest_first()).await?;
        Ok(articles)
    }

    async fn comment_on(&self, site: &Site, article_id: &str) -> Result<GeneratedComment> {
        let persona = db::get_random_comment_user(self.db.pool())
            .await?
            .ok_or_else(|| anyhow!("No comment users configured"))?;

        let identity = Identity::Persona {
            site_id: site.id,
            user_id: persona.id,
        };
        let client = self
            .pool
            .get_or_create(
                identity,
                &site.base_url,
                &Credentials::new(&persona.name, &persona.password),
            )
            .await
            .with_context(|| format!("Failed to log in as {}", persona.alias))?;

        let fresh = client
            .request(|c| async move { c.get_article(article_id).await })
            .await
            .context("Failed to fetch article")?;

        let engine = &self.engine;
        let content = fresh.content.as_str();
        let generated = retry_fixed(self.retry_attempts, self.retry_delay, move || {
            engine.comment(content)
        })
        .await
        .context("Failed to generate comment")?;

        let comment = NewComment {
            article_id: fresh.id.clone(),
            content: generated.comment.clone(),
        };
        let comment = &comment;
        client
            .request(|c| async move { c.post_comment(comment).await })
            .await
            .context("Failed to post comment")?;

        debug!(persona = %persona.alias, article_id = %fresh.id, "Comment delivered");
        Ok(generated)
    }
}

impl fmt::Debug for CommentScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommentScheduler")
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: u32 = 10_000;

    fn selection_rate(gap: i64) -> f64 {
        let hits = (0..SAMPLES)
            .filter(|_| should_comment(gap, comment_draw()))
            .count();
        hits as f64 / f64::from(SAMPLES)
    }

    #[test]
    fn test_gap_for_fresh_article_is_zero() {
        let now = Utc::now();
        assert_eq!(comment_gap(now, now, 0), 0);
        assert_eq!(comment_gap(now, now, 3), 3);
    }

    #[test]
    fn test_gap_for_old_busy_article() {
        let now = Utc::now();
        let posted = now - chrono::Duration::hours(48);
        assert_eq!(comment_gap(posted, now, 10), 490);
    }

    #[test]
    fn test_gap_floors_partial_hours() {
        let now = Utc::now();
        let posted = now - chrono::Duration::minutes(90);
        assert_eq!(comment_gap(posted, now, 2), 4);
    }

    #[test]
    fn test_gap_saturates_on_absurd_remote_values() {
        let now = Utc::now();
        let ancient = now - chrono::Duration::days(365 * 100_000);
        assert_eq!(comment_gap(now, now, i64::MAX), i64::MAX);
        assert_eq!(comment_gap(ancient, now, i64::MAX), i64::MAX);
        assert!(comment_gap(ancient, now, 1) > 0);
        assert!(!should_comment(comment_gap(ancient, now, i64::MAX), 99));
    }

    #[test]
    fn test_future_post_time_counts_as_fresh() {
        let now = Utc::now();
        let posted = now + chrono::Duration::hours(5);
        assert_eq!(comment_gap(posted, now, 1), 1);
    }

    #[test]
    fn test_fresh_uncommented_article_is_almost_always_selected() {
        let rate = selection_rate(0);
        assert!(rate > 0.97 && rate < 1.0, "rate was {rate}");
        assert!(!should_comment(0, 0));
        assert!(should_comment(0, 1));
    }

    #[test]
    fn test_old_busy_article_is_never_selected() {
        assert!(selection_rate(490).abs() < f64::EPSILON);
        assert!(!should_comment(490, 99));
    }

    #[test]
    fn test_random_pause_bounds() {
        for _ in 0..1_000 {
            let minutes = random_pause().as_secs() / 60;
            assert!((COMMENT_MIN_INTERVAL_MINUTES..COMMENT_MAX_INTERVAL_MINUTES).contains(&minutes));
        }
    }
}
