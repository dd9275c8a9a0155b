//! Drain cycles and the background publish loop.

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{random_time, PublishError, Publisher};
use crate::cms::Article;
use crate::constants::PUBLISH_MAX_INTERVAL_MINUTES;
use crate::db::{self, CacheStatus};
use crate::scheduling::sleep_or_cancel;

/// What one drain cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Credits added to sites that had none.
    pub credits_injected: i64,
    /// Total outstanding demand after injection.
    pub demand: i64,
    /// Backlog IDs published and removed.
    pub published: Vec<i64>,
    /// `(site_id, category_id)` of destinations that rejected an article.
    pub failed_destinations: Vec<(i64, i64)>,
    /// Demand ran out before the fetched backlog did.
    pub stopped_early: bool,
}

impl Publisher {
    /// Run one drain cycle: inject demand, then publish that many backlog
    /// entries oldest first.
    ///
    /// A destination that rejects its article still has its slot consumed and
    /// the article stays queued. Store errors abort the cycle; an article that
    /// was posted before the store failed is removed from the backlog first.
    pub async fn run_cycle(&self) -> Result<CycleReport, PublishError> {
        let pool = self.db.pool();
        let mut report = CycleReport::default();

        for site in db::list_sites(pool).await? {
            if site.lack_count != 0 {
                continue;
            }
            let credits = (self.demand_draw)();
            if credits > 0 {
                db::increase_lack_count(pool, site.id, credits).await?;
                report.credits_injected += credits;
                debug!(site_id = site.id, credits, "Injected demand");
            }
        }

        report.demand = db::sum_lack_count(pool).await?;
        if report.demand == 0 {
            debug!("No demand this cycle");
            return Ok(report);
        }

        let backlog = db::list_article_cache_by_limit(pool, report.demand).await?;
        debug!(demand = report.demand, fetched = backlog.len(), "Draining backlog");

        for entry in backlog {
            db::set_article_cache_status(pool, entry.id, CacheStatus::Reserved).await?;
            let mut article = Article::new(&entry.title, &entry.content, self.intro_length);

            match self.average_publish(&mut article).await {
                Ok(_) => {
                    db::delete_article_cache(pool, entry.id).await?;
                    report.published.push(entry.id);
                }
                Err(PublishError::Failure {
                    site_id,
                    category_id,
                    source,
                }) => {
                    warn!(
                        cache_id = entry.id,
                        site_id,
                        category_id,
                        error = %source,
                        "Destination rejected article, skipping its slot"
                    );
                    db::set_article_cache_status(pool, entry.id, CacheStatus::Default).await?;
                    db::mark_published(pool, category_id).await?;
                    report.failed_destinations.push((site_id, category_id));
                }
                Err(PublishError::NoDemand) => {
                    db::set_article_cache_status(pool, entry.id, CacheStatus::Default).await?;
                    info!(cache_id = entry.id, "Demand exhausted mid-cycle");
                    report.stopped_early = true;
                    break;
                }
                Err(e @ PublishError::Unrecorded { .. }) => {
                    // The article is live; drop it so no later cycle reposts it.
                    // If the delete fails too the entry stays reserved and is not
                    // picked up again before the next startup recovery.
                    db::delete_article_cache(pool, entry.id).await?;
                    error!(cache_id = entry.id, "Article published but not recorded: {e}");
                    return Err(e);
                }
                Err(e) => {
                    if let Err(release) =
                        db::set_article_cache_status(pool, entry.id, CacheStatus::Default).await
                    {
                        error!(cache_id = entry.id, "Failed to release backlog entry: {release:#}");
                    }
                    return Err(e);
                }
            }
        }

        Ok(report)
    }

    /// Whether the newest publish is older than the longest cycle pause.
    pub async fn needs_catch_up(&self, now: DateTime<Utc>) -> anyhow::Result<bool> {
        let Some(category) = db::last_published_category(self.db.pool()).await? else {
            return Ok(false);
        };
        let max_interval = chrono::Duration::minutes(PUBLISH_MAX_INTERVAL_MINUTES as i64);
        Ok(now - category.last_published() > max_interval)
    }

    /// Run the publish loop until `shutdown` is cancelled.
    ///
    /// A stale fleet gets one cycle immediately; after that cycles are
    /// separated by [`random_time`] pauses. A cycle in progress is never
    /// interrupted.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Publish scheduler started");

        match self.needs_catch_up(Utc::now()).await {
            Ok(true) => {
                info!("Last publish is stale, running catch-up cycle");
                self.run_cycle_logged().await;
            }
            Ok(false) => {}
            Err(e) => error!("Failed to check last publish time: {e:#}"),
        }

        loop {
            let pause = random_time();
            info!(minutes = pause.as_secs() / 60, "Next publish cycle scheduled");

            if !sleep_or_cancel(pause, &shutdown).await {
                info!("Publish scheduler shutting down");
                break;
            }

            self.run_cycle_logged().await;
        }
    }

    async fn run_cycle_logged(&self) {
        match self.run_cycle().await {
            Ok(report) => info!(
                published = report.published.len(),
                failed = report.failed_destinations.len(),
                credits_injected = report.credits_injected,
                demand = report.demand,
                "Publish cycle finished"
            ),
            Err(e) => error!("Publish cycle aborted: {e:#}"),
        }
    }
}
