//! Integration tests for the comment scheduler.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use article_distributor::cms::RemoteArticle;
use article_distributor::comment::{CommentScheduler, PassReport};
use article_distributor::db::Database;
use article_distributor::pool::ClientPool;
use chrono::{DateTime, Utc};
use common::{add_persona, add_site, setup_db, FakeConnector, FakeEngine, FakeFleet};
use tokio_util::sync::CancellationToken;

fn remote_article(id: &str, posted_at: DateTime<Utc>, comment_count: i64) -> RemoteArticle {
    RemoteArticle {
        id: id.to_string(),
        external_category_id: "news".to_string(),
        title: format!("Article {id}"),
        content: format!("Content of article {id}"),
        posted_at,
        comment_count,
    }
}

fn scheduler(
    db: &Database,
    fleet: &Arc<FakeFleet>,
    engine: Arc<FakeEngine>,
) -> CommentScheduler {
    let pool = Arc::new(ClientPool::new(Arc::new(FakeConnector(Arc::clone(fleet)))));
    CommentScheduler::new(db.clone(), pool, engine, 2, Duration::from_millis(1))
}

#[tokio::test]
async fn test_pass_comments_on_fresh_articles_and_skips_old_busy_ones() {
    let (db, _temp_dir) = setup_db().await;
    let fleet = Arc::new(FakeFleet::default());
    add_site(&db, "http://a.example", 0).await;
    add_persona(&db, "alice").await;
    let now = Utc::now();
    fleet.add_article("http://a.example", remote_article("fresh", now, 0));
    fleet.add_article(
        "http://a.example",
        remote_article("stale", now - chrono::Duration::hours(48), 10),
    );

    let report = scheduler(&db, &fleet, Arc::new(FakeEngine::default()))
        .with_draw(|| 99)
        .run_pass(now)
        .await
        .unwrap();

    assert_eq!(
        report,
        PassReport {
            sites: 1,
            scanned: 2,
            selected: 1,
            posted: 1,
            failed: 0,
        }
    );
    let comments = fleet.comments();
    assert_eq!(comments.len(), 1);
    let (endpoint, username, comment) = &comments[0];
    assert_eq!(endpoint, "http://a.example");
    assert_eq!(username, "alice");
    assert_eq!(comment.article_id, "fresh");
    assert!(comment.content.starts_with("Nice read"));
}

#[tokio::test]
async fn test_zero_draw_never_comments() {
    let (db, _temp_dir) = setup_db().await;
    let fleet = Arc::new(FakeFleet::default());
    add_site(&db, "http://a.example", 0).await;
    add_persona(&db, "alice").await;
    let now = Utc::now();
    fleet.add_article("http://a.example", remote_article("fresh", now, 0));

    let report = scheduler(&db, &fleet, Arc::new(FakeEngine::default()))
        .with_draw(|| 0)
        .run_pass(now)
        .await
        .unwrap();

    assert_eq!(report.scanned, 1);
    assert_eq!(report.selected, 0);
    assert!(fleet.comments().is_empty());
}

#[tokio::test]
async fn test_failing_site_does_not_abort_pass() {
    let (db, _temp_dir) = setup_db().await;
    let fleet = Arc::new(FakeFleet::default());
    add_site(&db, "http://down.example", 0).await;
    add_site(&db, "http://up.example", 0).await;
    add_persona(&db, "bob").await;
    fleet.fail_listings("http://down.example");
    let now = Utc::now();
    fleet.add_article("http://up.example", remote_article("1", now, 0));

    let report = scheduler(&db, &fleet, Arc::new(FakeEngine::default()))
        .with_draw(|| 50)
        .run_pass(now)
        .await
        .unwrap();

    assert_eq!(report.sites, 2);
    assert_eq!(report.posted, 1);
    let comments = fleet.comments();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].0, "http://up.example");
}

#[tokio::test]
async fn test_pass_without_personas_does_nothing() {
    let (db, _temp_dir) = setup_db().await;
    let fleet = Arc::new(FakeFleet::default());
    add_site(&db, "http://a.example", 0).await;
    fleet.add_article("http://a.example", remote_article("1", Utc::now(), 0));

    let report = scheduler(&db, &fleet, Arc::new(FakeEngine::default()))
        .with_draw(|| 99)
        .run_pass(Utc::now())
        .await
        .unwrap();

    assert_eq!(report, PassReport::default());
    assert!(fleet.comments().is_empty());
}

#[tokio::test]
async fn test_engine_failure_is_counted_and_retried() {
    let (db, _temp_dir) = setup_db().await;
    let fleet = Arc::new(FakeFleet::default());
    add_site(&db, "http://a.example", 0).await;
    add_persona(&db, "carol").await;
    let now = Utc::now();
    fleet.add_article("http://a.example", remote_article("1", now, 0));
    fleet.add_article("http://a.example", remote_article("2", now, 0));
    let engine = Arc::new(FakeEngine {
        fail: true,
        ..FakeEngine::default()
    });

    let report = scheduler(&db, &fleet, Arc::clone(&engine))
        .with_draw(|| 99)
        .run_pass(now)
        .await
        .unwrap();

    assert_eq!(report.selected, 2);
    assert_eq!(report.posted, 0);
    assert_eq!(report.failed, 2);
    assert_eq!(engine.calls.load(Ordering::SeqCst), 4);
    assert!(fleet.comments().is_empty());
}

#[tokio::test]
async fn test_persona_sessions_are_pooled() {
    let (db, _temp_dir) = setup_db().await;
    let fleet = Arc::new(FakeFleet::default());
    add_site(&db, "http://a.example", 0).await;
    add_persona(&db, "dave").await;
    let now = Utc::now();
    for id in ["1", "2", "3"] {
        fleet.add_article("http://a.example", remote_article(id, now, 0));
    }

    let report = scheduler(&db, &fleet, Arc::new(FakeEngine::default()))
        .with_draw(|| 99)
        .run_pass(now)
        .await
        .unwrap();

    assert_eq!(report.posted, 3);
    assert_eq!(fleet.logins.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_run_stops_when_cancelled() {
    let (db, _temp_dir) = setup_db().await;
    let fleet = Arc::new(FakeFleet::default());
    let scheduler = scheduler(&db, &fleet, Arc::new(FakeEngine::default()));
    let token = CancellationToken::new();

    let handle = tokio::spawn({
        let token = token.clone();
        async move { scheduler.run(token).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("comment loop did not stop")
        .unwrap();
}
