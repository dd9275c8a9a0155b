use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use article_distributor::ai::HttpTextEngine;
use article_distributor::cms::RestConnector;
use article_distributor::comment::CommentScheduler;
use article_distributor::config::Config;
use article_distributor::db::Database;
use article_distributor::pool::ClientPool;
use article_distributor::publish::Publisher;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    info!("Starting article-distributor");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(
        database = %config.database_path.display(),
        publish_enabled = config.publish_enabled,
        comment_enabled = config.comment_enabled,
        "Configuration loaded"
    );

    if let Some(parent) = config.database_path.parent() {
        tokio::fs::create_dir_all(parent).await.with_context(|| {
            format!("Failed to create database directory: {}", parent.display())
        })?;
    }

    let db = Database::new(&config.database_path)
        .await
        .context("Failed to initialize database")?;

    info!("Database initialized");

    let connector =
        RestConnector::new(config.http_timeout).context("Failed to build CMS connector")?;
    let pool = Arc::new(ClientPool::new(Arc::new(connector)));
    let engine = Arc::new(
        HttpTextEngine::new(&config.text_engine_url, config.http_timeout)
            .context("Failed to build text engine client")?,
    );

    let shutdown = CancellationToken::new();
    let mut handles = Vec::new();

    if config.publish_enabled {
        let publisher = Publisher::new(db.clone(), Arc::clone(&pool), config.intro_length);
        if let Err(e) = publisher.recover_on_startup().await {
            error!("Failed to recover backlog on startup: {e:#}");
        }
        let token = shutdown.clone();
        handles.push(tokio::spawn(async move {
            publisher.run(token).await;
        }));
    } else {
        info!("Publish scheduler disabled");
    }

    if config.comment_enabled {
        let scheduler = CommentScheduler::new(
            db.clone(),
            Arc::clone(&pool),
            engine,
            config.ai_retry_attempts,
            config.ai_retry_delay,
        );
        let token = shutdown.clone();
        handles.push(tokio::spawn(async move {
            scheduler.run(token).await;
        }));
    } else {
        info!("Comment scheduler disabled");
    }

    shutdown_signal().await;

    info!("Shutting down, waiting for running cycles to finish...");
    shutdown.cancel();

    for handle in handles {
        if let Err(e) = handle.await {
            error!("Scheduler task panicked: {e}");
        }
    }

    info!("Shutdown complete");

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,article_distributor=debug"));

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
