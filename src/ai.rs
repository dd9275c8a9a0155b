//! Generative text engine used to rewrite articles and write comments.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::constants::DISTRIBUTOR_USER_AGENT;

/// A rewritten article.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rewritten {
    pub title: String,
    pub content: String,
}

/// A generated comment and the engine's confidence in it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedComment {
    pub comment: String,
    #[serde(default)]
    pub score: f64,
}

#[async_trait]
pub trait TextEngine: Send + Sync {
    async fn rewrite(&self, text: &str) -> Result<Rewritten>;

    async fn comment(&self, article_text: &str) -> Result<GeneratedComment>;
}

#[derive(Serialize)]
struct TextRequest<'a> {
    text: &'a str,
}

/// Text engine reached over JSON HTTP (`POST rewrite`, `POST comment`).
#[derive(Debug, Clone)]
pub struct HttpTextEngine {
    client: Client,
    base: Url,
}

impl HttpTextEngine {
    /// # Errors
    ///
    /// Returns an error if `base_url` is not a valid URL or the HTTP client
    /// cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base = Url::parse(&normalized).context("Invalid text engine URL")?;
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(DISTRIBUTOR_USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, base })
    }

    async fn call<T: serde::de::DeserializeOwned>(&self, path: &str, text: &str) -> Result<T> {
        let response = self
            .client
            .post(self.base.join(path)?)
            .json(&TextRequest { text })
            .send()
            .await
            .with_context(|| format!("Failed to call text engine {path}"))?;

        if !response.status().is_success() {
            anyhow::bail!("Text engine {path} failed with status {}", response.status());
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to decode text engine {path} response"))
    }
}

#[async_trait]
impl TextEngine for HttpTextEngine {
    async fn rewrite(&self, text: &str) -> Result<Rewritten> {
        self.call("rewrite", text).await
    }

    async fn comment(&self, article_text: &str) -> Result<GeneratedComment> {
        self.call("comment", article_text).await
    }
}

/// Run `op` up to `attempts` times, sleeping `delay` between failures.
///
/// Returns the last error once the budget is spent.
pub async fn retry_fixed<T, F, Fut>(attempts: u32, delay: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                warn!(attempt, attempts, "Text engine call failed, retrying: {e:#}");
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e.context(format!("Gave up after {attempts} attempts"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_retry_fixed_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let value = retry_fixed(3, Duration::from_millis(1), move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                anyhow::bail!("flaky");
            }
            Ok(n)
        })
        .await
        .unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_fixed_stops_at_budget() {
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let result: Result<()> = retry_fixed(2, Duration::from_millis(1), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("down")
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_fixed_zero_budget_still_tries_once() {
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let _ = retry_fixed(0, Duration::from_millis(1), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>(())
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_new_rejects_invalid_url() {
        assert!(HttpTextEngine::new("::nope::", Duration::from_secs(1)).is_err());
    }
}
