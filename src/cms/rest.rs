//! JSON REST implementation of the CMS client.
//!
//! Sessions are bearer tokens obtained from `POST api/login`. HTTP 401 and 403
//! are reported as [`CmsError::Unauthenticated`] so the client pool can
//! re-login.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{
    Article, ArticleQuery, CmsClient, CmsConnector, CmsError, Credentials, NewComment,
    RemoteArticle, RemoteCategory, SortBy, SortOrder,
};
use crate::constants::DISTRIBUTOR_USER_AGENT;

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Serialize)]
struct PostArticleRequest<'a> {
    title: &'a str,
    content: &'a str,
    intro: &'a str,
    category_id: &'a str,
}

#[derive(Serialize)]
struct PostCommentRequest<'a> {
    content: &'a str,
}

/// Builds [`RestClient`]s sharing one HTTP connection pool.
#[derive(Debug, Clone)]
pub struct RestConnector {
    http: Client,
}

impl RestConnector {
    /// Create a connector whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, CmsError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(DISTRIBUTOR_USER_AGENT)
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl CmsConnector for RestConnector {
    async fn connect(
        &self,
        endpoint: &str,
        credentials: &Credentials,
    ) -> Result<Arc<dyn CmsClient>, CmsError> {
        let client = RestClient::login(self.http.clone(), endpoint, credentials).await?;
        Ok(Arc::new(client))
    }

    fn anonymous(&self, endpoint: &str) -> Result<Arc<dyn CmsClient>, CmsError> {
        Ok(Arc::new(RestClient::anonymous(self.http.clone(), endpoint)?))
    }
}

/// A client bound to one site, optionally holding a session token.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: Client,
    base: Url,
    token: Option<String>,
}

impl RestClient {
    /// A client with no session.
    pub fn anonymous(http: Client, endpoint: &str) -> Result<Self, CmsError> {
        Ok(Self {
            http,
            base: parse_base(endpoint)?,
            token: None,
        })
    }

    /// Log in and return a client carrying the session token.
    pub async fn login(
        http: Client,
        endpoint: &str,
        credentials: &Credentials,
    ) -> Result<Self, CmsError> {
        let mut client = Self::anonymous(http, endpoint)?;
        let response = client
            .http
            .post(client.url("api/login")?)
            .json(&LoginRequest {
                username: &credentials.username,
                password: &credentials.password,
            })
            .send()
            .await?;
        let login: LoginResponse = decode(check(response).await?).await?;

        debug!(endpoint = %client.base, username = %credentials.username, "Logged in to CMS");
        client.token = Some(login.token);
        Ok(client)
    }

    fn url(&self, path: &str) -> Result<Url, CmsError> {
        self.base
            .join(path)
            .map_err(|e| CmsError::InvalidEndpoint(format!("{}{path}: {e}", self.base)))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl CmsClient for RestClient {
    async fn list_categories(&self) -> Result<Vec<RemoteCategory>, CmsError> {
        let request = self.authorize(self.http.get(self.url("api/categories")?));
        decode(check(request.send().await?).await?).await
    }

    async fn post_article(&self, article: &Article) -> Result<(), CmsError> {
        let category_id = article
            .external_category_id
            .as_deref()
            .ok_or_else(|| CmsError::Decode("article has no category".to_string()))?;

        let request = self
            .authorize(self.http.post(self.url("api/articles")?))
            .json(&PostArticleRequest {
                title: &article.title,
                content: &article.content,
                intro: &article.intro,
                category_id,
            });
        check(request.send().await?).await?;
        Ok(())
    }

    async fn list_articles(&self, query: &ArticleQuery) -> Result<Vec<RemoteArticle>, CmsError> {
        let mut url = self.url("api/articles")?;
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(category) = &query.category {
                pairs.append_pair("category", category);
            }
            pairs.append_pair(
                "sort",
                match query.sort_by {
                    SortBy::PostedAt => "posted_at",
                    SortBy::CommentCount => "comment_count",
                },
            );
            pairs.append_pair(
                "order",
                match query.order {
                    SortOrder::Asc => "asc",
                    SortOrder::Desc => "desc",
                },
            );
        }

        let request = self.authorize(self.http.get(url));
        decode(check(request.send().await?).await?).await
    }

    async fn get_article(&self, id: &str) -> Result<RemoteArticle, CmsError> {
        let request = self.authorize(self.http.get(self.url(&format!("api/articles/{id}"))?));
        decode(check(request.send().await?).await?).await
    }

    async fn post_comment(&self, comment: &NewComment) -> Result<(), CmsError> {
        let url = self.url(&format!("api/articles/{}/comments", comment.article_id))?;
        let request = self
            .authorize(self.http.post(url))
            .json(&PostCommentRequest {
                content: &comment.content,
            });
        check(request.send().await?).await?;
        Ok(())
    }
}

/// Parse a site endpoint so relative API paths join below it.
fn parse_base(endpoint: &str) -> Result<Url, CmsError> {
    let normalized = if endpoint.ends_with('/') {
        endpoint.to_string()
    } else {
        format!("{endpoint}/")
    };
    Url::parse(&normalized).map_err(|e| CmsError::InvalidEndpoint(format!("{endpoint}: {e}")))
}

async fn check(response: Response) -> Result<Response, CmsError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(CmsError::Unauthenticated(format!("HTTP {status}")));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CmsError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, CmsError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| CmsError::Decode(e.to_string()))
}
