//! Per-identity pool of authenticated CMS clients.
//!
//! Both schedulers and manual publishes share one [`ClientPool`]. Each entry
//! owns a mutex that serializes login and requests for that identity, and
//! [`PooledClient::request`] re-logs in exactly once when a call is rejected as
//! unauthenticated.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::cms::{CmsClient, CmsConnector, CmsError, Credentials};

/// Who a pooled client is logged in as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Identity {
    /// The site's own publishing account.
    Site(i64),
    /// A comment persona on a given site.
    Persona { site_id: i64, user_id: i64 },
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Site(id) => write!(f, "site:{id}"),
            Self::Persona { site_id, user_id } => write!(f, "site:{site_id}/user:{user_id}"),
        }
    }
}

/// An authenticated client for one identity.
pub struct PooledClient {
    identity: Identity,
    endpoint: String,
    credentials: Credentials,
    connector: Arc<dyn CmsConnector>,
    /// `None` after a failed login; the next request logs in again.
    session: Mutex<Option<Arc<dyn CmsClient>>>,
}

impl PooledClient {
    #[must_use]
    pub fn identity(&self) -> Identity {
        self.identity
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Whether the client currently holds a session.
    pub async fn is_ready(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Run `op` against the current session.
    ///
    /// If `op` fails with an auth error the session is replaced by a fresh
    /// login and `op` runs once more. Whatever the second attempt returns is
    /// final.
    pub async fn request<T, F, Fut>(&self, op: F) -> Result<T, CmsError>
    where
        F: Fn(Arc<dyn CmsClient>) -> Fut,
        Fut: Future<Output = Result<T, CmsError>>,
    {
        let mut session = self.session.lock().await;

        let current = session.clone();
        let client = match current {
            Some(client) => client,
            None => self.login(&mut session).await?,
        };

        match op(client).await {
            Err(e) if e.is_unauthenticated() => {
                warn!(identity = %self.identity, error = %e, "Session rejected, logging in again");
                let client = self.login(&mut session).await?;
                op(client).await
            }
            result => result,
        }
    }

    async fn login(
        &self,
        session: &mut Option<Arc<dyn CmsClient>>,
    ) -> Result<Arc<dyn CmsClient>, CmsError> {
        *session = None;
        let client = self
            .connector
            .connect(&self.endpoint, &self.credentials)
            .await?;
        debug!(identity = %self.identity, "Session established");
        *session = Some(Arc::clone(&client));
        Ok(client)
    }
}

impl fmt::Debug for PooledClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledClient")
            .field("identity", &self.identity)
            .field("endpoint", &self.endpoint)
            .field("username", &self.credentials.username)
            .finish_non_exhaustive()
    }
}

/// Map from identity to its authenticated client.
pub struct ClientPool {
    connector: Arc<dyn CmsConnector>,
    clients: RwLock<HashMap<Identity, Arc<PooledClient>>>,
}

impl ClientPool {
    #[must_use]
    pub fn new(connector: Arc<dyn CmsConnector>) -> Self {
        Self {
            connector,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// The connector used to build clients, also handy for anonymous reads.
    #[must_use]
    pub fn connector(&self) -> &Arc<dyn CmsConnector> {
        &self.connector
    }

    /// Get the cached client for `identity`, logging in on first use.
    ///
    /// Entries are keyed by identity alone: once cached, `endpoint` and
    /// `credentials` are ignored. Use [`ClientPool::update_client`] to change
    /// them. A failed login caches nothing.
    pub async fn get_or_create(
        &self,
        identity: Identity,
        endpoint: &str,
        credentials: &Credentials,
    ) -> Result<Arc<PooledClient>, CmsError> {
        // Fast path: already logged in
        {
            let read_guard = self.clients.read().await;
            if let Some(client) = read_guard.get(&identity) {
                return Ok(Arc::clone(client));
            }
        }

        let client = self.build(identity, endpoint, credentials).await?;

        // Another caller may have logged in the same identity meanwhile; keep theirs.
        let mut write_guard = self.clients.write().await;
        Ok(Arc::clone(write_guard.entry(identity).or_insert(client)))
    }

    /// Log in with new endpoint or credentials and replace the cached client.
    ///
    /// On failure the existing entry is kept.
    pub async fn update_client(
        &self,
        identity: Identity,
        endpoint: &str,
        credentials: &Credentials,
    ) -> Result<Arc<PooledClient>, CmsError> {
        let client = self.build(identity, endpoint, credentials).await?;
        self.clients
            .write()
            .await
            .insert(identity, Arc::clone(&client));
        info!(identity = %identity, endpoint = %endpoint, "Pooled client replaced");
        Ok(client)
    }

    /// Drop the cached client for `identity`.
    pub async fn remove(&self, identity: Identity) -> bool {
        self.clients.write().await.remove(&identity).is_some()
    }

    /// Number of cached identities.
    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }

    async fn build(
        &self,
        identity: Identity,
        endpoint: &str,
        credentials: &Credentials,
    ) -> Result<Arc<PooledClient>, CmsError> {
        let session = self.connector.connect(endpoint, credentials).await?;
        info!(identity = %identity, endpoint = %endpoint, "Logged in new pooled client");

        Ok(Arc::new(PooledClient {
            identity,
            endpoint: endpoint.to_string(),
            credentials: credentials.clone(),
            connector: Arc::clone(&self.connector),
            session: Mutex::new(Some(session)),
        }))
    }
}

impl fmt::Debug for ClientPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientPool").finish_non_exhaustive()
    }
}
