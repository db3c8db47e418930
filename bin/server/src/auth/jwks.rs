//! Signing key cache for ID token validation.
//!
//! The authority's key set is fetched at discovery time and kept here. When an
//! ID token names a key id the cache does not hold, the set is re-fetched,
//! but never more often than the configured minimum interval. Readers always
//! see either the old or the new set, never a partial one.

use async_trait::async_trait;
use openidconnect::JsonWebKey;
use openidconnect::core::CoreJsonWebKeySet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Errors fetching a key set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySetError {
    /// The request could not be completed.
    Request { url: String, reason: String },
    /// The endpoint answered with a non-success status.
    Status { url: String, status: u16 },
    /// The body was not a key set.
    Parse { url: String, reason: String },
    /// The key set held no keys.
    Empty { url: String },
}

impl fmt::Display for KeySetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request { url, reason } => {
                write!(f, "failed to fetch key set from {url}: {reason}")
            }
            Self::Status { url, status } => {
                write!(f, "key set endpoint {url} returned status {status}")
            }
            Self::Parse { url, reason } => {
                write!(f, "failed to parse key set from {url}: {reason}")
            }
            Self::Empty { url } => write!(f, "key set from {url} contains no keys"),
        }
    }
}

impl std::error::Error for KeySetError {}

/// Where key sets come from.
#[async_trait]
pub trait KeySetSource: Send + Sync {
    /// Fetches the current key set.
    async fn fetch(&self) -> Result<CoreJsonWebKeySet, KeySetError>;

    /// Describes the source for logging.
    fn location(&self) -> &str;
}

/// Fetches the key set from the authority's `jwks_uri`.
pub struct HttpKeySetSource {
    url: String,
    http_client: reqwest::Client,
}

impl HttpKeySetSource {
    /// Creates a source for the given key set URL.
    pub fn new(url: impl Into<String>, http_client: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            http_client,
        }
    }
}

#[async_trait]
impl KeySetSource for HttpKeySetSource {
    async fn fetch(&self) -> Result<CoreJsonWebKeySet, KeySetError> {
        let response = self
            .http_client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| KeySetError::Request {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(KeySetError::Status {
                url: self.url.clone(),
                status: response.status().as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| KeySetError::Request {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;

        serde_json::from_slice(&body).map_err(|e| KeySetError::Parse {
            url: self.url.clone(),
            reason: e.to_string(),
        })
    }

    fn location(&self) -> &str {
        &self.url
    }
}

/// Cached signing keys with rate-limited refresh.
pub struct JwksCache {
    keys: RwLock<Arc<CoreJsonWebKeySet>>,
    /// Held for the duration of a fetch so concurrent misses share one request.
    refresh_lock: Mutex<Option<Instant>>,
    min_refresh_interval: Duration,
    source: Box<dyn KeySetSource>,
}

impl JwksCache {
    /// Creates a cache seeded with a key set fetched at discovery.
    pub fn new(
        initial: CoreJsonWebKeySet,
        source: Box<dyn KeySetSource>,
        min_refresh_interval: Duration,
    ) -> Self {
        Self {
            keys: RwLock::new(Arc::new(initial)),
            refresh_lock: Mutex::new(Some(Instant::now())),
            min_refresh_interval,
            source,
        }
    }

    /// Returns the current key set.
    pub async fn current(&self) -> Arc<CoreJsonWebKeySet> {
        Arc::clone(&*self.keys.read().await)
    }

    /// Returns the number of keys currently cached.
    pub async fn len(&self) -> usize {
        self.keys.read().await.keys().len()
    }

    /// Returns true if no keys are cached.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Returns true if the cached set holds a key with this id.
    pub async fn contains(&self, kid: &str) -> bool {
        let keys = self.current().await;
        contains_kid(&keys, kid)
    }

    /// Returns a key set suitable for verifying a token signed with `kid`.
    ///
    /// A miss triggers a refresh unless one happened within the minimum
    /// interval; in that case the current set is returned and verification
    /// fails on the unknown key.
    ///
    /// # Errors
    ///
    /// Returns the fetch error if a refresh was attempted and failed.
    pub async fn key_set_for(
        &self,
        kid: Option<&str>,
    ) -> Result<Arc<CoreJsonWebKeySet>, KeySetError> {
        let Some(kid) = kid else {
            return Ok(self.current().await);
        };
        if self.contains(kid).await {
            return Ok(self.current().await);
        }

        debug!(kid = %kid, "key id not in cache, refreshing key set");
        self.refresh_if_allowed().await?;
        Ok(self.current().await)
    }

    /// Refreshes unless a refresh happened within the minimum interval.
    ///
    /// Returns true if a fetch was performed.
    ///
    /// # Errors
    ///
    /// Returns the fetch error. The cached set is left unchanged.
    pub async fn refresh_if_allowed(&self) -> Result<bool, KeySetError> {
        let mut last_refresh = self.refresh_lock.lock().await;
        if last_refresh.is_some_and(|at| at.elapsed() < self.min_refresh_interval) {
            debug!(
                source = %self.source.location(),
                "key set refreshed recently, skipping"
            );
            return Ok(false);
        }
        self.fetch_and_swap(&mut last_refresh).await?;
        Ok(true)
    }

    /// Refreshes regardless of when the last refresh happened.
    ///
    /// # Errors
    ///
    /// Returns the fetch error. The cached set is left unchanged.
    pub async fn refresh(&self) -> Result<(), KeySetError> {
        let mut last_refresh = self.refresh_lock.lock().await;
        self.fetch_and_swap(&mut last_refresh).await
    }

    async fn fetch_and_swap(&self, last_refresh: &mut Option<Instant>) -> Result<(), KeySetError> {
        // A failed attempt still counts, so an unreachable authority is not
        // hammered by every request carrying an unknown kid.
        *last_refresh = Some(Instant::now());

        let fetched = self.source.fetch().await?;
        if fetched.keys().is_empty() {
            return Err(KeySetError::Empty {
                url: self.source.location().to_string(),
            });
        }

        let count = fetched.keys().len();
        *self.keys.write().await = Arc::new(fetched);
        info!(source = %self.source.location(), keys = count, "key set refreshed");
        Ok(())
    }

    /// Spawns a task refreshing the key set on a fixed interval.
    pub fn spawn_periodic_refresh(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately and the set is already fresh.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.refresh().await {
                    warn!(error = %e, "scheduled key set refresh failed, keeping cached keys");
                }
            }
        })
    }
}

fn contains_kid(keys: &CoreJsonWebKeySet, kid: &str) -> bool {
    keys.keys()
        .iter()
        .any(|key| key.key_id().is_some_and(|id| id.as_str() == kid))
}
