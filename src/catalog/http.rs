use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use super::{Catalog, CatalogError, CatalogLookup, ServiceDefinition, StaticCatalog};

const DEFAULT_TIMEOUT_MS: u64 = 500;
const DEFAULT_TTL_MS: u64 = 30_000;

/// Where and how to fetch a remote catalog document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpCatalogDefinition {
    pub url: String,
    pub bearer_token: Option<String>,
    pub timeout_ms: u64,
    /// How long a fetched document is reused. Zero disables caching.
    pub ttl_ms: u64,
}

impl HttpCatalogDefinition {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            bearer_token: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            ttl_ms: DEFAULT_TTL_MS,
        }
    }
}

struct CachedCatalog {
    fetched_at: Instant,
    catalog: Arc<StaticCatalog>,
}

/// HttpCatalog performs a GET against a remote OSB catalog endpoint and
/// keeps the parsed document for `ttl_ms`. Failures are reported, never
/// retried; a stale cache is not served after its TTL.
pub struct HttpCatalog {
    def: HttpCatalogDefinition,
    client: reqwest::Client,
    cache: RwLock<Option<CachedCatalog>>,
}

impl HttpCatalog {
    pub fn new(def: HttpCatalogDefinition) -> Result<Self, CatalogError> {
        let timeout = Duration::from_millis(def.timeout_ms);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| CatalogError::Transport(err.to_string()))?;
        Ok(Self {
            def,
            client,
            cache: RwLock::new(None),
        })
    }

    async fn current(&self) -> Result<Arc<StaticCatalog>, CatalogError> {
        let ttl = Duration::from_millis(self.def.ttl_ms);
        if !ttl.is_zero() {
            let guard = self.cache.read().await;
            if let Some(cached) = guard.as_ref() {
                if cached.fetched_at.elapsed() < ttl {
                    return Ok(cached.catalog.clone());
                }
            }
        }
        let fetched = Arc::new(StaticCatalog::new(self.fetch().await?));
        if !ttl.is_zero() {
            let mut guard = self.cache.write().await;
            *guard = Some(CachedCatalog {
                fetched_at: Instant::now(),
                catalog: fetched.clone(),
            });
        }
        Ok(fetched)
    }

    async fn fetch(&self) -> Result<Catalog, CatalogError> {
        let mut rb = self
            .client
            .get(&self.def.url)
            .header("accept", "application/json");
        if let Some(tok) = &self.def.bearer_token {
            rb = rb.bearer_auth(tok);
        }
        let resp = rb.send().await.map_err(|err| {
            tracing::warn!(url=%self.def.url, error=?err, "catalog fetch network error");
            CatalogError::Transport(err.to_string())
        })?;
        let status = resp.status();
        if !status.is_success() {
            tracing::warn!(url=%self.def.url, status=status.as_u16(), "catalog fetch rejected");
            return Err(CatalogError::Status(status.as_u16()));
        }
        let text = resp.text().await.map_err(|err| {
            tracing::warn!(url=%self.def.url, error=?err, "catalog read error");
            CatalogError::Transport(err.to_string())
        })?;
        let catalog = serde_json::from_str::<Catalog>(&text).map_err(|err| {
            tracing::warn!(url=%self.def.url, error=%err, "catalog parse error");
            CatalogError::Parse(err.to_string())
        })?;
        tracing::debug!(url=%self.def.url, services = catalog.services.len(), "catalog fetched");
        Ok(catalog)
    }
}

#[async_trait::async_trait]
impl CatalogLookup for HttpCatalog {
    fn name(&self) -> &str {
        "http"
    }

    async fn service_definition(
        &self,
        id: &str,
    ) -> Result<Option<Arc<ServiceDefinition>>, CatalogError> {
        Ok(self.current().await?.get(id))
    }

    async fn catalog(&self) -> Result<Arc<Catalog>, CatalogError> {
        Ok(self.current().await?.document())
    }
}
