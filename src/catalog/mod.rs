//! Broker catalog lookup.
//!
//! The validator only needs read access to the catalog: find a service
//! definition by id and check its plans. `CatalogLookup` is the seam; the
//! crate ships a static in-memory catalog and an HTTP-backed one.

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod http;

pub use self::http::{HttpCatalog, HttpCatalogDefinition};

/// A plan offered under a service definition.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Plan {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_free")]
    pub free: bool,
}

fn default_free() -> bool {
    true
}

impl Plan {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            free: true,
        }
    }
}

/// A service offering in the catalog.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ServiceDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub bindable: bool,
    /// Whether the platform may move instances between plans.
    #[serde(default)]
    pub plan_updateable: bool,
    #[serde(default)]
    pub plans: Vec<Plan>,
}

impl ServiceDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            bindable: false,
            plan_updateable: false,
            plans: Vec::new(),
        }
    }

    pub fn with_plan(mut self, plan: Plan) -> Self {
        self.plans.push(plan);
        self
    }

    pub fn plan(&self, plan_id: &str) -> Option<&Plan> {
        self.plans.iter().find(|p| p.id == plan_id)
    }
}

/// OSB catalog document (`GET /v2/catalog`).
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq, Eq)]
pub struct Catalog {
    #[serde(default)]
    pub services: Vec<ServiceDefinition>,
}

impl Catalog {
    pub fn new(services: Vec<ServiceDefinition>) -> Self {
        Self { services }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("catalog request failed: {0}")]
    Transport(String),
    #[error("catalog responded with HTTP {0}")]
    Status(u16),
    #[error("catalog document is invalid: {0}")]
    Parse(String),
    #[error("catalog lookup exceeded the request deadline ({0} ms)")]
    Timeout(u64),
}

/// Read-only access to the broker catalog.
///
/// `Ok(None)` means the id is not in the catalog; `Err` is reserved for the
/// catalog itself being unreachable or broken.
#[async_trait::async_trait]
pub trait CatalogLookup: Send + Sync {
    fn name(&self) -> &str;

    async fn service_definition(
        &self,
        id: &str,
    ) -> Result<Option<Arc<ServiceDefinition>>, CatalogError>;

    async fn catalog(&self) -> Result<Arc<Catalog>, CatalogError>;
}

/// Catalog held in memory, indexed by service id.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    catalog: Arc<Catalog>,
    by_id: HashMap<String, Arc<ServiceDefinition>>,
}

impl StaticCatalog {
    pub fn new(catalog: Catalog) -> Self {
        let by_id = catalog
            .services
            .iter()
            .map(|svc| (svc.id.clone(), Arc::new(svc.clone())))
            .collect();
        Self {
            catalog: Arc::new(catalog),
            by_id,
        }
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path).with_context(|| {
            format!("Failed to read BROKER_CATALOG_FILE '{}': file unreadable", path)
        })?;
        let catalog = serde_json::from_str::<Catalog>(&content).with_context(|| {
            format!(
                "Failed to parse BROKER_CATALOG_FILE '{}': invalid catalog JSON",
                path
            )
        })?;
        Ok(Self::new(catalog))
    }

    pub fn get(&self, id: &str) -> Option<Arc<ServiceDefinition>> {
        self.by_id.get(id).cloned()
    }

    pub fn document(&self) -> Arc<Catalog> {
        self.catalog.clone()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[async_trait::async_trait]
impl CatalogLookup for StaticCatalog {
    fn name(&self) -> &str {
        "static"
    }

    async fn service_definition(
        &self,
        id: &str,
    ) -> Result<Option<Arc<ServiceDefinition>>, CatalogError> {
        Ok(self.get(id))
    }

    async fn catalog(&self) -> Result<Arc<Catalog>, CatalogError> {
        Ok(self.document())
    }
}
