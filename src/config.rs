use std::collections::HashSet;
use std::env;

use anyhow::{anyhow, Result};

use crate::catalog::HttpCatalogDefinition;

/// Where catalog lookups are served from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogSource {
    /// In-memory catalog, optionally loaded from a JSON file.
    Static { path: Option<String> },
    /// Remote OSB catalog endpoint.
    Http(HttpCatalogDefinition),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub catalog: CatalogSource,
    pub allowed_tokens: Option<HashSet<String>>,
    pub max_request_bytes: Option<usize>,
    pub request_budget_ms: u64,
    pub async_updates: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let timeout_ms = parse_optional_u64("BROKER_CATALOG_TIMEOUT_MS")?;
        let ttl_ms = parse_optional_u64("BROKER_CATALOG_TTL_MS")?;
        let catalog = match non_empty_var("BROKER_CATALOG_URL") {
            Some(url) => {
                let mut def = HttpCatalogDefinition::new(url);
                def.bearer_token = non_empty_var("BROKER_CATALOG_TOKEN");
                if let Some(ms) = timeout_ms {
                    def.timeout_ms = ms;
                }
                if let Some(ms) = ttl_ms {
                    def.ttl_ms = ms;
                }
                CatalogSource::Http(def)
            }
            None => CatalogSource::Static {
                path: non_empty_var("BROKER_CATALOG_FILE"),
            },
        };

        let allowed_tokens = env::var("BROKER_ALLOWED_TOKENS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string())
                    .collect::<HashSet<_>>()
            })
            .filter(|set: &HashSet<String>| !set.is_empty());

        let max_request_bytes = parse_optional_u64("BROKER_MAX_REQUEST_BYTES")?.map(|v| v as usize);
        let request_budget_ms = parse_optional_u64("BROKER_REQUEST_BUDGET_MS")?.unwrap_or(2_000);
        let async_updates = parse_bool_env("BROKER_ASYNC_UPDATES")?.unwrap_or(true);

        Ok(Self {
            catalog,
            allowed_tokens,
            max_request_bytes,
            request_budget_ms,
            async_updates,
        })
    }
}

fn non_empty_var(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool_env(var: &str) -> Result<Option<bool>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value)
            .map(Some)
            .ok_or_else(|| anyhow!("{} must be a boolean (true/false/1/0)", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
