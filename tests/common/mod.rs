use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, Response};
use brokergate::model::{EnrichedUpdateRequest, UpdateServiceInstanceResponse};
use brokergate::updater::{DispatchError, InstanceUpdater};
use brokergate::{AppConfig, CatalogSource};
use http_body_util::BodyExt;

/// Tracks environment variable mutations and restores originals on drop.
#[allow(dead_code)]
pub struct EnvGuard {
    originals: HashMap<String, Option<String>>,
}

#[allow(dead_code)]
impl EnvGuard {
    pub fn new() -> Self {
        Self {
            originals: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.capture(key);
        std::env::set_var(key, value);
    }

    pub fn remove(&mut self, key: &str) {
        self.capture(key);
        std::env::remove_var(key);
    }

    fn capture(&mut self, key: &str) {
        if self.originals.contains_key(key) {
            return;
        }
        let original = std::env::var(key).ok();
        self.originals.insert(key.to_string(), original);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, original) in self.originals.drain() {
            match original {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

/// Catalog with `svc-1` offering `plan-a` and `plan-b`.
#[allow(dead_code)]
pub fn sample_catalog_json() -> serde_json::Value {
    serde_json::json!({
        "services": [{
            "id": "svc-1",
            "name": "database",
            "description": "Managed database",
            "bindable": true,
            "plan_updateable": true,
            "plans": [
                {"id": "plan-a", "name": "small"},
                {"id": "plan-b", "name": "large", "free": false}
            ]
        }]
    })
}

/// Writes the sample catalog into `dir` and returns its path.
#[allow(dead_code)]
pub fn write_sample_catalog(dir: &tempfile::TempDir) -> PathBuf {
    let path = dir.path().join("catalog.json");
    std::fs::write(&path, sample_catalog_json().to_string()).unwrap();
    path
}

#[allow(dead_code)]
pub fn static_config(catalog_path: &PathBuf) -> AppConfig {
    AppConfig {
        catalog: CatalogSource::Static {
            path: Some(catalog_path.to_string_lossy().to_string()),
        },
        allowed_tokens: None,
        max_request_bytes: None,
        request_budget_ms: 1_000,
        async_updates: true,
    }
}

/// Backend that records every request it receives.
#[allow(dead_code)]
#[derive(Default)]
pub struct RecordingUpdater {
    pub received: Mutex<Vec<EnrichedUpdateRequest>>,
}

#[allow(dead_code)]
impl RecordingUpdater {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<EnrichedUpdateRequest> {
        self.received.lock().unwrap().last().cloned()
    }
}

#[async_trait::async_trait]
impl InstanceUpdater for RecordingUpdater {
    fn name(&self) -> &str {
        "recording"
    }

    async fn update(
        &self,
        req: EnrichedUpdateRequest,
    ) -> Result<UpdateServiceInstanceResponse, DispatchError> {
        let is_async = req.async_accepted;
        self.received.lock().unwrap().push(req);
        Ok(UpdateServiceInstanceResponse {
            is_async,
            operation: is_async.then(|| "recorded".to_string()),
            dashboard_url: None,
        })
    }
}

/// PATCH request with the OSB version header and a JSON body.
#[allow(dead_code)]
pub fn patch_request(uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("PATCH")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-broker-api-version", "2.17")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

#[allow(dead_code)]
pub async fn json_body(resp: Response<Body>) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    if bytes.is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap()
}

#[allow(dead_code)]
pub async fn text_body(resp: Response<Body>) -> String {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}
