//! Core library for brokergate. This module wires the update pipeline,
//! the catalog and the provisioning backend into an axum router that serves
//! the Open Service Broker "update service instance" operation.

mod config;
pub mod catalog;
pub mod model;
pub mod pipeline;
pub mod updater;
pub mod util;

pub use config::{AppConfig, CatalogSource};

use axum::extract::{
    rejection::{BytesRejection, FailedToBufferBody, JsonRejection},
    DefaultBodyLimit, Path, Query, State,
};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::{
    routing::{get, patch},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Instant;

use crate::catalog::{CatalogLookup, HttpCatalog, StaticCatalog};
use crate::model::{RouteInputs, UpdateServiceInstanceRequest};
use crate::pipeline::{PipelineError, UpdatePipeline, ValidationError};
use crate::updater::{AcknowledgingUpdater, InstanceUpdater};
use crate::util::{header_string, Deadline};

pub use crate::catalog::{Catalog, CatalogError, HttpCatalogDefinition, Plan, ServiceDefinition};
pub use crate::model::{
    EnrichedUpdateRequest, PreviousValues, RequestContext, UpdateServiceInstanceResponse,
};
pub use crate::pipeline::{ErrorKind, Stage};
pub use crate::updater::DispatchError;

/// OSB error body. `violations` is only present for validation failures.
#[derive(Debug, Serialize, Clone)]
pub struct ErrorResponse {
    pub error: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violations: Option<Vec<ValidationError>>,
    #[serde(skip)]
    pub http_status: u16,
}

impl ErrorResponse {
    fn new(http_status: u16, error: &str, description: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            description: description.into(),
            violations: None,
            http_status,
        }
    }
}

/// Request counters exposed on `/metrics`.
#[derive(Default)]
pub struct BrokerMetrics {
    pub requests_total: AtomicU64,
    pub dispatched_total: AtomicU64,
    pub rejected_total: AtomicU64,
    pub violations_total: AtomicU64,
    pub catalog_unavailable_total: AtomicU64,
    pub dispatch_errors_total: AtomicU64,
    pub latency_sum_ms: AtomicU64,
    pub latency_count: AtomicU64,
}

impl BrokerMetrics {
    fn observe(&self, result: &Result<UpdateServiceInstanceResponse, PipelineError>, ms: u64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_ms.fetch_add(ms, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
        match result {
            Ok(_) => {
                self.dispatched_total.fetch_add(1, Ordering::Relaxed);
            }
            Err(PipelineError::Rejected(errors)) => {
                self.rejected_total.fetch_add(1, Ordering::Relaxed);
                self.violations_total
                    .fetch_add(errors.len() as u64, Ordering::Relaxed);
            }
            Err(PipelineError::CatalogUnavailable(_)) => {
                self.catalog_unavailable_total.fetch_add(1, Ordering::Relaxed);
            }
            Err(PipelineError::Dispatch(_)) => {
                self.dispatched_total.fetch_add(1, Ordering::Relaxed);
                self.dispatch_errors_total.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: UpdatePipeline,
    pub allowed_tokens: Option<HashSet<String>>,
    /// Maximum accepted raw request body size in bytes (None => unlimited)
    pub max_request_bytes: Option<usize>,
    /// Per-call budget for collaborator waits, in milliseconds.
    pub request_budget_ms: u64,
    pub metrics: Arc<BrokerMetrics>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub process_start_instant: Instant,
}

/// Build state from explicit configuration and a provisioning backend.
pub fn build_state(
    config: AppConfig,
    updater: Arc<dyn InstanceUpdater>,
) -> Result<AppState, Box<dyn std::error::Error>> {
    let AppConfig {
        catalog,
        allowed_tokens,
        max_request_bytes,
        request_budget_ms,
        async_updates: _,
    } = config;

    let catalog: Arc<dyn CatalogLookup> = match catalog {
        CatalogSource::Static { path: Some(path) } => {
            let loaded = StaticCatalog::from_file(&path)
                .map_err(|e| -> Box<dyn std::error::Error> { e.into() })?;
            tracing::info!(path=%path, services = loaded.len(), "loaded static catalog");
            Arc::new(loaded)
        }
        CatalogSource::Static { path: None } => {
            tracing::warn!("BROKER_CATALOG_FILE not set; serving an empty catalog");
            Arc::new(StaticCatalog::default())
        }
        CatalogSource::Http(def) => {
            tracing::info!(
                url=%def.url,
                timeout_ms = def.timeout_ms,
                ttl_ms = def.ttl_ms,
                "using remote catalog"
            );
            Arc::new(HttpCatalog::new(def)?)
        }
    };

    Ok(AppState {
        pipeline: UpdatePipeline::new(catalog, updater),
        allowed_tokens,
        max_request_bytes,
        request_budget_ms,
        metrics: Arc::new(BrokerMetrics::default()),
        started_at: chrono::Utc::now(),
        process_start_instant: Instant::now(),
    })
}

/// Build state from environment variables with the acknowledging backend.
pub async fn build_state_from_env() -> Result<AppState, Box<dyn std::error::Error>> {
    let config = AppConfig::from_env().map_err(|e| -> Box<dyn std::error::Error> { e.into() })?;
    let updater = Arc::new(AcknowledgingUpdater {
        async_updates: config.async_updates,
    });
    build_state(config, updater)
}

/// Build the Axum router and attach handlers.
pub fn app(state: AppState) -> Router {
    let max_request_bytes = state.max_request_bytes;

    let router = Router::new()
        .route("/v2/catalog", get(catalog_handler))
        .route("/v2/service_instances/:instance_id", patch(update_handler))
        .route(
            "/:platform_instance_id/v2/service_instances/:instance_id",
            patch(update_with_platform_handler),
        )
        .route("/healthz", get(healthz_handler))
        .route("/metrics", get(metrics_handler));

    // No configured limit means unlimited, not axum's 2 MiB default.
    let router = match max_request_bytes {
        Some(limit) => router.layer(DefaultBodyLimit::max(limit)),
        None => router.layer(DefaultBodyLimit::disable()),
    };

    router.with_state(state)
}

/// Query parameters of the update call.
#[derive(Debug, Deserialize)]
struct UpdateQuery {
    accepts_incomplete: Option<String>,
}

/// Major OSB API version this broker speaks.
const SUPPORTED_API_MAJOR: &str = "2";
const API_VERSION_HEADER: &str = "x-broker-api-version";

fn respond_with_error(err: ErrorResponse) -> axum::response::Response {
    let status = StatusCode::from_u16(err.http_status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(err)).into_response()
}

fn ensure_api_version(headers: &HeaderMap) -> Result<(), ErrorResponse> {
    match header_string(headers, API_VERSION_HEADER) {
        None => Err(ErrorResponse::new(
            412,
            "PreconditionFailed",
            format!(
                "Missing X-Broker-API-Version header (expected {}.x)",
                SUPPORTED_API_MAJOR
            ),
        )),
        Some(v) if v.split('.').next() != Some(SUPPORTED_API_MAJOR) => {
            tracing::info!(client_api_version=%v, "unsupported broker API version");
            Err(ErrorResponse::new(
                412,
                "PreconditionFailed",
                format!(
                    "Unsupported X-Broker-API-Version {} (expected {}.x)",
                    v, SUPPORTED_API_MAJOR
                ),
            ))
        }
        _ => Ok(()),
    }
}

fn authorization_error() -> ErrorResponse {
    ErrorResponse::new(401, "Unauthorized", "Unauthorized")
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<String, ErrorResponse> {
    let raw = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(authorization_error)?;

    let (scheme, token) = raw.trim().split_once(' ').ok_or_else(authorization_error)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(authorization_error());
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(authorization_error());
    }
    Ok(token.to_string())
}

/// Bearer auth is enforced only when an allowlist is configured.
fn ensure_authorized(
    headers: &HeaderMap,
    allowed_tokens: Option<&HashSet<String>>,
) -> Result<(), ErrorResponse> {
    if let Some(tokens) = allowed_tokens {
        let token = extract_bearer_token(headers)?;
        if !tokens.contains(&token) {
            return Err(authorization_error());
        }
    }
    Ok(())
}

fn ensure_guards(state: &AppState, headers: &HeaderMap) -> Result<(), ErrorResponse> {
    if let Some(limit) = state.max_request_bytes {
        if let Some(clen) = headers
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok())
        {
            if clen > limit {
                return Err(ErrorResponse::new(
                    413,
                    "PayloadTooLarge",
                    format!("Request too large ({} bytes > limit {} bytes)", clen, limit),
                ));
            }
        }
    }
    ensure_api_version(headers)?;
    ensure_authorized(headers, state.allowed_tokens.as_ref())
}

/// `GET /v2/catalog`.
async fn catalog_handler(State(state): State<AppState>, headers: HeaderMap) -> axum::response::Response {
    if let Err(err) = ensure_guards(&state, &headers) {
        return respond_with_error(err);
    }
    match state.pipeline.catalog().catalog().await {
        Ok(catalog) => (StatusCode::OK, Json(catalog.as_ref().clone())).into_response(),
        Err(err) => {
            tracing::warn!(error=%err, "catalog request failed");
            respond_with_error(ErrorResponse::new(503, "CatalogUnavailable", err.to_string()))
        }
    }
}

/// `PATCH /v2/service_instances/{instance_id}`.
async fn update_handler(
    state: State<AppState>,
    Path(instance_id): Path<String>,
    Query(query): Query<UpdateQuery>,
    headers: HeaderMap,
    payload: Result<Json<UpdateServiceInstanceRequest>, JsonRejection>,
) -> axum::response::Response {
    handle_update(&state, instance_id, None, query, &headers, payload).await
}

/// `PATCH /{platform_instance_id}/v2/service_instances/{instance_id}`.
async fn update_with_platform_handler(
    state: State<AppState>,
    Path((platform_instance_id, instance_id)): Path<(String, String)>,
    Query(query): Query<UpdateQuery>,
    headers: HeaderMap,
    payload: Result<Json<UpdateServiceInstanceRequest>, JsonRejection>,
) -> axum::response::Response {
    handle_update(
        &state,
        instance_id,
        Some(platform_instance_id),
        query,
        &headers,
        payload,
    )
    .await
}

async fn handle_update(
    state: &AppState,
    instance_id: String,
    platform_instance_id: Option<String>,
    query: UpdateQuery,
    headers: &HeaderMap,
    payload: Result<Json<UpdateServiceInstanceRequest>, JsonRejection>,
) -> axum::response::Response {
    if let Err(err) = ensure_guards(state, headers) {
        return respond_with_error(err);
    }

    let payload = match payload {
        Ok(Json(inner)) => inner,
        Err(rejection) => {
            return handle_json_rejection(state, rejection);
        }
    };

    let async_accepted = match query.accepts_incomplete.as_deref() {
        None => false,
        Some(raw) => match config::parse_bool(raw) {
            Some(v) => v,
            None => {
                return respond_with_error(ErrorResponse::new(
                    400,
                    "MalformedRequest",
                    format!("accepts_incomplete must be a boolean, got '{}'", raw),
                ))
            }
        },
    };

    let route = RouteInputs {
        service_instance_id: instance_id,
        async_accepted,
        api_info_location: header_string(headers, "x-api-info-location"),
        platform_instance_id,
        originating_identity: header_string(headers, "x-broker-api-originating-identity"),
    };

    let start = Instant::now();
    let deadline = Deadline::new_ms(state.request_budget_ms);
    let result = state.pipeline.run(payload, route, &deadline).await;
    state
        .metrics
        .observe(&result, start.elapsed().as_millis() as u64);

    match result {
        Ok(resp) => {
            let status = if resp.is_async {
                StatusCode::ACCEPTED
            } else {
                StatusCode::OK
            };
            (status, Json(resp)).into_response()
        }
        Err(PipelineError::Rejected(errors)) => {
            let description = errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            let mut err = ErrorResponse::new(400, "ValidationFailed", description);
            err.violations = Some(errors);
            respond_with_error(err)
        }
        Err(PipelineError::CatalogUnavailable(err)) => {
            respond_with_error(ErrorResponse::new(503, "CatalogUnavailable", err.to_string()))
        }
        Err(PipelineError::Dispatch(err)) => respond_with_error(ErrorResponse::new(
            err.http_status(),
            err.error_code(),
            err.to_string(),
        )),
    }
}

fn handle_json_rejection(state: &AppState, rejection: JsonRejection) -> axum::response::Response {
    match rejection {
        JsonRejection::BytesRejection(BytesRejection::FailedToBufferBody(
            FailedToBufferBody::LengthLimitError(_),
        )) => {
            let message = match state.max_request_bytes {
                Some(limit) => {
                    tracing::warn!(limit, "request body exceeded configured limit");
                    format!("Request too large (body exceeded limit {} bytes)", limit)
                }
                None => "Request too large".to_string(),
            };
            respond_with_error(ErrorResponse::new(413, "PayloadTooLarge", message))
        }
        other => {
            tracing::debug!(error=%other, "malformed update payload");
            respond_with_error(ErrorResponse::new(400, "MalformedRequest", other.body_text()))
        }
    }
}

/// Simple health endpoint for container readiness / liveness checks.
async fn healthz_handler(State(state): State<AppState>) -> axum::response::Response {
    let json = serde_json::json!({
        "status": "ok",
        "apiVersion": format!("{}.x", SUPPORTED_API_MAJOR),
        "catalog": state.pipeline.catalog().name(),
        "updater": state.pipeline.updater_name(),
        "budgetMs": state.request_budget_ms,
        "startedAt": state.started_at.to_rfc3339(),
    });
    (StatusCode::OK, Json(json)).into_response()
}

/// Prometheus-style metrics exposition. Text format with simple counters.
async fn metrics_handler(State(state): State<AppState>) -> axum::response::Response {
    use std::fmt::Write as _;
    let m = &state.metrics;
    let counters = [
        (
            "brokergate_update_requests_total",
            "Update requests that reached the pipeline",
            m.requests_total.load(Ordering::Relaxed),
        ),
        (
            "brokergate_update_dispatched_total",
            "Update requests handed to the provisioning backend",
            m.dispatched_total.load(Ordering::Relaxed),
        ),
        (
            "brokergate_update_rejected_total",
            "Update requests rejected by validation",
            m.rejected_total.load(Ordering::Relaxed),
        ),
        (
            "brokergate_validation_violations_total",
            "Individual validation violations reported",
            m.violations_total.load(Ordering::Relaxed),
        ),
        (
            "brokergate_catalog_unavailable_total",
            "Update requests failed by catalog errors or timeouts",
            m.catalog_unavailable_total.load(Ordering::Relaxed),
        ),
        (
            "brokergate_dispatch_errors_total",
            "Update requests failed by the provisioning backend",
            m.dispatch_errors_total.load(Ordering::Relaxed),
        ),
    ];
    let mut buf = String::new();
    for (name, help, value) in counters {
        writeln!(&mut buf, "# HELP {} {}", name, help).ok();
        writeln!(&mut buf, "# TYPE {} counter", name).ok();
        writeln!(&mut buf, "{} {}", name, value).ok();
    }
    writeln!(
        &mut buf,
        "# HELP brokergate_update_latency_ms Pipeline latency in milliseconds"
    )
    .ok();
    writeln!(&mut buf, "# TYPE brokergate_update_latency_ms summary").ok();
    writeln!(
        &mut buf,
        "brokergate_update_latency_ms_sum {}",
        m.latency_sum_ms.load(Ordering::Relaxed)
    )
    .ok();
    writeln!(
        &mut buf,
        "brokergate_update_latency_ms_count {}",
        m.latency_count.load(Ordering::Relaxed)
    )
    .ok();
    writeln!(
        &mut buf,
        "brokergate_uptime_seconds {:.3}",
        state.process_start_instant.elapsed().as_secs_f64()
    )
    .ok();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        buf,
    )
        .into_response()
}
