//! Update pipeline.
//!
//! `UpdatePipeline` drives one request through context resolution,
//! validation and enrichment, then hands it to the provisioning backend.
//! A rejected request never reaches the enricher or the backend.

use std::sync::Arc;

use thiserror::Error;

use crate::catalog::{CatalogError, CatalogLookup};
use crate::model::{
    EnrichedUpdateRequest, RouteInputs, UpdateServiceInstanceRequest,
    UpdateServiceInstanceResponse,
};
use crate::updater::{DispatchError, InstanceUpdater};
use crate::util::Deadline;

pub mod enrich;
pub mod resolve;
pub mod validate;

pub use self::enrich::enrich;
pub use self::resolve::resolve_context;
pub use self::validate::{validate, ErrorKind, ValidatedRequest, ValidationError, ValidationFailure};

/// Progress of a single request. Transitions are linear; `Rejected` is only
/// reachable from `ContextResolved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    ContextResolved,
    Validated,
    Enriched,
    Dispatched,
    Rejected,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::ContextResolved => "context_resolved",
            Stage::Validated => "validated",
            Stage::Enriched => "enriched",
            Stage::Dispatched => "dispatched",
            Stage::Rejected => "rejected",
        }
    }

    pub fn can_advance_to(self, next: Stage) -> bool {
        matches!(
            (self, next),
            (Stage::Received, Stage::ContextResolved)
                | (Stage::ContextResolved, Stage::Validated)
                | (Stage::ContextResolved, Stage::Rejected)
                | (Stage::Validated, Stage::Enriched)
                | (Stage::Enriched, Stage::Dispatched)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Dispatched | Stage::Rejected)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("request rejected with {} violation(s)", .0.len())]
    Rejected(Vec<ValidationError>),
    #[error("catalog unavailable: {0}")]
    CatalogUnavailable(CatalogError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl From<ValidationFailure> for PipelineError {
    fn from(failure: ValidationFailure) -> Self {
        match failure {
            ValidationFailure::Invalid(errors) => PipelineError::Rejected(errors),
            ValidationFailure::CatalogUnavailable(err) => PipelineError::CatalogUnavailable(err),
        }
    }
}

struct StageTrace {
    current: Stage,
    visited: Vec<Stage>,
}

impl StageTrace {
    fn new() -> Self {
        Self {
            current: Stage::Received,
            visited: vec![Stage::Received],
        }
    }

    fn advance(&mut self, next: Stage, instance_id: &str) {
        debug_assert!(
            self.current.can_advance_to(next),
            "illegal stage transition {:?} -> {:?}",
            self.current,
            next
        );
        tracing::debug!(
            instance_id,
            from = self.current.as_str(),
            to = next.as_str(),
            "pipeline stage"
        );
        self.current = next;
        self.visited.push(next);
    }
}

/// Runs update requests. Cheap to clone; holds no per-request state.
#[derive(Clone)]
pub struct UpdatePipeline {
    catalog: Arc<dyn CatalogLookup>,
    updater: Arc<dyn InstanceUpdater>,
}

impl UpdatePipeline {
    pub fn new(catalog: Arc<dyn CatalogLookup>, updater: Arc<dyn InstanceUpdater>) -> Self {
        Self { catalog, updater }
    }

    pub fn catalog(&self) -> &Arc<dyn CatalogLookup> {
        &self.catalog
    }

    pub fn updater_name(&self) -> &str {
        self.updater.name()
    }

    /// Resolve, validate and enrich without dispatching.
    pub async fn prepare(
        &self,
        payload: UpdateServiceInstanceRequest,
        route: RouteInputs,
        deadline: &Deadline,
    ) -> Result<EnrichedUpdateRequest, PipelineError> {
        let mut trace = StageTrace::new();
        self.enrich_stages(payload, route, deadline, &mut trace)
            .await
    }

    /// Full run: the backend's result is returned as-is.
    pub async fn run(
        &self,
        payload: UpdateServiceInstanceRequest,
        route: RouteInputs,
        deadline: &Deadline,
    ) -> Result<UpdateServiceInstanceResponse, PipelineError> {
        self.run_traced(payload, route, deadline).await.0
    }

    /// Same as [`run`](Self::run) and also returns every stage visited.
    pub async fn run_traced(
        &self,
        payload: UpdateServiceInstanceRequest,
        route: RouteInputs,
        deadline: &Deadline,
    ) -> (
        Result<UpdateServiceInstanceResponse, PipelineError>,
        Vec<Stage>,
    ) {
        let mut trace = StageTrace::new();
        let enriched = match self.enrich_stages(payload, route, deadline, &mut trace).await {
            Ok(enriched) => enriched,
            Err(err) => return (Err(err), trace.visited),
        };
        let instance_id = enriched.service_instance_id.clone();
        trace.advance(Stage::Dispatched, &instance_id);
        tracing::info!(
            instance_id = %instance_id,
            updater = self.updater.name(),
            "dispatching service instance update"
        );
        let result = self
            .updater
            .update(enriched)
            .await
            .map_err(PipelineError::from);
        if let Err(err) = &result {
            tracing::warn!(instance_id = %instance_id, error = %err, "update backend failed");
        }
        (result, trace.visited)
    }

    async fn enrich_stages(
        &self,
        payload: UpdateServiceInstanceRequest,
        route: RouteInputs,
        deadline: &Deadline,
        trace: &mut StageTrace,
    ) -> Result<EnrichedUpdateRequest, PipelineError> {
        let instance_id = route.service_instance_id.clone();
        let context = resolve_context(payload.context.as_ref(), &instance_id);
        trace.advance(Stage::ContextResolved, &instance_id);

        let validated = match validate(payload, context, self.catalog.as_ref(), deadline).await {
            Ok(validated) => validated,
            Err(ValidationFailure::Invalid(errors)) => {
                trace.advance(Stage::Rejected, &instance_id);
                tracing::info!(
                    instance_id = %instance_id,
                    violations = errors.len(),
                    "update request rejected"
                );
                return Err(PipelineError::Rejected(errors));
            }
            Err(ValidationFailure::CatalogUnavailable(err)) => {
                tracing::warn!(
                    instance_id = %instance_id,
                    catalog = self.catalog.name(),
                    error = %err,
                    "catalog unavailable"
                );
                return Err(PipelineError::CatalogUnavailable(err));
            }
        };
        trace.advance(Stage::Validated, &instance_id);

        let enriched = enrich(validated, route);
        trace.advance(Stage::Enriched, &instance_id);
        Ok(enriched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, Plan, ServiceDefinition, StaticCatalog};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingUpdater {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl InstanceUpdater for CountingUpdater {
        fn name(&self) -> &str {
            "counting"
        }

        async fn update(
            &self,
            req: EnrichedUpdateRequest,
        ) -> Result<UpdateServiceInstanceResponse, DispatchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(UpdateServiceInstanceResponse {
                is_async: req.async_accepted,
                operation: Some(format!("op-{}", req.service_instance_id)),
                dashboard_url: None,
            })
        }
    }

    struct FailingCatalog;

    #[async_trait::async_trait]
    impl CatalogLookup for FailingCatalog {
        fn name(&self) -> &str {
            "failing"
        }

        async fn service_definition(
            &self,
            _id: &str,
        ) -> Result<Option<Arc<ServiceDefinition>>, CatalogError> {
            Err(CatalogError::Status(503))
        }

        async fn catalog(&self) -> Result<Arc<Catalog>, CatalogError> {
            Err(CatalogError::Status(503))
        }
    }

    fn pipeline(updater: Arc<CountingUpdater>) -> UpdatePipeline {
        let catalog = StaticCatalog::new(Catalog::new(vec![ServiceDefinition::new(
            "svc-1", "database",
        )
        .with_plan(Plan::new("plan-a", "small"))
        .with_plan(Plan::new("plan-b", "large"))]));
        UpdatePipeline::new(Arc::new(catalog), updater)
    }

    #[test]
    fn stage_transitions_are_linear() {
        assert!(Stage::Received.can_advance_to(Stage::ContextResolved));
        assert!(Stage::ContextResolved.can_advance_to(Stage::Rejected));
        assert!(Stage::ContextResolved.can_advance_to(Stage::Validated));
        assert!(!Stage::Validated.can_advance_to(Stage::Rejected));
        assert!(!Stage::Received.can_advance_to(Stage::Validated));
        assert!(!Stage::Dispatched.can_advance_to(Stage::Received));
        assert!(Stage::Rejected.is_terminal() && Stage::Dispatched.is_terminal());
    }

    #[tokio::test]
    async fn valid_request_reaches_dispatched() {
        let updater = Arc::new(CountingUpdater::default());
        let p = pipeline(updater.clone());
        let (result, stages) = p
            .run_traced(
                UpdateServiceInstanceRequest::new("svc-1", "plan-a"),
                RouteInputs::new("inst-9").accepts_incomplete(true),
                &Deadline::new_ms(1_000),
            )
            .await;
        let resp = result.unwrap();
        assert!(resp.is_async);
        assert_eq!(resp.operation.as_deref(), Some("op-inst-9"));
        assert_eq!(
            stages,
            vec![
                Stage::Received,
                Stage::ContextResolved,
                Stage::Validated,
                Stage::Enriched,
                Stage::Dispatched
            ]
        );
        assert_eq!(updater.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejection_never_dispatches() {
        let updater = Arc::new(CountingUpdater::default());
        let p = pipeline(updater.clone());
        let (result, stages) = p
            .run_traced(
                UpdateServiceInstanceRequest::new("", "plan-a"),
                RouteInputs::new("inst-9"),
                &Deadline::new_ms(1_000),
            )
            .await;
        match result {
            Err(PipelineError::Rejected(errors)) => {
                assert_eq!(errors[0].error_kind, ErrorKind::MissingRequiredField)
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert_eq!(stages.last(), Some(&Stage::Rejected));
        assert!(!stages.contains(&Stage::Enriched));
        assert_eq!(updater.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn catalog_failure_propagates_as_its_own_kind() {
        let updater = Arc::new(CountingUpdater::default());
        let p = UpdatePipeline::new(Arc::new(FailingCatalog), updater.clone());
        let err = p
            .run(
                UpdateServiceInstanceRequest::new("svc-1", "plan-a"),
                RouteInputs::new("inst-9"),
                &Deadline::new_ms(1_000),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::CatalogUnavailable(CatalogError::Status(503))
        ));
        assert_eq!(updater.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn prepare_stops_before_dispatch() {
        let updater = Arc::new(CountingUpdater::default());
        let p = pipeline(updater.clone());
        let enriched = p
            .prepare(
                UpdateServiceInstanceRequest::new("svc-1", "plan-b"),
                RouteInputs::new("inst-1"),
                &Deadline::new_ms(1_000),
            )
            .await
            .unwrap();
        assert_eq!(enriched.plan_id, "plan-b");
        assert_eq!(enriched.service_instance_id, "inst-1");
        assert!(!enriched.async_accepted);
        assert_eq!(updater.calls.load(Ordering::SeqCst), 0);
    }
}
