//! Required-field and catalog consistency checks.
//!
//! Every independent rule runs and all violations are reported together.
//! The only dependency between rules is plan membership, which needs a
//! resolved service definition.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::catalog::{CatalogError, CatalogLookup, ServiceDefinition};
use crate::model::{PreviousValues, RequestContext, UpdateServiceInstanceRequest};
use crate::util::Deadline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    MissingRequiredField,
    UnknownServiceDefinition,
    UnknownPlan,
    InvalidPreviousValue,
    /// Only ever propagated from the catalog, never produced by a rule.
    CatalogUnavailable,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MissingRequiredField => "MissingRequiredField",
            ErrorKind::UnknownServiceDefinition => "UnknownServiceDefinition",
            ErrorKind::UnknownPlan => "UnknownPlan",
            ErrorKind::InvalidPreviousValue => "InvalidPreviousValue",
            ErrorKind::CatalogUnavailable => "CatalogUnavailable",
        }
    }
}

/// One violation, addressed by its wire field name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    pub field: String,
    pub error_kind: ErrorKind,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &str, error_kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            error_kind,
            message: message.into(),
        }
    }

    fn missing(field: &str) -> Self {
        Self::new(
            field,
            ErrorKind::MissingRequiredField,
            format!("{} is required and cannot be empty", field),
        )
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.field, self.error_kind.as_str(), self.message)
    }
}

#[derive(Debug, Error)]
pub enum ValidationFailure {
    #[error("request rejected with {} violation(s)", .0.len())]
    Invalid(Vec<ValidationError>),
    #[error(transparent)]
    CatalogUnavailable(#[from] CatalogError),
}

/// A request that passed every rule. Only [`validate`] builds one.
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    pub(super) service_definition_id: String,
    pub(super) plan_id: String,
    pub(super) parameters: Option<serde_json::Map<String, serde_json::Value>>,
    pub(super) previous_values: Option<PreviousValues>,
    pub(super) context: RequestContext,
    pub(super) service_definition: Arc<ServiceDefinition>,
}

impl ValidatedRequest {
    pub fn service_definition_id(&self) -> &str {
        &self.service_definition_id
    }

    pub fn plan_id(&self) -> &str {
        &self.plan_id
    }

    pub fn service_definition(&self) -> &Arc<ServiceDefinition> {
        &self.service_definition
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.is_empty())
}

async fn lookup(
    catalog: &dyn CatalogLookup,
    id: &str,
    deadline: &Deadline,
) -> Result<Option<Arc<ServiceDefinition>>, CatalogError> {
    match deadline.bound(catalog.service_definition(id)).await {
        Some(result) => result,
        None => {
            tracing::warn!(
                catalog = catalog.name(),
                budget_ms = deadline.budget_ms(),
                "catalog lookup exceeded deadline"
            );
            Err(CatalogError::Timeout(deadline.budget_ms()))
        }
    }
}

/// Check `request` against the required-field rules and `catalog`.
///
/// The catalog is consulted only when `service_id` is non-empty. A catalog
/// failure is returned as [`ValidationFailure::CatalogUnavailable`] and is
/// never folded into the violation list.
pub async fn validate(
    request: UpdateServiceInstanceRequest,
    context: RequestContext,
    catalog: &dyn CatalogLookup,
    deadline: &Deadline,
) -> Result<ValidatedRequest, ValidationFailure> {
    let mut errors = Vec::new();

    let service_id = non_empty(request.service_definition_id.as_deref());
    let plan_id = non_empty(request.plan_id.as_deref());

    if service_id.is_none() {
        errors.push(ValidationError::missing("service_id"));
    }
    if plan_id.is_none() {
        errors.push(ValidationError::missing("plan_id"));
    }

    let mut resolved = None;
    if let Some(id) = service_id {
        match lookup(catalog, id, deadline).await? {
            Some(def) => {
                if let Some(plan) = plan_id {
                    if def.plan(plan).is_none() {
                        errors.push(ValidationError::new(
                            "plan_id",
                            ErrorKind::UnknownPlan,
                            format!("plan '{}' is not offered by service '{}'", plan, id),
                        ));
                    }
                }
                resolved = Some(def);
            }
            None => errors.push(ValidationError::new(
                "service_id",
                ErrorKind::UnknownServiceDefinition,
                format!("service '{}' is not in the broker catalog", id),
            )),
        }
    }

    if let Some(prev) = &request.previous_values {
        if non_empty(prev.plan_id.as_deref()).is_none() {
            errors.push(ValidationError::new(
                "previous_values.plan_id",
                ErrorKind::InvalidPreviousValue,
                "previous_values.plan_id is required when previous_values is present",
            ));
        }
    }

    match (resolved, service_id, plan_id) {
        (Some(service_definition), Some(sid), Some(pid)) if errors.is_empty() => {
            let service_definition_id = sid.to_string();
            let plan_id = pid.to_string();
            Ok(ValidatedRequest {
                service_definition_id,
                plan_id,
                parameters: request.parameters,
                previous_values: request.previous_values,
                context,
                service_definition,
            })
        }
        _ => Err(ValidationFailure::Invalid(errors)),
    }
}
