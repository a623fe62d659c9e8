//! Wire and server-side models for the "update service instance" call.
//!
//! The wire structs only carry what the platform sends in the request body.
//! Unknown fields are ignored and absent fields stay `None`; nothing here
//! rejects a payload. Required-field checks happen in
//! [`crate::pipeline::validate`].

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog::ServiceDefinition;

/// Platform-specific attributes attached to a request.
///
/// `None` means "not provided"; an empty string is kept as `Some("")` so
/// callers can tell the two apart.
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// The calling platform, e.g. `cloudfoundry` or `kubernetes`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    /// GUID of the organization the instance lives in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_guid: Option<String>,
    /// GUID of the space the instance lives in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_guid: Option<String>,
}

impl RequestContext {
    pub fn new(
        platform: impl Into<String>,
        organization_guid: impl Into<String>,
        space_guid: impl Into<String>,
    ) -> Self {
        Self {
            platform: Some(platform.into()),
            organization_guid: Some(organization_guid.into()),
            space_guid: Some(space_guid.into()),
        }
    }

    pub fn for_platform(platform: impl Into<String>) -> Self {
        Self {
            platform: Some(platform.into()),
            ..Self::default()
        }
    }

    /// True when no attribute was provided at all.
    pub fn is_unset(&self) -> bool {
        self.platform.is_none() && self.organization_guid.is_none() && self.space_guid.is_none()
    }
}

/// Snapshot of the instance before the update.
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq, Eq)]
pub struct PreviousValues {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
}

impl PreviousValues {
    pub fn new(plan_id: impl Into<String>) -> Self {
        Self {
            plan_id: Some(plan_id.into()),
        }
    }
}

/// Body of `PATCH /v2/service_instances/{instance_id}` as decoded from JSON.
///
/// Has no instance id field; the instance is identified by the route only.
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct UpdateServiceInstanceRequest {
    #[serde(
        default,
        rename = "service_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub service_definition_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_values: Option<PreviousValues>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<RequestContext>,
}

impl UpdateServiceInstanceRequest {
    pub fn new(service_definition_id: impl Into<String>, plan_id: impl Into<String>) -> Self {
        Self {
            service_definition_id: Some(service_definition_id.into()),
            plan_id: Some(plan_id.into()),
            ..Self::default()
        }
    }

    pub fn with_parameters(mut self, parameters: serde_json::Map<String, serde_json::Value>) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub fn with_previous_values(mut self, previous_values: PreviousValues) -> Self {
        self.previous_values = Some(previous_values);
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = Some(context);
        self
    }
}

/// Inputs taken from the route, query string and headers rather than the body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteInputs {
    pub service_instance_id: String,
    pub async_accepted: bool,
    pub api_info_location: Option<String>,
    pub platform_instance_id: Option<String>,
    pub originating_identity: Option<String>,
}

impl RouteInputs {
    pub fn new(service_instance_id: impl Into<String>) -> Self {
        Self {
            service_instance_id: service_instance_id.into(),
            ..Self::default()
        }
    }

    pub fn accepts_incomplete(mut self, accepted: bool) -> Self {
        self.async_accepted = accepted;
        self
    }
}

/// A validated request with every server-derived field attached. This is
/// what the provisioning backend receives.
#[derive(Clone, Serialize)]
pub struct EnrichedUpdateRequest {
    #[serde(rename = "service_id")]
    pub service_definition_id: String,
    pub plan_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_values: Option<PreviousValues>,
    pub context: RequestContext,
    #[serde(skip)]
    pub service_instance_id: String,
    #[serde(skip)]
    pub service_definition: Arc<ServiceDefinition>,
    #[serde(skip)]
    pub async_accepted: bool,
    #[serde(skip)]
    pub api_info_location: Option<String>,
    #[serde(skip)]
    pub platform_instance_id: Option<String>,
    #[serde(skip)]
    pub originating_identity: Option<String>,
}

// service_definition is excluded from equality and debug output.
impl PartialEq for EnrichedUpdateRequest {
    fn eq(&self, other: &Self) -> bool {
        self.service_definition_id == other.service_definition_id
            && self.plan_id == other.plan_id
            && self.parameters == other.parameters
            && self.previous_values == other.previous_values
            && self.context == other.context
            && self.service_instance_id == other.service_instance_id
            && self.async_accepted == other.async_accepted
            && self.api_info_location == other.api_info_location
            && self.platform_instance_id == other.platform_instance_id
            && self.originating_identity == other.originating_identity
    }
}

impl fmt::Debug for EnrichedUpdateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnrichedUpdateRequest")
            .field("service_definition_id", &self.service_definition_id)
            .field("plan_id", &self.plan_id)
            .field("parameters", &self.parameters)
            .field("previous_values", &self.previous_values)
            .field("context", &self.context)
            .field("service_instance_id", &self.service_instance_id)
            .field("async_accepted", &self.async_accepted)
            .field("api_info_location", &self.api_info_location)
            .field("platform_instance_id", &self.platform_instance_id)
            .field("originating_identity", &self.originating_identity)
            .finish()
    }
}

/// Result reported by the provisioning backend.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct UpdateServiceInstanceResponse {
    /// Whether the update continues in the background.
    #[serde(skip)]
    pub is_async: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard_url: Option<String>,
}
