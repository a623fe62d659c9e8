//! Provisioning backend seam.
//!
//! The pipeline hands every accepted update to an [`InstanceUpdater`] and
//! returns whatever it reports. The broker's actual provisioning logic lives
//! behind this trait.

use thiserror::Error;

use crate::model::{EnrichedUpdateRequest, UpdateServiceInstanceResponse};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("service instance {0} does not exist")]
    InstanceDoesNotExist(String),
    #[error("service instance update not supported: {0}")]
    UpdateNotSupported(String),
    #[error("service instance update failed: {0}")]
    Failed(String),
}

impl DispatchError {
    pub fn http_status(&self) -> u16 {
        match self {
            DispatchError::InstanceDoesNotExist(_) | DispatchError::UpdateNotSupported(_) => 422,
            DispatchError::Failed(_) => 500,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            DispatchError::InstanceDoesNotExist(_) => "InstanceDoesNotExist",
            DispatchError::UpdateNotSupported(_) => "UpdateNotSupported",
            DispatchError::Failed(_) => "UpdateFailed",
        }
    }
}

/// Receives enriched update requests.
#[async_trait::async_trait]
pub trait InstanceUpdater: Send + Sync {
    fn name(&self) -> &str;
    async fn update(
        &self,
        req: EnrichedUpdateRequest,
    ) -> Result<UpdateServiceInstanceResponse, DispatchError>;
}

/// Default backend for the standalone binary: logs the update and
/// acknowledges it. When `async_updates` is set and the platform accepts
/// incomplete operations, the response is asynchronous with an operation
/// token derived from the instance id.
#[derive(Debug, Clone)]
pub struct AcknowledgingUpdater {
    pub async_updates: bool,
}

impl Default for AcknowledgingUpdater {
    fn default() -> Self {
        Self {
            async_updates: true,
        }
    }
}

#[async_trait::async_trait]
impl InstanceUpdater for AcknowledgingUpdater {
    fn name(&self) -> &str {
        "acknowledging"
    }

    async fn update(
        &self,
        req: EnrichedUpdateRequest,
    ) -> Result<UpdateServiceInstanceResponse, DispatchError> {
        let is_async = self.async_updates && req.async_accepted;
        tracing::info!(
            instance_id = %req.service_instance_id,
            service_id = %req.service_definition_id,
            service_name = %req.service_definition.name,
            plan_id = %req.plan_id,
            is_async,
            "service instance update acknowledged"
        );
        Ok(UpdateServiceInstanceResponse {
            is_async,
            operation: is_async.then(|| format!("update-{}", req.service_instance_id)),
            dashboard_url: None,
        })
    }
}
