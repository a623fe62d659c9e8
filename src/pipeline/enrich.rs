use super::validate::ValidatedRequest;
use crate::model::{EnrichedUpdateRequest, RouteInputs};

/// Attach route, query and header derived fields to a validated request.
///
/// The instance id always comes from `route`; the wire body has no such
/// field and `parameters` is never consulted for it.
pub fn enrich(validated: ValidatedRequest, route: RouteInputs) -> EnrichedUpdateRequest {
    let RouteInputs {
        service_instance_id,
        async_accepted,
        api_info_location,
        platform_instance_id,
        originating_identity,
    } = route;
    EnrichedUpdateRequest {
        service_definition_id: validated.service_definition_id,
        plan_id: validated.plan_id,
        parameters: validated.parameters,
        previous_values: validated.previous_values,
        context: validated.context,
        service_instance_id,
        service_definition: validated.service_definition,
        async_accepted,
        api_info_location,
        platform_instance_id,
        originating_identity,
    }
}
