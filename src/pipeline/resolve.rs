use crate::model::RequestContext;

/// Normalize the platform context attached to a request.
///
/// An absent context becomes the all-unset value; a present one is passed
/// through unchanged. Nothing is invented and empty strings are preserved.
pub fn resolve_context(raw: Option<&RequestContext>, instance_id: &str) -> RequestContext {
    match raw {
        Some(ctx) => {
            tracing::trace!(
                instance_id,
                platform = ?ctx.platform,
                organization_guid = ?ctx.organization_guid,
                space_guid = ?ctx.space_guid,
                "context supplied by platform"
            );
            ctx.clone()
        }
        None => {
            tracing::trace!(instance_id, "no context supplied, using unset context");
            RequestContext::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_context_becomes_all_unset() {
        let ctx = resolve_context(None, "inst-1");
        assert_eq!(ctx, RequestContext::default());
        assert!(ctx.is_unset());
    }

    #[test]
    fn present_fields_pass_through_unchanged() {
        let raw = RequestContext {
            platform: Some("cloudfoundry".into()),
            organization_guid: Some(String::new()),
            space_guid: None,
        };
        let ctx = resolve_context(Some(&raw), "inst-1");
        assert_eq!(ctx, raw);
        assert_eq!(ctx.organization_guid.as_deref(), Some(""));
        assert!(ctx.space_guid.is_none());
    }

    #[test]
    fn resolving_twice_is_idempotent() {
        let raw = RequestContext::new("kubernetes", "org-1", "space-1");
        let once = resolve_context(Some(&raw), "inst-1");
        let twice = resolve_context(Some(&once), "inst-1");
        assert_eq!(once, twice);
        assert_eq!(resolve_context(None, "x"), resolve_context(None, "x"));
    }
}
