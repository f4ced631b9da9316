//! Per-request plugin instantiation.
//!
//! Plugins come out of the registry unbound; everything here binds the
//! shared request context and runs `initialize` exactly once before the
//! plugin is handed to a bridge or fragment enumeration.

use std::sync::Arc;

use causeway_api::{Accessor, Fragmenter, PluginRegistry, RequestContext, Resolver};
use causeway_error::{CausewayError, ErrorCode, ErrorContext, Result};

/// Instantiate, bind and initialize the fragmenter named by the request.
pub fn fragmenter_for(
    registry: &PluginRegistry,
    context: &Arc<RequestContext>,
) -> Result<Box<dyn Fragmenter>> {
    let identifier = context.fragmenter.as_deref().ok_or_else(|| {
        CausewayError::new(
            ErrorCode::MissingProperty,
            "Property FRAGMENTER has no value in the current request",
        )
        .with_context(ErrorContext::MissingProperty {
            property: "FRAGMENTER".to_string(),
        })
    })?;

    let mut fragmenter = registry.fragmenter(identifier)?;
    fragmenter.bind(Arc::clone(context));
    fragmenter.initialize()?;
    tracing::debug!(target: "plugins", %identifier, "fragmenter ready");
    Ok(fragmenter)
}

/// Instantiate, bind and initialize the accessor/resolver pair for a
/// read or write bridge.
pub fn bridge_plugins_for(
    registry: &PluginRegistry,
    context: &Arc<RequestContext>,
) -> Result<(Box<dyn Accessor>, Box<dyn Resolver>)> {
    let mut accessor = registry.accessor(&context.accessor)?;
    accessor.bind(Arc::clone(context));
    accessor.initialize()?;

    let mut resolver = registry.resolver(&context.resolver)?;
    resolver.bind(Arc::clone(context));
    resolver.initialize()?;

    tracing::debug!(
        target: "plugins",
        accessor = %context.accessor,
        resolver = %context.resolver,
        "bridge plugins ready"
    );
    Ok((accessor, resolver))
}
