//! Authorization hook between request parsing and plugin work.
//!
//! The engine already authenticated the end user; this seam decides whether
//! that user may touch the named data source. The default policy allows
//! everything, deployments swap in their own implementation through
//! [`crate::CausewayServer::with_security_service`].

use async_trait::async_trait;
use causeway_api::RequestContext;
use causeway_api::utilities::mask_non_printables;
use causeway_error::Result;

#[async_trait]
pub trait SecurityService: Send + Sync {
    /// Called once per request, after parsing and before any plugin is
    /// constructed. An error here fails the request with no side effects.
    async fn authorize(&self, context: &RequestContext) -> Result<()>;
}

/// Allow-everything policy.
#[derive(Debug, Default)]
pub struct AllowAll;

#[async_trait]
impl SecurityService for AllowAll {
    async fn authorize(&self, context: &RequestContext) -> Result<()> {
        tracing::debug!(
            target: "security",
            user = %context.user,
            source = %mask_non_printables(&context.data_source),
            "request authorized"
        );
        Ok(())
    }
}
