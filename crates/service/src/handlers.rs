//! Protocol handlers: per-profile hooks that re-route a parsed request.
//!
//! Some protocols pick their plugins dynamically, based on values only known
//! once the request is parsed (a data-source suffix, an option). A profile
//! names a handler id; after parsing, the handler gets the request and may
//! replace any of the three plugin identifiers before resolution happens.

use std::collections::HashMap;

use causeway_api::RequestContext;
use causeway_error::{CausewayError, ErrorCode, ErrorContext, Result};

/// Post-parse rerouting hook. Every method sees the fully parsed request;
/// returning `None` keeps the identifier the request arrived with.
pub trait ProtocolHandler: Send + Sync {
    fn fragmenter(&self, _context: &RequestContext) -> Option<String> {
        None
    }

    fn accessor(&self, _context: &RequestContext) -> Option<String> {
        None
    }

    fn resolver(&self, _context: &RequestContext) -> Option<String> {
        None
    }
}

type HandlerFactory = Box<dyn Fn() -> Result<Box<dyn ProtocolHandler>> + Send + Sync>;

/// Handler constructors keyed by the id profiles name them under.
///
/// Construction is fallible: a handler may need process state that is not
/// guaranteed to exist, and the failure has to surface on the request that
/// asked for it rather than at registration time.
#[derive(Default)]
pub struct HandlerRegistry {
    factories: HashMap<String, HandlerFactory>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, id: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<Box<dyn ProtocolHandler>> + Send + Sync + 'static,
    {
        self.factories.insert(id.into(), Box::new(factory));
    }

    /// Construct the handler registered under `id`. Unknown ids and factory
    /// failures both surface as handler-construction errors naming the id.
    pub fn construct(&self, id: &str) -> Result<Box<dyn ProtocolHandler>> {
        let factory = self.factories.get(id).ok_or_else(|| {
            self.construction_error(
                id,
                &format!("no protocol handler registered under name '{}'", id),
            )
        })?;
        factory().map_err(|e| self.construction_error(id, &e.message))
    }

    fn construction_error(&self, id: &str, cause: &str) -> CausewayError {
        let mut available: Vec<String> = self.factories.keys().cloned().collect();
        available.sort();
        CausewayError::new(
            ErrorCode::HandlerConstruction,
            format!("failed to construct protocol handler '{}': {}", id, cause),
        )
        .with_context(ErrorContext::Plugin {
            kind: "handler".to_string(),
            name: id.to_string(),
            available,
        })
    }
}
