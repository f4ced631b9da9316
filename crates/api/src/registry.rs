//! Plugin factory registry.
//!
//! Identifiers arriving on a request resolve to implementations through an
//! explicit lookup table populated at startup, one factory per plugin kind
//! and short name. Dotted identifiers are reduced to their trailing
//! component first, so `com.example.DemoAccessor` and `DemoAccessor` both
//! hit the same entry.
//!
//! # Adding a connector
//!
//! 1. Implement `Fragmenter`, `Accessor` and `Resolver` for the source.
//! 2. Register factories for them, either on a fresh registry or on top of
//!    [`default_registry`].
//! 3. Reference the registered names from a profile or directly in the
//!    request options.

use std::collections::HashMap;

use causeway_error::{find_closest_match, CausewayError, ErrorCode, ErrorContext, Result};

use crate::demo::{DemoAccessor, DemoFragmenter, DemoTextResolver};
use crate::plugin::{Accessor, Fragmenter, Resolver};
use crate::utilities::short_name;

type FragmenterFactory = Box<dyn Fn() -> Box<dyn Fragmenter> + Send + Sync>;
type AccessorFactory = Box<dyn Fn() -> Box<dyn Accessor> + Send + Sync>;
type ResolverFactory = Box<dyn Fn() -> Box<dyn Resolver> + Send + Sync>;

#[derive(Default)]
pub struct PluginRegistry {
    fragmenters: HashMap<String, FragmenterFactory>,
    accessors: HashMap<String, AccessorFactory>,
    resolvers: HashMap<String, ResolverFactory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_fragmenter<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Fragmenter> + Send + Sync + 'static,
    {
        self.fragmenters.insert(name.into(), Box::new(factory));
    }

    pub fn register_accessor<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Accessor> + Send + Sync + 'static,
    {
        self.accessors.insert(name.into(), Box::new(factory));
    }

    pub fn register_resolver<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Resolver> + Send + Sync + 'static,
    {
        self.resolvers.insert(name.into(), Box::new(factory));
    }

    /// Instantiate the fragmenter registered under `identifier`.
    pub fn fragmenter(&self, identifier: &str) -> Result<Box<dyn Fragmenter>> {
        let name = short_name(identifier);
        match self.fragmenters.get(name) {
            Some(factory) => Ok(factory()),
            None => Err(self.not_found("fragmenter", name, self.fragmenters.keys())),
        }
    }

    /// Instantiate the accessor registered under `identifier`.
    pub fn accessor(&self, identifier: &str) -> Result<Box<dyn Accessor>> {
        let name = short_name(identifier);
        match self.accessors.get(name) {
            Some(factory) => Ok(factory()),
            None => Err(self.not_found("accessor", name, self.accessors.keys())),
        }
    }

    /// Instantiate the resolver registered under `identifier`.
    pub fn resolver(&self, identifier: &str) -> Result<Box<dyn Resolver>> {
        let name = short_name(identifier);
        match self.resolvers.get(name) {
            Some(factory) => Ok(factory()),
            None => Err(self.not_found("resolver", name, self.resolvers.keys())),
        }
    }

    fn not_found<'a>(
        &self,
        kind: &str,
        name: &str,
        registered: impl Iterator<Item = &'a String>,
    ) -> CausewayError {
        let mut available: Vec<String> = registered.cloned().collect();
        available.sort();

        let mut error = CausewayError::new(
            ErrorCode::UnknownPlugin,
            format!("no {} registered under name '{}'", kind, name),
        )
        .with_context(ErrorContext::Plugin {
            kind: kind.to_string(),
            name: name.to_string(),
            available: available.clone(),
        });

        error = match find_closest_match(name, &available) {
            Some(closest) => error.with_hint(format!("Did you mean '{}'?", closest)),
            None => error.with_hint(
                "Register the plugin at startup or check the profile definition",
            ),
        };
        error
    }
}

/// Registry with the built-in demo connector registered.
pub fn default_registry() -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    registry.register_fragmenter("DemoFragmenter", || Box::new(DemoFragmenter::default()));
    registry.register_accessor("DemoAccessor", || Box::new(DemoAccessor::default()));
    registry.register_resolver("DemoTextResolver", || Box::new(DemoTextResolver::default()));
    registry
}
