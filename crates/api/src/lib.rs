//! # causeway-api
//!
//! The plugin contract for the Causeway external-data bridge.
//!
//! A storage connector supplies three cooperating plugins, each bound to a
//! single request and driven through a fixed lifecycle:
//!
//! | Plugin      | Role |
//! |-------------|------|
//! | `Fragmenter`| splits a data source into fragments, one per unit of parallel work |
//! | `Accessor`  | performs raw reads/writes against the data source for one fragment |
//! | `Resolver`  | converts between raw source records and wire-format fields |
//!
//! Connectors register factories for their plugins in a [`PluginRegistry`]
//! at startup; the service resolves request identifiers against it with a
//! short-name lookup. Fragment metadata round-trips through an open
//! [`MetadataCodec`] keyed by an embedded `kind` tag.

pub mod demo;
pub mod fragment;
pub mod io;
pub mod model;
pub mod plugin;
pub mod registry;
pub mod utilities;

pub use fragment::{Fragment, FragmentMetadata, MetadataCodec};
pub use model::{ColumnDescriptor, OutputFormat, RequestContext, RequestType};
pub use plugin::{Accessor, BasePlugin, Fragmenter, FragmentStats, Plugin, RawRecord, Resolver};
pub use registry::{default_registry, PluginRegistry};
