//! # causeway-service
//!
//! The bridge server between a parallel query engine and external data
//! systems. Engine segments describe each request entirely in `X-CW-*`
//! headers; the server parses them, resolves the profile to a plugin
//! triple, and streams records in either direction over stateless HTTP.
//!
//! [`CausewayServer`] assembles the whole process. Embedders register
//! their own connectors and keep the rest:
//!
//! ```no_run
//! use causeway_service::CausewayServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     CausewayServer::new()
//!         .with_config("config/causeway.yaml")
//!         .run()
//!         .await
//! }
//! ```

pub mod admission;
pub mod alignment;
pub mod bridge;
pub mod cache;
pub mod config;
pub mod handlers;
pub mod http;
pub mod metrics;
pub mod parser;
pub mod plugins;
pub mod security;
pub mod server;

pub use crate::config::AppConfig;
pub use crate::http::AppState;
pub use crate::security::{AllowAll, SecurityService};
pub use crate::server::{app_router, CausewayServer};
