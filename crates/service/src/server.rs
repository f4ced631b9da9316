//! Server assembly: configuration, logging, routing, listening.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use causeway_api::{default_registry, MetadataCodec, PluginRegistry};
use serde_json::json;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::AppConfig;
use crate::handlers::HandlerRegistry;
use crate::http::{self, AppState};
use crate::metrics;
use crate::security::{AllowAll, SecurityService};

const DEFAULT_CONFIG_PATH: &str = "config/causeway.yaml";

/// Builder for the bridge server process.
///
/// The defaults run a complete server backed by the built-in demo
/// connector; embedders swap in their own plugin registry, protocol
/// handlers, metadata decoders and authorization.
pub struct CausewayServer {
    config_path: String,
    listen_addr: Option<String>,
    registry: PluginRegistry,
    handlers: HandlerRegistry,
    codec: MetadataCodec,
    security: Arc<dyn SecurityService>,
}

impl Default for CausewayServer {
    fn default() -> Self {
        Self {
            config_path: DEFAULT_CONFIG_PATH.to_string(),
            listen_addr: None,
            registry: default_registry(),
            handlers: HandlerRegistry::new(),
            codec: MetadataCodec::with_defaults(),
            security: Arc::new(AllowAll),
        }
    }
}

impl CausewayServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of the YAML configuration file. An absent file means defaults.
    pub fn with_config(mut self, path: impl Into<String>) -> Self {
        self.config_path = path.into();
        self
    }

    /// Override the configured listen address.
    pub fn with_listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = Some(addr.into());
        self
    }

    /// Replace the plugin registry (defaults to the built-in demo set).
    pub fn with_registry(mut self, registry: PluginRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_handler_registry(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn with_metadata_codec(mut self, codec: MetadataCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Replace the allow-all authorization hook.
    pub fn with_security_service(mut self, security: Arc<dyn SecurityService>) -> Self {
        self.security = security;
        self
    }

    /// Run the server until the process is stopped.
    pub async fn run(self) -> anyhow::Result<()> {
        let stdout_layer =
            tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
        tracing_subscriber::registry().with(stdout_layer).try_init().ok();

        let config = AppConfig::from_file(&self.config_path)?;
        let listen = self
            .listen_addr
            .clone()
            .unwrap_or_else(|| config.server.listen_addr.clone());
        let name = config.server.name.clone();

        let state = Arc::new(AppState::new(
            &config,
            self.registry,
            self.handlers,
            self.codec,
            self.security,
        ));
        let app = app_router(state);

        let addr: SocketAddr = listen
            .parse()
            .with_context(|| format!("invalid listen address '{}'", listen))?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind to {}", addr))?;
        info!("{} listening on {}", name, addr);

        axum::serve(listener, app).await.context("server error")?;
        Ok(())
    }
}

/// Full process router: management endpoints at the root, data endpoints
/// under `/api/v1`.
pub fn app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .nest("/api/v1", http::api_router(state))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn ready_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ready" }))
}

async fn metrics_handler() -> impl IntoResponse {
    let (format_type, buffer) = metrics::render();
    ([(header::CONTENT_TYPE, format_type)], buffer)
}
