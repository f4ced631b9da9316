//! Data-plane HTTP endpoints.
//!
//! Three endpoints carry the whole protocol: fragment enumeration, record
//! streaming out (read) and record ingestion (write). Each request is
//! parsed, authorized and admitted before any plugin is constructed.
//! Failures render as a JSON body `{code, message, hint}` with the status
//! the error code maps to.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use causeway_api::io::RecordBuffer;
use causeway_api::utilities::mask_non_printables;
use causeway_api::{MetadataCodec, PluginRegistry, RequestType};
use causeway_error::{CausewayError, ErrorCode, Result};
use futures::TryStreamExt;
use serde_json::json;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tokio_stream::wrappers::ReceiverStream;

use crate::admission::WorkerPool;
use crate::bridge::{self, Bridge};
use crate::cache::FragmentCache;
use crate::config::{AppConfig, ProfileCatalog};
use crate::handlers::HandlerRegistry;
use crate::metrics;
use crate::parser::RequestParser;
use crate::plugins;
use crate::security::SecurityService;

/// Records buffered between the bridge task and the response body before
/// backpressure reaches the accessor.
const STREAM_BUFFER_RECORDS: usize = 32;

/// Everything the data endpoints share. Built once at startup.
pub struct AppState {
    parser: RequestParser,
    registry: PluginRegistry,
    cache: FragmentCache,
    pool: WorkerPool,
    security: Arc<dyn SecurityService>,
    /// Serializes streaming of effective-thread-unsafe bridges. `None`
    /// when disabled in configuration.
    gate: Option<Arc<Mutex<()>>>,
}

impl AppState {
    pub fn new(
        config: &AppConfig,
        registry: PluginRegistry,
        handlers: HandlerRegistry,
        codec: MetadataCodec,
        security: Arc<dyn SecurityService>,
    ) -> Self {
        let catalog: Arc<ProfileCatalog> = Arc::new(ProfileCatalog::from_config(config));
        Self {
            parser: RequestParser::new(catalog, Arc::new(handlers), Arc::new(codec)),
            registry,
            cache: FragmentCache::new(
                config.cache.enabled,
                Duration::from_secs(config.cache.expiry_secs),
            ),
            pool: WorkerPool::from_config(&config.worker_pool),
            security,
            gate: config
                .server
                .gate_enabled
                .then(|| Arc::new(Mutex::new(()))),
        }
    }

    pub fn parser(&self) -> &RequestParser {
        &self.parser
    }

    pub fn cache(&self) -> &FragmentCache {
        &self.cache
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }
}

/// Data-plane routes, mounted by the server under `/api/v1`.
pub fn api_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/fragments", get(fragments_handler))
        .route("/read", get(read_handler))
        .route("/write", post(write_handler))
        .with_state(state)
}

async fn fragments_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    metrics::FRAGMENTS_REQUESTS.inc();
    serve_fragments(&state, &headers)
        .await
        .unwrap_or_else(error_response)
}

async fn read_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    metrics::READ_REQUESTS.inc();
    serve_read(&state, &headers)
        .await
        .unwrap_or_else(error_response)
}

async fn write_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    metrics::WRITE_REQUESTS.inc();
    serve_write(&state, &headers, body)
        .await
        .unwrap_or_else(error_response)
}

async fn serve_fragments(state: &AppState, headers: &HeaderMap) -> Result<Response> {
    let context = state.parser.parse(headers, RequestType::Enumerate)?;
    state.security.authorize(&context).await?;
    let _slot = admit(state).await?;

    let context = context.into_shared();
    let key = FragmentCache::key(&context);
    let started = Instant::now();
    let fragments = state
        .cache
        .get_or_enumerate(&key, || async {
            let mut fragmenter = plugins::fragmenter_for(&state.registry, &context)?;
            fragmenter.fragments().await
        })
        .await?;

    tracing::info!(
        target: "http",
        fragments = fragments.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        source = %mask_non_printables(&context.data_source),
        "fragments enumerated"
    );
    Ok(Json(json!({ "fragments": &*fragments })).into_response())
}

async fn serve_read(state: &AppState, headers: &HeaderMap) -> Result<Response> {
    let context = state.parser.parse(headers, RequestType::Read)?;
    state.security.authorize(&context).await?;
    let slot = admit(state).await?;

    let context = context.into_shared();
    let (accessor, resolver) = plugins::bridge_plugins_for(&state.registry, &context)?;
    let mut bridge = bridge::new_bridge(Arc::clone(&context), accessor, resolver)?;
    let gate = acquire_gate(state, bridge.as_ref()).await;

    // opening the source in the handler keeps early failures on the
    // status line instead of a broken 200 stream
    match bridge.begin_iteration().await {
        Ok(true) => {}
        Ok(false) => {
            bridge.end_iteration().await?;
            tracing::debug!(
                target: "http",
                source = %mask_non_printables(&context.data_source),
                "source had nothing to read"
            );
            return Ok(octet_stream(Body::empty()));
        }
        Err(e) => {
            close_quietly(bridge.as_mut()).await;
            return Err(e);
        }
    }

    let (tx, rx) = mpsc::channel::<Result<Bytes>>(STREAM_BUFFER_RECORDS);
    let source = mask_non_printables(&context.data_source);
    tokio::spawn(async move {
        // slot and gate live until the stream is over
        let _slot = slot;
        let _gate = gate;
        let mut bridge = bridge;
        let started = Instant::now();
        let mut records = 0u64;

        let outcome = stream_records(bridge.as_mut(), &tx, &mut records).await;
        metrics::RECORDS_STREAMED.inc_by(records);
        match outcome {
            Ok(()) => {
                tracing::info!(
                    target: "http",
                    records,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    source = %source,
                    "read stream finished"
                );
            }
            Err(e) if e.is_benign() => {
                tracing::info!(
                    target: "http",
                    records,
                    source = %source,
                    "client left mid-stream, read aborted"
                );
            }
            Err(e) => {
                tracing::error!(
                    target: "http",
                    records,
                    source = %source,
                    error = %e,
                    "read stream failed"
                );
                let _ = tx.send(Err(e)).await;
            }
        }
    });

    Ok(octet_stream(Body::from_stream(ReceiverStream::new(rx))))
}

async fn serve_write(state: &AppState, headers: &HeaderMap, body: Body) -> Result<Response> {
    let context = state.parser.parse(headers, RequestType::Write)?;
    state.security.authorize(&context).await?;
    let _slot = admit(state).await?;

    let context = context.into_shared();
    let (accessor, resolver) = plugins::bridge_plugins_for(&state.registry, &context)?;
    let mut bridge = bridge::new_bridge(Arc::clone(&context), accessor, resolver)?;
    let _gate = acquire_gate(state, bridge.as_ref()).await;

    let started = Instant::now();
    let mut input = RecordBuffer::new(body.into_data_stream().map_err(std::io::Error::other));
    let mut records = 0u64;
    let outcome = ingest_records(bridge.as_mut(), &mut input, &mut records).await;
    settle(outcome, bridge.as_mut()).await?;

    metrics::RECORDS_WRITTEN.inc_by(records);
    let target = mask_non_printables(&context.data_source);
    tracing::info!(
        target: "http",
        records,
        elapsed_ms = started.elapsed().as_millis() as u64,
        source = %target,
        "write finished"
    );
    Ok((
        StatusCode::OK,
        format!("wrote {} records to {}", records, target),
    )
        .into_response())
}

/// Admission front door shared by the three data endpoints.
async fn admit(state: &AppState) -> Result<crate::admission::WorkerSlot> {
    state.pool.acquire().await.map_err(|cause| {
        metrics::REQUESTS_REJECTED.inc();
        tracing::warn!(target: "http", %cause, "request rejected at admission");
        state.pool.capacity_error()
    })
}

/// Take the process gate when the bridge is not thread safe and the gate
/// is configured. The owned guard can cross into the streaming task.
///
/// Not an `async fn`: `&dyn Bridge` is not `Send`, so it must be consumed
/// before the returned future, keeping the handler futures `Send`.
fn acquire_gate(
    state: &AppState,
    bridge: &dyn Bridge,
) -> impl std::future::Future<Output = Option<OwnedMutexGuard<()>>> {
    let gate = match &state.gate {
        Some(gate) if !bridge.is_thread_safe() => Some(Arc::clone(gate)),
        _ => None,
    };
    async move {
        match gate {
            Some(gate) => Some(gate.lock_owned().await),
            None => None,
        }
    }
}

/// Drive `get_next` into the channel until exhaustion, failure or client
/// disconnect, then close. The first error wins; a close failure after an
/// iteration failure is logged and dropped.
async fn stream_records(
    bridge: &mut dyn Bridge,
    tx: &mpsc::Sender<Result<Bytes>>,
    records: &mut u64,
) -> Result<()> {
    let outcome = loop {
        match bridge.get_next().await {
            Ok(Some(record)) => {
                if tx.send(Ok(record)).await.is_err() {
                    break Err(CausewayError::new(
                        ErrorCode::ClientDisconnect,
                        "client disconnected during response streaming",
                    ));
                }
                *records += 1;
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };
    settle(outcome, bridge).await
}

/// Consume the request body through `set_next` until clean exhaustion.
/// The caller settles the outcome against `end_iteration`.
async fn ingest_records(
    bridge: &mut dyn Bridge,
    input: &mut RecordBuffer,
    records: &mut u64,
) -> Result<()> {
    if !bridge.begin_iteration().await? {
        return Ok(());
    }
    while bridge.set_next(input).await? {
        *records += 1;
    }
    Ok(())
}

/// Merge an iteration outcome with the mandatory close.
async fn settle(outcome: Result<()>, bridge: &mut dyn Bridge) -> Result<()> {
    match (outcome, bridge.end_iteration().await) {
        (Ok(()), close) => close,
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close)) => {
            tracing::warn!(
                target: "http",
                error = %close,
                "close failed after an earlier request error"
            );
            Err(e)
        }
    }
}

async fn close_quietly(bridge: &mut dyn Bridge) {
    if let Err(close) = bridge.end_iteration().await {
        tracing::warn!(target: "http", error = %close, "close failed after request error");
    }
}

fn octet_stream(body: Body) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        body,
    )
        .into_response()
}

/// Render a failure as the engine-facing JSON body, logged at a severity
/// matching its nature.
fn error_response(err: CausewayError) -> Response {
    if err.is_benign() {
        tracing::info!(target: "http", code = %err.code, "request ended early: {}", err.message);
    } else {
        tracing::error!(target: "http", code = %err.code, detail = %err.to_json(), "request failed");
    }

    let status = StatusCode::from_u16(err.code.http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut body = json!({
        "code": err.code,
        "message": err.message,
    });
    if let Some(hint) = err.hint {
        body["hint"] = json!(hint);
    }
    (status, Json(body)).into_response()
}
