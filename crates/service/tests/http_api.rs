//! End-to-end tests over the full router: raw engine headers in, demo
//! connector underneath, wire bytes out. No network involved.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use causeway_api::demo::DemoFragmentMetadata;
use causeway_api::{
    default_registry, BasePlugin, Fragment, Fragmenter, MetadataCodec, Plugin, PluginRegistry,
    RequestContext,
};
use causeway_error::{CausewayError, ErrorCode};
use causeway_service::handlers::HandlerRegistry;
use causeway_service::{app_router, AllowAll, AppConfig, AppState, SecurityService};
use serde_json::Value;
use tower::ServiceExt;

/// Header set a segment sends for the built-in demo profile. Tests layer
/// their own headers on top or drop entries as needed.
fn demo_headers() -> Vec<(String, String)> {
    [
        ("x-cw-alignment", "8"),
        ("x-cw-segment-id", "0"),
        ("x-cw-segment-count", "2"),
        ("x-cw-xid", "tx:1001"),
        ("x-cw-format", "TEXT"),
        ("x-cw-url-host", "localhost"),
        ("x-cw-url-port", "5432"),
        ("x-cw-data-dir", "/data/demo"),
        ("x-cw-has-filter", "0"),
        ("x-cw-attrs", "1"),
        ("x-cw-attr-name0", "line"),
        ("x-cw-attr-typecode0", "25"),
        ("x-cw-attr-typename0", "text"),
        ("x-cw-user", "alex"),
        ("x-cw-options-profile", "demo"),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), value.to_string()))
    .collect()
}

fn set(mut headers: Vec<(String, String)>, name: &str, value: &str) -> Vec<(String, String)> {
    headers.retain(|(existing, _)| existing != name);
    headers.push((name.to_string(), value.to_string()));
    headers
}

fn without(mut headers: Vec<(String, String)>, name: &str) -> Vec<(String, String)> {
    headers.retain(|(existing, _)| existing != name);
    headers
}

fn request(method: &str, uri: &str, headers: &[(String, String)], body: Body) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    builder.body(body).unwrap()
}

fn state_with(
    config: AppConfig,
    registry: PluginRegistry,
    security: Arc<dyn SecurityService>,
) -> Arc<AppState> {
    Arc::new(AppState::new(
        &config,
        registry,
        HandlerRegistry::new(),
        MetadataCodec::with_defaults(),
        security,
    ))
}

fn demo_router() -> Router {
    app_router(state_with(
        AppConfig::default(),
        default_registry(),
        Arc::new(AllowAll),
    ))
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn text_body(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_fragments_enumerates_the_demo_source() {
    let response = demo_router()
        .oneshot(request(
            "GET",
            "/api/v1/fragments",
            &demo_headers(),
            Body::empty(),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "application/json"
    );

    let body = json_body(response).await;
    let fragments = body["fragments"].as_array().unwrap();
    assert_eq!(fragments.len(), 3);

    assert_eq!(fragments[0]["sourceName"], "/data/demo");
    assert_eq!(fragments[0]["index"], 0);
    assert_eq!(fragments[0]["replicas"][0], "localhost");
    assert_eq!(fragments[0]["metadata"]["kind"], "demo");
    assert_eq!(fragments[0]["metadata"]["path"], "/data/demo#0");
    assert_eq!(fragments[2]["metadata"]["path"], "/data/demo#2");
}

#[tokio::test]
async fn test_read_streams_the_assigned_fragment() {
    let headers = set(
        set(demo_headers(), "x-cw-fragment-index", "0"),
        "x-cw-fragment-metadata",
        r#"{"kind":"demo","path":"/data/demo#0"}"#,
    );

    let response = demo_router()
        .oneshot(request("GET", "/api/v1/read", &headers, Body::empty()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "application/octet-stream"
    );
    assert_eq!(
        text_body(response).await,
        "row0 of /data/demo#0\nrow1 of /data/demo#0\n"
    );
}

#[tokio::test]
async fn test_read_row_count_follows_the_request_option() {
    let headers = set(demo_headers(), "x-cw-options-rows-per-fragment", "4");

    let response = demo_router()
        .oneshot(request("GET", "/api/v1/read", &headers, Body::empty()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    // no fragment metadata: the demo accessor reads the source itself
    let body = text_body(response).await;
    assert_eq!(body.lines().count(), 4);
    assert!(body.starts_with("row0 of /data/demo\n"));
}

#[tokio::test]
async fn test_write_counts_ingested_records() {
    let response = demo_router()
        .oneshot(request(
            "POST",
            "/api/v1/write",
            &demo_headers(),
            Body::from("alpha\nbeta\ngamma\n"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(text_body(response).await, "wrote 3 records to /data/demo");
}

#[tokio::test]
async fn test_write_response_masks_the_target_path() {
    let headers = set(demo_headers(), "x-cw-data-dir", "/data/two words");

    let response = demo_router()
        .oneshot(request(
            "POST",
            "/api/v1/write",
            &headers,
            Body::from("only\n"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(text_body(response).await, "wrote 1 records to /data/two.words");
}

#[tokio::test]
async fn test_missing_user_is_a_bad_request() {
    let headers = without(demo_headers(), "x-cw-user");

    let response = demo_router()
        .oneshot(request("GET", "/api/v1/read", &headers, Body::empty()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["code"], "CWAY-1001");
    assert_eq!(
        body["message"],
        "Property USER has no value in the current request"
    );
}

#[tokio::test]
async fn test_unknown_accessor_reports_the_closest_name() {
    let headers = without(demo_headers(), "x-cw-options-profile");
    let headers = set(headers, "x-cw-options-fragmenter", "DemoFragmenter");
    let headers = set(headers, "x-cw-options-accessor", "DemoAcessor");
    let headers = set(headers, "x-cw-options-resolver", "DemoTextResolver");

    let response = demo_router()
        .oneshot(request("GET", "/api/v1/read", &headers, Body::empty()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["code"], "CWAY-2001");
    assert_eq!(
        body["message"],
        "no accessor registered under name 'DemoAcessor'"
    );
    assert_eq!(body["hint"], "Did you mean 'DemoAccessor'?");
}

#[tokio::test]
async fn test_explicit_plugin_collides_with_the_profile() {
    let headers = set(demo_headers(), "x-cw-options-accessor", "DemoAccessor");

    let response = demo_router()
        .oneshot(request(
            "GET",
            "/api/v1/fragments",
            &headers,
            Body::empty(),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["code"], "CWAY-1002");
    assert_eq!(body["message"], "Profile 'demo' already defines: [accessor]");
}

#[tokio::test]
async fn test_saturated_pool_turns_requests_away() {
    let mut config = AppConfig::default();
    config.worker_pool.max_size = 1;
    config.worker_pool.queue_capacity = 0;
    let state = state_with(config, default_registry(), Arc::new(AllowAll));
    let router = app_router(Arc::clone(&state));

    // occupy the only slot for the duration of the request
    let _held = state.pool().acquire().await.unwrap();

    let response = router
        .oneshot(request(
            "GET",
            "/api/v1/fragments",
            &demo_headers(),
            Body::empty(),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert_eq!(body["code"], "CWAY-4001");
    assert_eq!(body["message"], "Causeway server processing capacity exceeded.");
    let hint = body["hint"].as_str().unwrap();
    assert!(hint.contains("worker_pool.max_size (currently 1)"));
    assert!(hint.contains("worker_pool.queue_capacity (currently 0)"));
}

struct DenyEveryone;

#[async_trait]
impl SecurityService for DenyEveryone {
    async fn authorize(&self, context: &RequestContext) -> causeway_error::Result<()> {
        Err(CausewayError::new(
            ErrorCode::InvalidRequest,
            format!(
                "user '{}' may not access '{}'",
                context.user, context.data_source
            ),
        ))
    }
}

#[tokio::test]
async fn test_denied_request_never_reaches_the_plugins() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = counting_registry(Arc::clone(&calls));
    let state = state_with(AppConfig::default(), registry, Arc::new(DenyEveryone));
    let headers = counting_headers();

    let response = app_router(state)
        .oneshot(request("GET", "/api/v1/fragments", &headers, Body::empty()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["code"], "CWAY-1005");
    assert_eq!(body["message"], "user 'alex' may not access '/data/demo'");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

/// Fragmenter that records how many times its enumeration actually ran.
struct CountingFragmenter {
    base: BasePlugin,
    calls: Arc<AtomicUsize>,
}

impl Plugin for CountingFragmenter {
    fn bind(&mut self, context: Arc<RequestContext>) {
        self.base.bind(context);
    }

    fn initialize(&mut self) -> causeway_error::Result<()> {
        self.base.initialize()
    }

    fn is_initialized(&self) -> bool {
        self.base.is_initialized()
    }
}

#[async_trait]
impl Fragmenter for CountingFragmenter {
    async fn fragments(&mut self) -> causeway_error::Result<Vec<Fragment>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let context = self.base.context()?;
        Ok(vec![Fragment::new(
            context.data_source.clone(),
            Box::new(DemoFragmentMetadata {
                path: format!("{}#0", context.data_source),
            }),
        )])
    }
}

fn counting_registry(calls: Arc<AtomicUsize>) -> PluginRegistry {
    let mut registry = default_registry();
    registry.register_fragmenter("CountingFragmenter", move || {
        Box::new(CountingFragmenter {
            base: BasePlugin::default(),
            calls: Arc::clone(&calls),
        })
    });
    registry
}

/// Demo headers with plugins named explicitly instead of via the profile,
/// so the counting fragmenter takes the enumeration.
fn counting_headers() -> Vec<(String, String)> {
    let headers = without(demo_headers(), "x-cw-options-profile");
    let headers = set(headers, "x-cw-options-fragmenter", "CountingFragmenter");
    let headers = set(headers, "x-cw-options-accessor", "DemoAccessor");
    set(headers, "x-cw-options-resolver", "DemoTextResolver")
}

#[tokio::test]
async fn test_segments_of_one_query_share_one_enumeration() {
    let calls = Arc::new(AtomicUsize::new(0));
    let state = state_with(
        AppConfig::default(),
        counting_registry(Arc::clone(&calls)),
        Arc::new(AllowAll),
    );
    let router = app_router(state);
    let headers = counting_headers();

    for segment in ["0", "1"] {
        let response = router
            .clone()
            .oneshot(request(
                "GET",
                "/api/v1/fragments",
                &set(headers.clone(), "x-cw-segment-id", segment),
                Body::empty(),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["fragments"].as_array().unwrap().len(), 1);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_different_transactions_enumerate_separately() {
    let calls = Arc::new(AtomicUsize::new(0));
    let state = state_with(
        AppConfig::default(),
        counting_registry(Arc::clone(&calls)),
        Arc::new(AllowAll),
    );
    let router = app_router(state);
    let headers = counting_headers();

    for xid in ["tx:2001", "tx:2002"] {
        let response = router
            .clone()
            .oneshot(request(
                "GET",
                "/api/v1/fragments",
                &set(headers.clone(), "x-cw-xid", xid),
                Body::empty(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
