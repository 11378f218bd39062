use std::collections::BTreeSet;
use std::io;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::Extension;
use axum::http::{Request, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::{StreamExt, stream};
use tenantgate_core::{
    MemoryRegistry, RegistryError, RegistryResult, RegistryStore, SandboxClaim, SandboxId,
    SharedRegistry, TenantId, TenantRecord, UsageGate, UsageRecord, UsageSink, build_resolver,
};
use tenantgate_router::{NOT_FOUND_BODY, ResolvedTenant, TenantState, UsageReport, tenant_router};
use time::OffsetDateTime;
use tower::ServiceExt;

const BASE: &str = "basedomain.example";

#[derive(Default)]
struct CollectSink(Mutex<Vec<UsageRecord>>);

impl UsageSink for CollectSink {
    fn submit(&self, record: UsageRecord) {
        self.0.lock().unwrap().push(record);
    }
}

fn tenant(key: &str, custom_hosts: &[&str]) -> TenantRecord {
    let now = OffsetDateTime::now_utc();
    TenantRecord {
        tenant_id: TenantId::new_v4(),
        tenant_key: key.to_string(),
        primary_host: format!("{key}.{BASE}"),
        custom_hosts: custom_hosts.iter().map(|h| h.to_string()).collect::<BTreeSet<_>>(),
        sandbox_id: None,
        tier: "pro".to_string(),
        created_at: now,
        updated_at: now,
        deleted_at: None,
    }
}

async fn whoami(Extension(ResolvedTenant(tenant)): Extension<ResolvedTenant>) -> String {
    tenant.tenant_key
}

async fn complete() -> impl IntoResponse {
    (Extension(UsageReport::completed("llama-3-8b", 12, 34)), "ok")
}

async fn aborted() -> impl IntoResponse {
    let mut report = UsageReport::completed("llama-3-8b", 12, 0);
    report.complete = false;
    (Extension(report), "partial")
}

async fn timed_out() -> impl IntoResponse {
    (
        StatusCode::GATEWAY_TIMEOUT,
        Extension(UsageReport::completed("llama-3-8b", 12, 0)),
        "upstream timeout",
    )
}

async fn stream_then_error() -> impl IntoResponse {
    let chunks = stream::iter([
        Ok::<_, io::Error>("partial"),
        Err(io::Error::other("upstream reset")),
    ]);
    (
        Extension(UsageReport::completed("llama-3-8b", 12, 34)),
        Body::from_stream(chunks),
    )
}

async fn stream_complete() -> impl IntoResponse {
    let chunks = stream::iter([Ok::<_, io::Error>("first "), Ok("second")]);
    (
        Extension(UsageReport::completed("llama-3-8b", 12, 34)),
        Body::from_stream(chunks),
    )
}

async fn stream_stalls() -> impl IntoResponse {
    let chunks = stream::iter([Ok::<_, io::Error>("first")]).chain(stream::pending());
    (
        Extension(UsageReport::completed("llama-3-8b", 12, 34)),
        Body::from_stream(chunks),
    )
}

struct DownRegistry;

#[async_trait::async_trait]
impl RegistryStore for DownRegistry {
    async fn tenant_by_key(&self, _tenant_key: &str) -> RegistryResult<Option<TenantRecord>> {
        Err(RegistryError::Unavailable("connection refused".to_string()))
    }

    async fn tenant_by_custom_host(&self, _host: &str) -> RegistryResult<Option<TenantRecord>> {
        Err(RegistryError::Unavailable("connection refused".to_string()))
    }

    async fn sandbox_owner(&self, _sandbox_id: &SandboxId) -> RegistryResult<Option<TenantId>> {
        Err(RegistryError::Unavailable("connection refused".to_string()))
    }

    async fn put_sandbox_id_if_absent(
        &self,
        _tenant_id: &TenantId,
        _sandbox_id: &SandboxId,
    ) -> RegistryResult<SandboxClaim> {
        Err(RegistryError::Unavailable("connection refused".to_string()))
    }
}

fn build_app(dev_mode: bool) -> (Router, Arc<CollectSink>) {
    let registry = MemoryRegistry::from_records([
        tenant("acme", &[]),
        tenant("t-42", &["app.customclient.example"]),
    ])
    .unwrap();
    build_app_with(Arc::new(registry), dev_mode)
}

fn build_app_with(registry: SharedRegistry, dev_mode: bool) -> (Router, Arc<CollectSink>) {
    let resolver = build_resolver(registry, BASE, dev_mode).unwrap();
    let sink = Arc::new(CollectSink::default());
    let state = TenantState {
        resolver,
        usage: UsageGate::new(sink.clone()),
    };
    let inner = Router::new()
        .route("/whoami", get(whoami))
        .route("/complete", get(complete))
        .route("/aborted", get(aborted))
        .route("/timeout", get(timed_out))
        .route("/stream/error", get(stream_then_error))
        .route("/stream/complete", get(stream_complete))
        .route("/stream/stall", get(stream_stalls));
    (tenant_router(state, inner), sink)
}

fn request(host: &str, path: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header("host", host)
        .body(Body::empty())
        .unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn resolves_subdomain_and_custom_host() {
    let (app, _) = build_app(false);

    let response = app
        .clone()
        .oneshot(request("Acme.BaseDomain.example:443", "/whoami"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "acme");

    let response = app
        .oneshot(request("app.customclient.example", "/whoami"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "t-42");
}

#[tokio::test]
async fn unknown_and_malformed_hosts_share_one_body() {
    let (app, _) = build_app(false);
    for host in ["unknown.basedomain.example", "bad host", "a.b.basedomain.example"] {
        let response = app.clone().oneshot(request(host, "/whoami")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{host}");
        assert_eq!(body_string(response).await, NOT_FOUND_BODY, "{host}");
    }

    let missing = Request::builder().uri("/whoami").body(Body::empty()).unwrap();
    let response = app.oneshot(missing).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn override_header_needs_dev_mode() {
    let override_request = || {
        Request::builder()
            .uri("/whoami")
            .header("host", "acme.basedomain.example")
            .header("x-tenant-override", "t-42")
            .body(Body::empty())
            .unwrap()
    };

    let (app, _) = build_app(false);
    let response = app.oneshot(override_request()).await.unwrap();
    assert_eq!(body_string(response).await, "acme");

    let (app, _) = build_app(true);
    let response = app.oneshot(override_request()).await.unwrap();
    assert_eq!(body_string(response).await, "t-42");
}

#[tokio::test]
async fn tenant_endpoint_returns_flat_metadata() {
    let (app, _) = build_app(false);
    let response = app
        .oneshot(request("acme.basedomain.example", "/_tenant"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["tenant_key"], "acme");
    assert_eq!(body["tier"], "pro");
    let tenant_id = TenantId::parse(body["tenant_id"].as_str().unwrap()).unwrap();
    assert_eq!(
        body["sandbox_id"].as_str().unwrap(),
        SandboxId::derive(&tenant_id).as_str()
    );
}

#[tokio::test]
async fn registry_outage_looks_like_unknown_host() {
    let (known, _) = build_app(false);
    let unknown = known
        .oneshot(request("unknown.basedomain.example", "/whoami"))
        .await
        .unwrap();
    let unknown_status = unknown.status();
    let unknown_headers = unknown.headers().clone();
    let unknown_body = to_bytes(unknown.into_body(), usize::MAX).await.unwrap();

    let (down, _) = build_app_with(Arc::new(DownRegistry), false);
    for host in ["acme.basedomain.example", "app.customclient.example"] {
        let response = down.clone().oneshot(request(host, "/whoami")).await.unwrap();
        assert_eq!(response.status(), unknown_status, "{host}");
        assert_eq!(response.headers(), &unknown_headers, "{host}");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, unknown_body, "{host}");
    }
    assert_eq!(unknown_status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn only_complete_success_records_usage() {
    let (app, sink) = build_app(false);

    for path in ["/aborted", "/timeout", "/whoami"] {
        let response = app
            .clone()
            .oneshot(request("acme.basedomain.example", path))
            .await
            .unwrap();
        body_string(response).await;
    }
    assert!(sink.0.lock().unwrap().is_empty());

    let response = app
        .oneshot(request("acme.basedomain.example", "/complete"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.extensions().get::<UsageReport>().is_none());
    assert_eq!(body_string(response).await, "ok");

    let records = sink.0.lock().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].model_identifier, "llama-3-8b");
    assert_eq!(records[0].input_units, 12);
    assert_eq!(records[0].output_units, 34);
    assert!(records[0].sandbox_id.as_str().starts_with("sk-"));
}

#[tokio::test]
async fn stream_that_errors_midway_records_nothing() {
    let (app, sink) = build_app(false);
    let response = app
        .oneshot(request("acme.basedomain.example", "/stream/error"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(sink.0.lock().unwrap().is_empty());

    assert!(to_bytes(response.into_body(), usize::MAX).await.is_err());
    assert!(sink.0.lock().unwrap().is_empty());
}

#[tokio::test]
async fn usage_is_recorded_after_the_stream_ends() {
    let (app, sink) = build_app(false);
    let response = app
        .oneshot(request("acme.basedomain.example", "/stream/complete"))
        .await
        .unwrap();
    assert_eq!(body_string(response).await, "first second");
    assert_eq!(sink.0.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn caller_dropping_the_stream_records_nothing() {
    let (app, sink) = build_app(false);
    let response = app
        .oneshot(request("acme.basedomain.example", "/stream/stall"))
        .await
        .unwrap();
    let mut body = response.into_body().into_data_stream();
    assert_eq!(body.next().await.unwrap().unwrap(), "first");
    drop(body);

    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
    assert!(sink.0.lock().unwrap().is_empty());
}
