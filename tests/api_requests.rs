//! Request flows through the operations router.

use axum::{
    Router,
    body::{Body, Bytes},
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use marketplace_reconciler::api::create_router;
use marketplace_reconciler::app::{AppService, AppState, Reconciler};
use marketplace_reconciler::domain::{
    EntityKind, ErrorResponse, HealthResponse, HealthStatus, PassLease, ReconcileReport,
    RecordStatus, Rental,
};
use marketplace_reconciler::infra::LocalPassLease;
use marketplace_reconciler::test_utils::{
    InMemoryStore, MockCacheInvalidator, MockLedgerClient, hash, in_memory_stores,
};

struct TestApp {
    router: Router,
    store: Arc<InMemoryStore>,
    ledger: Arc<MockLedgerClient>,
    cache: Arc<MockCacheInvalidator>,
    lease: Arc<LocalPassLease>,
}

fn test_app(with_metrics: bool) -> TestApp {
    let (store, stores) = in_memory_stores();
    let ledger = Arc::new(MockLedgerClient::new());
    let cache = Arc::new(MockCacheInvalidator::new());
    let lease = Arc::new(LocalPassLease::new());

    let service = Arc::new(AppService::new(
        Arc::clone(&store) as _,
        stores.clone(),
        Arc::clone(&ledger) as _,
        Arc::clone(&cache) as _,
    ));
    let reconciler = Arc::new(Reconciler::new(
        stores,
        Arc::clone(&ledger) as _,
        Arc::clone(&cache) as _,
        Arc::clone(&lease) as _,
    ));
    let metrics = with_metrics.then(|| Arc::new(PrometheusBuilder::new().build_recorder().handle()));
    let state = Arc::new(AppState::new(service, reconciler, metrics));

    TestApp {
        router: create_router(state),
        store,
        ledger,
        cache,
        lease,
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

#[tokio::test]
async fn test_manual_reconcile_returns_report() {
    let app = test_app(false);
    let rental = Rental {
        id: Uuid::new_v4(),
        token_id: Uuid::new_v4(),
        ledger_reference: hash(300),
        ..Default::default()
    };
    app.store.seed(rental.clone());
    app.ledger.confirm(&hash(300));

    let response = app.router.clone().oneshot(post("/reconcile")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let report: ReconcileReport = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(report.kinds.len(), EntityKind::ALL.len());
    assert_eq!(report.kind(EntityKind::Rental).unwrap().committed, 1);
    assert_eq!(
        app.store.get::<Rental>(rental.id).unwrap().status,
        RecordStatus::Active
    );
}

#[tokio::test]
async fn test_manual_reconcile_conflicts_with_running_pass() {
    let app = test_app(false);
    assert!(app.lease.try_acquire().await.unwrap());

    let response = app.router.clone().oneshot(post("/reconcile")).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let body: ErrorResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body.error.r#type, "pass_in_flight");
    assert_eq!(app.cache.total_invalidations(), 0);

    app.lease.release().await.unwrap();
    let response = app.router.oneshot(post("/reconcile")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_health_reports_each_dependency() {
    let app = test_app(false);
    app.cache.set_failing(true);

    let response = app.router.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let health: HealthResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(health.status, HealthStatus::Degraded);
    assert_eq!(health.database, HealthStatus::Healthy);
    assert_eq!(health.ledger, HealthStatus::Healthy);
    assert_eq!(health.cache, HealthStatus::Unhealthy);

    // A cache outage alone does not take the instance out of rotation.
    let response = app.router.oneshot(get("/health/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_readiness_fails_without_database() {
    let app = test_app(false);
    app.store.set_healthy(false);

    let response = app.router.oneshot(get("/health/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_readiness_fails_without_ledger() {
    let app = test_app(false);
    app.ledger.set_healthy(false);

    let response = app.router.oneshot(get("/health/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_liveness_ignores_dependencies() {
    let app = test_app(false);
    app.store.set_healthy(false);
    app.ledger.set_healthy(false);

    let response = app.router.oneshot(get("/health/live")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_endpoint_serves_prometheus_text() {
    let app = test_app(true);

    let response = app.router.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/plain"));
}
