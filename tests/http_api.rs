//! HTTP API Integration Tests
//!
//! Exercises the router in-process with `tower::ServiceExt::oneshot`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use futures::StreamExt;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use tower::ServiceExt;

use umca::adapters::{Backends, ContainerBackend, GateScorer, GateVerdict, ScoringError};
use umca::auth::TokenVerifier;
use umca::config::{GateMode, IdentityConfig};
use umca::core::{scorer_for, GatePipeline, TaskLimits};
use umca::domain::events::RUN_RECEIVED;
use umca::domain::LifecycleEvent;
use umca::events::{
    Broker, BrokerConsumer, BridgeSettings, BroadcastChannel, EventBridge, EventPublisher,
    InMemoryBroker, MemoryBrokerSettings,
};
use umca::{build_router, AppState};

const ISSUER: &str = "http://idp.test/realms/stack-a";
const AUDIENCE: &str = "orchestrator";
const SECRET: &[u8] = b"orchestrator-test-signing-key-012";

/// Scorer whose service answers every request with 503
struct UnavailableScorer;

#[async_trait]
impl GateScorer for UnavailableScorer {
    fn name(&self) -> &str {
        "unavailable"
    }

    async fn score(&self, _stage: &str, _content: &str) -> Result<GateVerdict, ScoringError> {
        Ok(GateVerdict::rejected(503))
    }
}

struct TestApp {
    router: Router,
    observer: Arc<dyn BrokerConsumer>,
    state: AppState,
}

async fn app_with_scorer(scorer: Arc<dyn GateScorer>) -> TestApp {
    let broker = Arc::new(InMemoryBroker::with_settings(
        "umca-events",
        MemoryBrokerSettings {
            await_duration: Duration::from_millis(20),
            invisible_duration: Duration::from_secs(30),
        },
    ));
    let observer = broker.connect_consumer("observer").await.unwrap();

    let publisher = Arc::new(EventPublisher::new(broker.clone()));
    let channel = BroadcastChannel::new();
    let bridge = Arc::new(EventBridge::new(
        broker.clone(),
        channel.clone(),
        publisher.clone(),
        BridgeSettings::new("bridge"),
    ));

    let pipeline = Arc::new(GatePipeline::new(
        publisher.clone(),
        scorer,
        Backends::new(
            Arc::new(ContainerBackend::new()),
            Arc::new(ContainerBackend::new()),
        ),
        TaskLimits::default(),
    ));

    let keys: JwkSet = serde_json::from_value(json!({
        "keys": [{
            "kty": "oct",
            "kid": "test",
            "alg": "HS256",
            "k": "b3JjaGVzdHJhdG9yLXRlc3Qtc2lnbmluZy1rZXktMDEy"
        }]
    }))
    .unwrap();
    let verifier = Arc::new(TokenVerifier::with_key_set(
        &IdentityConfig::new(ISSUER, AUDIENCE),
        keys,
    ));

    let state = AppState {
        pipeline,
        verifier,
        publisher,
        channel,
        bridge,
    };

    TestApp {
        router: build_router(state.clone()),
        observer,
        state,
    }
}

async fn app() -> TestApp {
    app_with_scorer(scorer_for(&GateMode::Degraded)).await
}

fn token() -> String {
    let mut header = Header::default();
    header.kid = Some("test".to_string());
    let claims = json!({
        "sub": "user-1",
        "iss": ISSUER,
        "aud": AUDIENCE,
        "exp": jsonwebtoken::get_current_timestamp() + 3600,
    });
    encode(&header, &claims, &EncodingKey::from_secret(SECRET)).unwrap()
}

fn run_request(auth: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/run")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, auth: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    builder.body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn published_types(observer: &Arc<dyn BrokerConsumer>) -> Vec<String> {
    let mut types = Vec::new();
    loop {
        let batch = observer.receive(64).await.unwrap();
        if batch.is_empty() {
            return types;
        }
        for message in batch {
            observer.ack(&message).await.unwrap();
            types.push(LifecycleEvent::from_bytes(&message.body).unwrap().event_type);
        }
    }
}

#[tokio::test]
async fn test_healthz_is_public() {
    let app = app().await;

    let response = app.router.oneshot(get("/healthz", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "status": "ok" }));
}

#[tokio::test]
async fn test_unknown_route_is_json_404() {
    let app = app().await;

    let response = app.router.oneshot(get("/nope", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await, json!({ "error": "Not found" }));
}

#[tokio::test]
async fn test_run_without_token_never_starts_pipeline() {
    let app = app().await;

    let response = app
        .router
        .clone()
        .oneshot(run_request(None, r#"{"spec":{"task":"x"}}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        json_body(response).await,
        json!({ "error": "missing bearer token" })
    );

    let types = published_types(&app.observer).await;
    assert!(!types.iter().any(|t| t == RUN_RECEIVED));
}

#[tokio::test]
async fn test_invalid_token_is_unauthorized() {
    let app = app().await;

    let response = app
        .router
        .oneshot(run_request(Some("Bearer not.a.token"), r#"{"spec":{}}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = json_body(response).await;
    assert_eq!(body["error"], "invalid token");
    assert!(body.get("detail").is_some());
    assert!(published_types(&app.observer).await.is_empty());
}

#[tokio::test]
async fn test_ping_reports_subject() {
    let app = app().await;
    let auth = format!("Bearer {}", token());

    let response = app
        .router
        .oneshot(get("/protected/ping", Some(&auth)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "ok": true, "user": "user-1" }));
}

#[tokio::test]
async fn test_run_completes() {
    let app = app().await;
    let auth = format!("Bearer {}", token());

    let response = app
        .router
        .oneshot(run_request(
            Some(&auth),
            r#"{"spec":{"task":"hello","language":"python","preferWasm":true}}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert!(body.get("runId").is_some());
    assert_eq!(body["plan"]["steps"].as_array().unwrap().len(), 2);
    assert_eq!(body["executionResults"][0]["runtime"], "container");
    assert_eq!(
        body["executionResults"][0]["detail"],
        "Executed: Echo outcome for plan-1"
    );

    let types = published_types(&app.observer).await;
    assert_eq!(types.first().map(String::as_str), Some(RUN_RECEIVED));
    assert_eq!(types.last().map(String::as_str), Some("run:complete"));
    assert!(types.iter().any(|t| t == "eval:skipped"));
}

#[tokio::test]
async fn test_missing_spec_uses_defaults() {
    let app = app().await;
    let auth = format!("Bearer {}", token());

    let response = app
        .router
        .oneshot(run_request(Some(&auth), "{}"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["plan"]["summary"], "orchestrator task");
}

#[tokio::test]
async fn test_gate_failure_is_412_with_partial_artifacts() {
    let app = app_with_scorer(Arc::new(UnavailableScorer)).await;
    let auth = format!("Bearer {}", token());

    let response = app
        .router
        .oneshot(run_request(Some(&auth), r#"{"spec":{"task":"x"}}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);

    let body = json_body(response).await;
    assert_eq!(body["error"], "Plan gate failed");
    assert_eq!(body["gate"], "G1");
    assert!(body.get("plan").is_some());
    assert!(body.get("code").is_none());

    let types = published_types(&app.observer).await;
    assert!(types.iter().any(|t| t == "eval:error"));
    assert_eq!(types.last().map(String::as_str), Some("gate:G1:failed"));
}

#[tokio::test]
async fn test_malformed_body_is_500_with_run_error() {
    let app = app().await;
    let auth = format!("Bearer {}", token());

    let response = app
        .router
        .oneshot(run_request(Some(&auth), "{not json"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().starts_with("Malformed request"));
    assert_eq!(published_types(&app.observer).await, vec!["run:error"]);
}

#[tokio::test]
async fn test_stream_opens_with_welcome_frame() {
    let app = app().await;
    let auth = format!("Bearer {}", token());

    let response = app
        .router
        .oneshot(get("/stream", Some(&auth)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .starts_with("text/event-stream"));

    let mut body = response.into_body().into_data_stream();
    let first = tokio::time::timeout(Duration::from_secs(2), body.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let frame = String::from_utf8_lossy(&first);
    assert!(frame.contains("event: welcome"));
    assert!(frame.contains(r#"{"connected":true}"#));

    assert!(app.state.bridge.is_started());
    assert_eq!(app.state.channel.subscriber_count(), 1);

    drop(body);
    assert_eq!(app.state.channel.subscriber_count(), 0);
    app.state.bridge.shutdown().await;
}

#[tokio::test]
async fn test_stream_without_token_is_rejected() {
    let app = app().await;

    let response = app.router.oneshot(get("/stream", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.state.channel.subscriber_count(), 0);
}
