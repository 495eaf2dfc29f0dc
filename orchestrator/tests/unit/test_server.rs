//! HTTP API tests

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tower::ServiceExt;

use stackpilot::app::state::ActiveRuns;
use stackpilot::server::serve::build_router;
use stackpilot::server::state::ServerState;

use crate::common::{self, Mocks};

struct TestApp {
    router: Router,
    active_runs: Arc<ActiveRuns>,
    shutdown_tx: broadcast::Sender<()>,
}

fn app(mocks: &Mocks) -> TestApp {
    let (orchestrator, events) = common::orchestrator(mocks);
    let active_runs = Arc::new(ActiveRuns::new());
    let (shutdown_tx, _) = broadcast::channel(1);
    let state = ServerState::new(
        Arc::new(orchestrator),
        events,
        active_runs.clone(),
        shutdown_tx.clone(),
    );
    TestApp {
        router: build_router(Arc::new(state)),
        active_runs,
        shutdown_tx,
    }
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| json!(String::from_utf8_lossy(&bytes)))
    };
    (status, value)
}

fn deploy_body() -> Value {
    json!({
        "organization_id": "org-1",
        "model_size": "70B",
        "region": "us-east",
        "compliance": "hipaa",
        "industry": "legal",
    })
}

async fn wait_for_status(router: &Router, id: &str, status: &str) -> Value {
    for _ in 0..200 {
        let (_, body) = send(router, "GET", &format!("/deployments/{}", id), None).await;
        if body["deployment"]["status"] == status {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("deployment {} never reached {}", id, status);
}

#[tokio::test]
async fn test_health_and_version() {
    let app = app(&Mocks::default());

    let (status, body) = send(&app.router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "stackpilot");

    let (status, body) = send(&app.router, "GET", "/version", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_deployment_lifecycle() {
    let mocks = Mocks::default();
    let app = app(&mocks);

    let (status, body) = send(&app.router, "POST", "/deployments", Some(deploy_body())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "pending");
    let id = body["deployment_id"].as_str().unwrap().to_string();

    let snapshot = wait_for_status(&app.router, &id, "running").await;
    assert_eq!(snapshot["steps"].as_array().unwrap().len(), 8);
    assert_eq!(snapshot["deployment"]["endpoints"]["admin"], "http://10.0.0.5:8501/admin");

    // The run guard is released once the pipeline is done
    app.active_runs.wait_idle().await;

    let (status, body) = send(&app.router, "GET", "/deployments", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) = send(&app.router, "GET", &format!("/deployments/{}/health", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["services"]["chat_ui"], "healthy");
    assert_eq!(body["status"], "running");

    let (status, body) = send(
        &app.router,
        "GET",
        &format!("/deployments/{}/logs/chat?tail=2", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "chat_ui");
    assert_eq!(body["lines"].as_array().unwrap().len(), 2);

    let (status, body) = send(
        &app.router,
        "POST",
        &format!("/deployments/{}/scale", id),
        Some(json!({ "gpu_type": "A100-80GB", "gpu_count": 4, "memory_gb": 320, "storage_gb": 1000 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["infrastructure"]["config"]["gpu_count"], 4);

    let (status, body) = send(&app.router, "POST", &format!("/deployments/{}/stop", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "stopped");
    assert!(body["warnings"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_error_mapping() {
    let mocks = Mocks::default();
    let app = app(&mocks);

    let (status, body) = send(&app.router, "GET", "/deployments/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let mut invalid = deploy_body();
    invalid["model_size"] = json!("405B");
    let (status, body) = send(&app.router, "POST", "/deployments", Some(invalid)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, _) = send(&app.router, "GET", "/deployments/missing/logs/teapot", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_concurrent_operation_is_rejected() {
    let mocks = Mocks::default();
    mocks
        .containers
        .deploy_delay
        .lock()
        .unwrap()
        .insert(stackpilot::models::resource::ServiceKind::ModelServer, Duration::from_secs(60));
    let app = app(&mocks);

    let (_, body) = send(&app.router, "POST", "/deployments", Some(deploy_body())).await;
    let id = body["deployment_id"].as_str().unwrap().to_string();
    assert!(app.active_runs.is_active(&id));

    let (status, body) = send(&app.router, "POST", &format!("/deployments/{}/stop", id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    // Shutdown cancels the run, which then releases its guard
    app.shutdown_tx.send(()).unwrap();
    app.active_runs.wait_idle().await;
    let snapshot = wait_for_status(&app.router, &id, "failed").await;
    assert_eq!(snapshot["deployment"]["error_message"], "cancelled");
}

#[tokio::test]
async fn test_events_of_settled_deployment() {
    let mocks = Mocks::default();
    let app = app(&mocks);

    let (_, body) = send(&app.router, "POST", "/deployments", Some(deploy_body())).await;
    let id = body["deployment_id"].as_str().unwrap().to_string();
    wait_for_status(&app.router, &id, "running").await;

    // Nothing is in flight, so the stream ends after the current status
    let (status, body) = send(&app.router, "GET", &format!("/deployments/{}/events", id), None).await;
    assert_eq!(status, StatusCode::OK);
    let text = body.as_str().unwrap();
    assert!(text.contains("event: status_changed"));
    assert!(text.contains("\"status\":\"running\""));

    let (status, _) = send(&app.router, "GET", "/deployments/missing/events", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
