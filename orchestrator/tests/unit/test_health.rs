//! Health aggregation tests

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use stackpilot::deploy::fsm::DeploymentStatus;
use stackpilot::models::deployment::{ComplianceClass, ModelSize};
use stackpilot::models::resource::{ServiceHealth, ServiceKind};
use stackpilot::workers::health_monitor;
use tokio::time::Instant;

use crate::common::{self, Mocks};

#[tokio::test(start_paused = true)]
async fn test_slow_probe_is_bounded() {
    let mocks = Mocks::default();
    let (orchestrator, _events) = common::orchestrator(&mocks);
    let id = common::running_deployment(&orchestrator).await;

    mocks
        .containers
        .health_delay
        .lock()
        .unwrap()
        .insert(ServiceKind::VectorStore, Duration::from_secs(120));
    mocks
        .containers
        .missing
        .lock()
        .unwrap()
        .insert(ServiceKind::RetrievalPipeline);

    let started = Instant::now();
    let report = orchestrator.get_deployment_health(&id).await.unwrap();

    // Bounded by the probe timeout, not by the stuck service
    assert_eq!(started.elapsed(), common::options().health_probe_timeout);
    assert_eq!(report.status, DeploymentStatus::Running);
    assert_eq!(report.services[&ServiceKind::VectorStore], ServiceHealth::Unhealthy);
    assert_eq!(report.services[&ServiceKind::RetrievalPipeline], ServiceHealth::NotFound);
    assert_eq!(report.services[&ServiceKind::ModelServer], ServiceHealth::Healthy);
    assert_eq!(report.services[&ServiceKind::ChatUi], ServiceHealth::Healthy);
    assert_eq!(report.services[&ServiceKind::WorkflowEngine], ServiceHealth::Healthy);
    assert_eq!(report.workflow_count, Some(3));
    assert!(!report.all_healthy());
}

#[tokio::test(start_paused = true)]
async fn test_probes_run_concurrently() {
    let mocks = Mocks::default();
    let (orchestrator, _events) = common::orchestrator(&mocks);
    let id = common::running_deployment(&orchestrator).await;

    {
        let mut delays = mocks.containers.health_delay.lock().unwrap();
        delays.insert(ServiceKind::ModelServer, Duration::from_secs(2));
        delays.insert(ServiceKind::VectorStore, Duration::from_secs(3));
        delays.insert(ServiceKind::ChatUi, Duration::from_secs(1));
    }
    *mocks.workflow.health_delay.lock().unwrap() = Some(Duration::from_secs(3));

    let started = Instant::now();
    let report = orchestrator.get_deployment_health(&id).await.unwrap();

    assert_eq!(started.elapsed(), Duration::from_secs(3));
    assert!(report.all_healthy());
    assert_eq!(report.services.len(), 5);
}

#[tokio::test]
async fn test_deployment_without_compute_reports_not_found() {
    let mocks = Mocks::default();
    let (orchestrator, _events) = common::orchestrator(&mocks);
    let deployment = orchestrator
        .submit("org-1", common::intent(ModelSize::Small, ComplianceClass::Baseline, "us-east"))
        .await
        .unwrap();

    let report = orchestrator.get_deployment_health(&deployment.id).await.unwrap();
    assert_eq!(report.status, DeploymentStatus::Pending);
    assert!(report.services.values().all(|h| *h == ServiceHealth::NotFound));
}

#[tokio::test]
async fn test_health_monitor_refreshes_running_deployments() {
    let mocks = Mocks::default();
    let (orchestrator, _events) = common::orchestrator(&mocks);
    let running = common::running_deployment(&orchestrator).await;
    let stopped = common::running_deployment(&orchestrator).await;
    orchestrator.stop_deployment(&stopped).await.unwrap();

    mocks
        .containers
        .missing
        .lock()
        .unwrap()
        .insert(ServiceKind::ChatUi);

    assert_eq!(health_monitor::refresh_running(&orchestrator).await, 1);
    let health = orchestrator
        .get_status(&running)
        .await
        .unwrap()
        .deployment
        .health
        .unwrap();
    assert_eq!(health.services[&ServiceKind::ChatUi], ServiceHealth::NotFound);
}

#[tokio::test(start_paused = true)]
async fn test_health_monitor_stops_on_shutdown() {
    let mocks = Mocks::default();
    let (orchestrator, _events) = common::orchestrator(&mocks);
    let options = health_monitor::Options::default();

    let shutdown: Pin<Box<dyn Future<Output = ()> + Send>> =
        Box::pin(tokio::time::sleep(Duration::from_secs(150)));
    let started = Instant::now();
    health_monitor::run(&options, &orchestrator, tokio::time::sleep, shutdown).await;

    assert_eq!(started.elapsed(), Duration::from_secs(150));
}
