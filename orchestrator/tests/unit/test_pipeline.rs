//! Pipeline run tests

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use stackpilot::deploy::fsm::DeploymentStatus;
use stackpilot::deploy::orchestrator::Orchestrator;
use stackpilot::deploy::pipeline::{Pipeline, StepKind};
use stackpilot::errors::StackError;
use stackpilot::events::{BroadcastPublisher, ProgressEvent};
use stackpilot::gateways::compliance::ComplianceActionKind;
use stackpilot::models::deployment::{
    ComplianceClass, Deployment, DeploymentStep, Endpoints, Infrastructure, ModelSize,
};
use stackpilot::models::resource::{HealthReport, ServiceKind};
use stackpilot::store::{DeploymentStore, MemoryStore};
use tokio_test::{assert_err, assert_ok};

use crate::common::{self, FailingStep, Mocks};

#[tokio::test]
async fn test_successful_run_reaches_running() {
    let mocks = Mocks::default();
    let (orchestrator, events) = common::orchestrator(&mocks);
    let mut receiver = events.subscribe();

    let deployment = orchestrator
        .submit("org-1", common::intent(ModelSize::Medium, ComplianceClass::Soc2, "eu-west"))
        .await
        .unwrap();
    let deployment = assert_ok!(orchestrator.run_pipeline(&deployment.id).await);

    assert_eq!(deployment.status, DeploymentStatus::Running);
    assert!(deployment.error_message.is_none());
    let endpoints = deployment.endpoints.clone().unwrap();
    assert_eq!(endpoints.chat_ui, "http://10.0.0.5:8501");
    assert_eq!(endpoints.api, "http://10.0.0.5:8000");
    assert_eq!(endpoints.workflow, "http://10.0.0.5:5678");
    assert_eq!(endpoints.admin, "http://10.0.0.5:8501/admin");
    assert!(deployment.health.as_ref().unwrap().all_healthy());

    let snapshot = orchestrator.get_status(&deployment.id).await.unwrap();
    let percentages: Vec<u8> = snapshot.steps.iter().map(|s| s.percentage).collect();
    assert!(percentages.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(percentages.last(), Some(&100));
    assert_eq!(snapshot.steps[0].description, "Provisioning GPU compute");

    // Compliance sees every service URL deployed before it
    assert_eq!(mocks.compliance.endpoints.lock().unwrap().len(), 5);

    let events = common::drain(&mut receiver);
    let steps: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::Step(step) => Some(step.step),
            _ => None,
        })
        .collect();
    assert_eq!(steps, (1..=8).collect::<Vec<u8>>());
    assert!(matches!(events.last(), Some(ProgressEvent::Completed { .. })));
}

#[tokio::test]
async fn test_large_hipaa_deployment_in_us_east() {
    let mocks = Mocks::default();
    let (orchestrator, _events) = common::orchestrator(&mocks);

    let deployment = orchestrator
        .submit("org-1", common::intent(ModelSize::Large, ComplianceClass::Hipaa, "us-east"))
        .await
        .unwrap();
    let deployment = orchestrator.run_pipeline(&deployment.id).await.unwrap();

    assert_eq!(deployment.status, DeploymentStatus::Running);
    assert!(!deployment.endpoints.as_ref().unwrap().chat_ui.is_empty());
    assert_eq!(
        deployment.infrastructure.as_ref().unwrap().config.gpu_type,
        "A100-80GB"
    );

    let steps = orchestrator.get_status(&deployment.id).await.unwrap().steps;
    let percentages: Vec<u8> = steps.iter().map(|s| s.percentage).collect();
    assert_eq!(percentages, vec![12, 25, 37, 50, 62, 75, 87, 100]);

    let applied = mocks.compliance.applied.lock().unwrap();
    assert_eq!(applied.len(), 1);
    let (class, actions) = &applied[0];
    assert_eq!(*class, ComplianceClass::Hipaa);
    let kinds: Vec<ComplianceActionKind> = actions.iter().map(|a| a.kind).collect();
    assert!(kinds.contains(&ComplianceActionKind::EncryptionAtRest));
    assert!(!kinds.contains(&ComplianceActionKind::DataResidency));
    assert!(!kinds.contains(&ComplianceActionKind::ErasureRights));

    assert_eq!(
        mocks.containers.model_ids.lock().unwrap().as_slice(),
        [ModelSize::Large.model_id().to_string()]
    );
    assert_eq!(
        mocks.workflow.templates.lock().unwrap().as_slice(),
        ["document-intake", "contract-review", "clause-extraction"]
    );
}

#[tokio::test]
async fn test_failure_at_each_step_stops_the_run() {
    for k in 1..=8u8 {
        let mocks = Mocks::default();
        let (orchestrator, events) = common::orchestrator(&mocks);
        let kind = StepKind::ORDER[k as usize - 1];
        let pipeline = Pipeline::standard(&mocks.gateways(), common::options().compute_poll)
            .with_executor(kind, Arc::new(FailingStep("injected failure")));
        let orchestrator = orchestrator.with_pipeline(pipeline);
        let mut receiver = events.subscribe();

        let deployment = orchestrator
            .submit("org-1", common::intent(ModelSize::Small, ComplianceClass::Gdpr, "eu-west"))
            .await
            .unwrap();
        let result = orchestrator.run_pipeline(&deployment.id).await;
        assert_err!(&result, "step {} should fail", k);

        let snapshot = orchestrator.get_status(&deployment.id).await.unwrap();
        assert_eq!(snapshot.deployment.status, DeploymentStatus::Failed, "step {}", k);
        let message = snapshot.deployment.error_message.clone().unwrap();
        assert!(message.contains("injected failure"), "step {}: {}", k, message);
        assert!(message.starts_with(kind.description()));
        assert!(snapshot.deployment.endpoints.is_none());

        // No log entry for the failed step or anything after it
        assert_eq!(snapshot.steps.len(), k as usize - 1, "step {}", k);
        assert!(snapshot.steps.iter().all(|s| s.step < k));

        let events = common::drain(&mut receiver);
        assert!(matches!(events.last(), Some(ProgressEvent::Failed { .. })));
        assert!(!events.iter().any(|e| matches!(e, ProgressEvent::Completed { .. })));
    }
}

#[tokio::test]
async fn test_provider_failure_fails_fast() {
    let mocks = Mocks::default();
    mocks.compute.fail_with("no A100 capacity in us-east");
    let (orchestrator, _events) = common::orchestrator(&mocks);

    let deployment = orchestrator
        .submit("org-1", common::intent(ModelSize::Large, ComplianceClass::Baseline, "us-east"))
        .await
        .unwrap();
    let err = orchestrator.run_pipeline(&deployment.id).await.unwrap_err();
    assert!(matches!(err, StackError::ProvisioningError(_)));

    let stored = orchestrator.get_status(&deployment.id).await.unwrap();
    assert_eq!(stored.deployment.status, DeploymentStatus::Failed);
    assert!(stored
        .deployment
        .error_message
        .unwrap()
        .contains("no A100 capacity"));
    assert!(stored.steps.is_empty());
    assert!(mocks.containers.deployed.lock().unwrap().is_empty());
    assert_eq!(mocks.compute.describe_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_deployment_cannot_be_rerun() {
    let mocks = Mocks::default();
    mocks.compute.fail_with("quota exceeded");
    let (orchestrator, _events) = common::orchestrator(&mocks);

    let deployment = orchestrator
        .submit("org-1", common::intent(ModelSize::Small, ComplianceClass::Baseline, "us-east"))
        .await
        .unwrap();
    assert_err!(orchestrator.run_pipeline(&deployment.id).await);

    let err = orchestrator.run_pipeline(&deployment.id).await.unwrap_err();
    assert!(matches!(err, StackError::InvalidTransition(_)));
}

#[tokio::test]
async fn test_submit_validates_input() {
    let mocks = Mocks::default();
    let (orchestrator, _events) = common::orchestrator(&mocks);

    let err = orchestrator
        .submit("", common::intent(ModelSize::Small, ComplianceClass::Baseline, "us-east"))
        .await
        .unwrap_err();
    assert!(matches!(err, StackError::ValidationError(_)));

    let err = orchestrator
        .submit("org-1", common::intent(ModelSize::Small, ComplianceClass::Baseline, "  "))
        .await
        .unwrap_err();
    assert!(matches!(err, StackError::ValidationError(_)));
    assert!(orchestrator.list().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_releases_compute() {
    let mocks = Mocks::default();
    mocks
        .containers
        .deploy_delay
        .lock()
        .unwrap()
        .insert(ServiceKind::ModelServer, Duration::from_secs(300));
    let (orchestrator, _events) = common::orchestrator(&mocks);

    let deployment = orchestrator
        .submit("org-1", common::intent(ModelSize::Small, ComplianceClass::Baseline, "us-east"))
        .await
        .unwrap();
    let err = orchestrator
        .run_pipeline_until(&deployment.id, tokio::time::sleep(Duration::from_secs(30)))
        .await
        .unwrap_err();
    assert!(matches!(err, StackError::Cancelled));

    let snapshot = orchestrator.get_status(&deployment.id).await.unwrap();
    assert_eq!(snapshot.deployment.status, DeploymentStatus::Failed);
    assert_eq!(snapshot.deployment.error_message.as_deref(), Some("cancelled"));
    assert_eq!(snapshot.steps.len(), 1);
    assert_eq!(mocks.compute.terminated(), vec!["inst-1".to_string()]);
    assert!(mocks.containers.deployed.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_while_compute_boots_releases_it() {
    let mocks = Mocks::default();
    *mocks.compute.booting.lock().unwrap() = true;
    let (orchestrator, _events) = common::orchestrator(&mocks);

    let deployment = orchestrator
        .submit("org-1", common::intent(ModelSize::Small, ComplianceClass::Baseline, "us-east"))
        .await
        .unwrap();
    let err = orchestrator
        .run_pipeline_until(&deployment.id, tokio::time::sleep(Duration::from_secs(30)))
        .await
        .unwrap_err();
    assert!(matches!(err, StackError::Cancelled));

    let snapshot = orchestrator.get_status(&deployment.id).await.unwrap();
    assert_eq!(snapshot.deployment.status, DeploymentStatus::Failed);
    assert_eq!(snapshot.deployment.error_message.as_deref(), Some("cancelled"));
    assert!(snapshot.deployment.compute().is_none());
    assert!(snapshot.steps.is_empty());
    assert_eq!(mocks.compute.terminated(), vec!["inst-1".to_string()]);
}

/// Memory store whose final write fails
struct BrokenFinalizeStore(MemoryStore);

#[async_trait]
impl DeploymentStore for BrokenFinalizeStore {
    async fn create(&self, deployment: &Deployment) -> Result<(), StackError> {
        self.0.create(deployment).await
    }

    async fn get(&self, id: &str) -> Result<Deployment, StackError> {
        self.0.get(id).await
    }

    async fn list(&self) -> Result<Vec<Deployment>, StackError> {
        self.0.list().await
    }

    async fn update_status(
        &self,
        id: &str,
        status: DeploymentStatus,
        error_message: Option<String>,
    ) -> Result<Deployment, StackError> {
        self.0.update_status(id, status, error_message).await
    }

    async fn append_step(&self, step: DeploymentStep) -> Result<(), StackError> {
        self.0.append_step(step).await
    }

    async fn steps(&self, id: &str) -> Result<Vec<DeploymentStep>, StackError> {
        self.0.steps(id).await
    }

    async fn update_infrastructure(
        &self,
        id: &str,
        infrastructure: Infrastructure,
    ) -> Result<Deployment, StackError> {
        self.0.update_infrastructure(id, infrastructure).await
    }

    async fn finalize(
        &self,
        _id: &str,
        _endpoints: Endpoints,
        _health: Option<HealthReport>,
    ) -> Result<Deployment, StackError> {
        Err(StackError::Internal("disk full".to_string()))
    }

    async fn record_health(&self, id: &str, report: HealthReport) -> Result<(), StackError> {
        self.0.record_health(id, report).await
    }
}

#[tokio::test]
async fn test_failed_final_write_marks_deployment_failed() {
    let mocks = Mocks::default();
    let events = BroadcastPublisher::new(64);
    let mut receiver = events.subscribe();
    let orchestrator = Orchestrator::new(
        Arc::new(BrokenFinalizeStore(MemoryStore::new())),
        Arc::new(events.clone()),
        mocks.gateways(),
        common::options(),
    );

    let deployment = orchestrator
        .submit("org-1", common::intent(ModelSize::Small, ComplianceClass::Baseline, "us-east"))
        .await
        .unwrap();
    assert_err!(orchestrator.run_pipeline(&deployment.id).await);

    let snapshot = orchestrator.get_status(&deployment.id).await.unwrap();
    assert_eq!(snapshot.deployment.status, DeploymentStatus::Failed);
    let message = snapshot.deployment.error_message.unwrap();
    assert!(message.contains("disk full"), "{}", message);
    assert_eq!(snapshot.steps.len(), 8);

    let events = common::drain(&mut receiver);
    assert!(matches!(events.last(), Some(ProgressEvent::Failed { .. })));

    // The record is no longer stuck in flight, stop releases it
    let report = orchestrator.stop_deployment(&deployment.id).await.unwrap();
    assert_eq!(report.deployment.status, DeploymentStatus::Failed);
    assert_eq!(mocks.compute.terminated(), vec!["inst-1".to_string()]);
}
