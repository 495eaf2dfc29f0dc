//! FSM unit tests

use stackpilot::deploy::fsm::{DeploymentEvent, DeploymentFsm, DeploymentStatus};

#[test]
fn test_fsm_initial_state() {
    let fsm = DeploymentFsm::new();
    assert_eq!(fsm.status(), DeploymentStatus::Pending);
    assert!(fsm.error().is_none());
}

#[test]
fn test_fsm_provision_success_flow() {
    let mut fsm = DeploymentFsm::new();

    // Pending -> Provisioning
    fsm.process(DeploymentEvent::Provision).unwrap();
    assert_eq!(fsm.status(), DeploymentStatus::Provisioning);

    // Provisioning -> Running
    fsm.process(DeploymentEvent::ProvisionSucceeded).unwrap();
    assert_eq!(fsm.status(), DeploymentStatus::Running);
}

#[test]
fn test_fsm_scaling_flow() {
    let mut fsm = DeploymentFsm::new();

    fsm.process(DeploymentEvent::Provision).unwrap();
    fsm.process(DeploymentEvent::Scale).unwrap();
    assert_eq!(fsm.status(), DeploymentStatus::Scaling);

    fsm.process(DeploymentEvent::ScaleCompleted).unwrap();
    assert_eq!(fsm.status(), DeploymentStatus::Running);
}

#[test]
fn test_fsm_failure_flow() {
    let mut fsm = DeploymentFsm::new();

    fsm.process(DeploymentEvent::Provision).unwrap();
    fsm.process(DeploymentEvent::Fail("test error".to_string()))
        .unwrap();

    assert_eq!(fsm.status(), DeploymentStatus::Failed);
    assert_eq!(fsm.error(), Some("test error"));
    assert!(fsm.status().is_terminal());
}

#[test]
fn test_fsm_failed_is_terminal() {
    let mut fsm = DeploymentFsm::new();

    fsm.process(DeploymentEvent::Provision).unwrap();
    fsm.process(DeploymentEvent::Fail("error 1".to_string())).unwrap();

    // A retry needs a new deployment
    assert!(fsm.process(DeploymentEvent::Provision).is_err());
    assert!(fsm.process(DeploymentEvent::Fail("error 2".to_string())).is_err());
    assert_eq!(fsm.error(), Some("error 1"));
}

#[test]
fn test_fsm_stop_flow() {
    let mut fsm = DeploymentFsm::from_status(DeploymentStatus::Running);

    // Running -> Stopping
    fsm.process(DeploymentEvent::Stop).unwrap();
    assert_eq!(fsm.status(), DeploymentStatus::Stopping);
    assert!(fsm.status().is_in_flight());

    // Stopping -> Stopped
    fsm.process(DeploymentEvent::StopCompleted).unwrap();
    assert_eq!(fsm.status(), DeploymentStatus::Stopped);
}

#[test]
fn test_fsm_invalid_transition() {
    let mut fsm = DeploymentFsm::new();

    // Cannot stop before running
    let result = fsm.process(DeploymentEvent::Stop);
    assert!(result.is_err());
    assert_eq!(fsm.status(), DeploymentStatus::Pending);
}
