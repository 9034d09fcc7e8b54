//! FSM unit tests

use dockhand::deploy::fsm::{apply, next_status, DeploymentEvent};
use dockhand::models::deployment::{
    Deployment, DeploymentStatus, Environment, NewDeployment, SourceConfig, SourceType,
};

fn deployment() -> Deployment {
    Deployment::new(NewDeployment {
        service_id: "svc-1".to_string(),
        project_id: "proj-1".to_string(),
        environment: Environment::Production,
        source_type: SourceType::Github,
        source_config: SourceConfig {
            branch: Some("main".to_string()),
            commit_sha: Some("abc123".to_string()),
            ..Default::default()
        },
        metadata: Default::default(),
    })
}

#[test]
fn test_fsm_initial_state() {
    let d = deployment();
    assert_eq!(d.status, DeploymentStatus::Pending);
    assert!(d.error_message.is_none());
    assert!(d.build_started_at.is_none());
}

#[test]
fn test_fsm_deploy_success_flow() {
    let mut d = deployment();

    apply(&mut d, &DeploymentEvent::Enqueue).unwrap();
    assert_eq!(d.status, DeploymentStatus::Queued);

    apply(&mut d, &DeploymentEvent::StartBuild).unwrap();
    assert_eq!(d.status, DeploymentStatus::Building);
    assert!(d.build_started_at.is_some());

    apply(&mut d, &DeploymentEvent::StartDeploy).unwrap();
    assert_eq!(d.status, DeploymentStatus::Deploying);

    apply(&mut d, &DeploymentEvent::Succeed).unwrap();
    assert_eq!(d.status, DeploymentStatus::Success);
    assert!(d.deploy_completed_at.is_some());
}

#[test]
fn test_fsm_failure_then_retry() {
    let mut d = deployment();
    apply(&mut d, &DeploymentEvent::Enqueue).unwrap();
    apply(&mut d, &DeploymentEvent::StartBuild).unwrap();

    apply(&mut d, &DeploymentEvent::Fail("build exited with 1".to_string())).unwrap();
    assert_eq!(d.status, DeploymentStatus::Failed);
    assert_eq!(d.error_message.as_deref(), Some("build exited with 1"));

    apply(&mut d, &DeploymentEvent::Retry).unwrap();
    assert_eq!(d.status, DeploymentStatus::Queued);
    assert!(d.error_message.is_none());
}

#[test]
fn test_fsm_invalid_transitions() {
    let mut d = deployment();

    // Cannot skip the queue
    assert!(apply(&mut d, &DeploymentEvent::StartBuild).is_err());
    assert_eq!(d.status, DeploymentStatus::Pending);

    assert!(next_status(DeploymentStatus::Queued, &DeploymentEvent::Succeed).is_err());
    assert!(next_status(DeploymentStatus::Cancelled, &DeploymentEvent::Retry).is_err());
    assert!(next_status(DeploymentStatus::Cancelled, &DeploymentEvent::Enqueue).is_err());
}

#[test]
fn test_fsm_cancel_records_reason() {
    let mut d = deployment();
    apply(&mut d, &DeploymentEvent::Enqueue).unwrap();
    apply(&mut d, &DeploymentEvent::Cancel("superseded by d-2".to_string())).unwrap();

    assert_eq!(d.status, DeploymentStatus::Cancelled);
    assert_eq!(
        d.metadata.cancellation_reason.as_deref(),
        Some("superseded by d-2")
    );
    assert!(d.status.is_terminal());
}

#[test]
fn test_fsm_retire_successful_deployment() {
    let mut d = deployment();
    for event in [
        DeploymentEvent::Enqueue,
        DeploymentEvent::StartBuild,
        DeploymentEvent::StartDeploy,
        DeploymentEvent::Succeed,
    ] {
        apply(&mut d, &event).unwrap();
    }

    assert_eq!(
        next_status(d.status, &DeploymentEvent::Reinstate),
        Ok(DeploymentStatus::Success)
    );
    apply(&mut d, &DeploymentEvent::Retire("pull request closed".to_string())).unwrap();
    assert_eq!(d.status, DeploymentStatus::Cancelled);
}
