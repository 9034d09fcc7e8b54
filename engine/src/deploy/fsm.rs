//! Finite State Machine for deployment records

use chrono::Utc;

use crate::models::deployment::{Deployment, DeploymentStatus};

/// Deployment event
#[derive(Debug, Clone, PartialEq)]
pub enum DeploymentEvent {
    /// Accepted by the queue
    Enqueue,

    /// Processor started source fetch / build
    StartBuild,

    /// Image built, container start in progress
    StartDeploy,

    /// Running, routed and healthy
    Succeed,

    /// Unrecoverable step error
    Fail(String),

    /// Superseded or cancelled by an operator
    Cancel(String),

    /// Queue re-admits a failed attempt
    Retry,

    /// Replaced by a rollback or torn down after its PR closed
    Retire(String),

    /// Rollback target takes the route back
    Reinstate,
}

/// Compute the next status, or explain why the event is illegal
pub fn next_status(
    current: DeploymentStatus,
    event: &DeploymentEvent,
) -> Result<DeploymentStatus, String> {
    use DeploymentStatus::*;

    let next = match (current, event) {
        (Pending, DeploymentEvent::Enqueue) => Queued,
        (Queued, DeploymentEvent::StartBuild) => Building,
        (Building, DeploymentEvent::StartDeploy) => Deploying,
        (Deploying, DeploymentEvent::Succeed) => Success,

        // Any non-terminal state can fail or be cancelled
        (Pending | Queued | Building | Deploying, DeploymentEvent::Fail(_)) => Failed,
        (Pending | Queued | Building | Deploying, DeploymentEvent::Cancel(_)) => Cancelled,

        (Failed, DeploymentEvent::Retry) => Queued,

        (Pending | Queued | Building | Deploying | Success | Failed, DeploymentEvent::Retire(_)) => {
            Cancelled
        }
        (Success, DeploymentEvent::Reinstate) => Success,

        // Invalid transitions
        (state, event) => {
            return Err(format!("{} -> {:?}", state, event));
        }
    };

    Ok(next)
}

/// Apply an event to a record: status, timestamps and failure bookkeeping
pub fn apply(deployment: &mut Deployment, event: &DeploymentEvent) -> Result<(), String> {
    let next = next_status(deployment.status, event)?;
    let now = Utc::now();

    match event {
        DeploymentEvent::StartBuild => {
            deployment.build_started_at = Some(now);
            deployment.error_message = None;
        }
        DeploymentEvent::StartDeploy => {
            deployment.deploy_started_at = Some(now);
        }
        DeploymentEvent::Succeed => {
            deployment.deploy_completed_at = Some(now);
            deployment.error_message = None;
        }
        DeploymentEvent::Fail(err) => {
            deployment.error_message = Some(err.clone());
        }
        DeploymentEvent::Cancel(reason) | DeploymentEvent::Retire(reason) => {
            deployment.metadata.cancellation_reason = Some(reason.clone());
        }
        DeploymentEvent::Retry => {
            deployment.error_message = None;
        }
        DeploymentEvent::Reinstate => {
            deployment.deploy_completed_at = Some(now);
            deployment.metadata.superseded_by = None;
            deployment.metadata.health = None;
        }
        DeploymentEvent::Enqueue => {}
    }

    deployment.status = next;
    deployment.updated_at = now;
    Ok(())
}
