//! Deployment records: guarded transitions and deployment logs

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::deploy::fsm::{self, DeploymentEvent};
use crate::errors::EngineError;
use crate::models::deployment::{DeployStep, Deployment, DeploymentLog, LogLevel};
use crate::store::DeploymentStore;

/// Attempts before a contended compare-and-set gives up
const MAX_CAS_ATTEMPTS: u32 = 8;

/// Access to deployment rows that keeps status changes inside the state machine
#[derive(Clone)]
pub struct DeploymentRecords {
    store: Arc<dyn DeploymentStore>,
}

impl DeploymentRecords {
    pub fn new(store: Arc<dyn DeploymentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn DeploymentStore> {
        &self.store
    }

    pub async fn get(&self, id: &str) -> Result<Deployment, EngineError> {
        self.store
            .get_deployment(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Deployment {}", id)))
    }

    /// Apply `event` against the stored status
    pub async fn transition(&self, id: &str, event: DeploymentEvent) -> Result<Deployment, EngineError> {
        self.transition_with(id, event, |_| {}).await
    }

    /// Apply `mutate` and `event` together, re-reading on a concurrent write
    ///
    /// Fails with `InvalidTransition` when the state machine rejects the event
    /// for the status that is actually stored.
    pub async fn transition_with<F>(
        &self,
        id: &str,
        event: DeploymentEvent,
        mutate: F,
    ) -> Result<Deployment, EngineError>
    where
        F: Fn(&mut Deployment),
    {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.get(id).await?;
            let mut next = current.clone();
            mutate(&mut next);
            fsm::apply(&mut next, &event)
                .map_err(|e| EngineError::InvalidTransition(format!("deployment {}: {}", id, e)))?;

            if self.store.compare_and_swap(&next, current.status).await? {
                debug!("Deployment {}: {} -> {}", id, current.status, next.status);
                return Ok(next);
            }
            debug!("Deployment {} changed concurrently, retrying transition", id);
        }

        Err(EngineError::StoreError(format!(
            "Deployment {} kept changing during transition",
            id
        )))
    }

    /// Update fields without changing status
    pub async fn update<F>(&self, id: &str, mutate: F) -> Result<Deployment, EngineError>
    where
        F: Fn(&mut Deployment),
    {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.get(id).await?;
            let mut next = current.clone();
            mutate(&mut next);
            next.status = current.status;
            next.updated_at = chrono::Utc::now();

            if self.store.compare_and_swap(&next, current.status).await? {
                return Ok(next);
            }
        }

        Err(EngineError::StoreError(format!(
            "Deployment {} kept changing during update",
            id
        )))
    }

    /// Append a deployment log and mirror it to the process log
    pub async fn log(&self, entry: DeploymentLog) {
        let step = entry.step.map(|s| s.as_str()).unwrap_or("-");
        match entry.level {
            LogLevel::Debug => debug!(deployment_id = %entry.deployment_id, step, "{}", entry.message),
            LogLevel::Info => info!(deployment_id = %entry.deployment_id, step, "{}", entry.message),
            LogLevel::Warn => warn!(deployment_id = %entry.deployment_id, step, "{}", entry.message),
            LogLevel::Error => error!(deployment_id = %entry.deployment_id, step, "{}", entry.message),
        }

        // A lost log line must not fail the deployment itself
        if let Err(e) = self.store.append_log(entry).await {
            warn!("Failed to persist deployment log: {}", e);
        }
    }

    pub async fn step_log(
        &self,
        deployment_id: &str,
        level: LogLevel,
        phase: &str,
        step: DeployStep,
        message: impl Into<String>,
    ) {
        self.log(DeploymentLog::new(deployment_id, level, phase, message).with_step(step))
            .await;
    }
}
